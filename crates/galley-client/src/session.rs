use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use galley_types::api::MeResponse;
use galley_types::models::{ChatRole, FacilityDocument, Message};

use crate::api::ApiClient;
use crate::attachment::{self, LocalFile, OutgoingAttachment};
use crate::backend::{ChatStore, FeedEvent, FileStorage, IdentityProvider, LiveFeed};
use crate::error::ClientError;

/// Called with the conversation id whenever unread counts may have changed,
/// so list views can refresh.
pub type CountsChanged = Arc<dyn Fn(&str) + Send + Sync>;

/// The services a session talks to.
#[derive(Clone)]
pub struct Backends {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn ChatStore>,
    pub files: Arc<dyn FileStorage>,
}

impl Backends {
    pub fn from_api(api: ApiClient) -> Self {
        let api = Arc::new(api);
        Self {
            identity: api.clone(),
            store: api.clone(),
            files: api,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Loading,
    Ready,
}

/// Unsent composer state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub text: String,
    pub selected_file: Option<LocalFile>,
    pub facility_document: Option<FacilityDocument>,
}

impl Draft {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self.selected_file.is_none()
            && self.facility_document.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send; no request was made.
    Skipped,
    /// Another send of this session is still running.
    InFlight,
    Sent(Message),
}

#[derive(Default)]
struct SessionState {
    phase: Phase,
    viewer: Option<MeResponse>,
    messages: Vec<Message>,
    error: Option<String>,
    draft: Draft,
    /// Id of the newest message; views scroll to it.
    scroll_anchor: Option<String>,
}

struct SessionInner {
    conversation_id: String,
    backends: Backends,
    on_counts_changed: Option<CountsChanged>,
    sending: AtomicBool,
    state: Mutex<SessionState>,
}

/// One open conversation: message list, composer and read tracking.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(
        conversation_id: impl Into<String>,
        backends: Backends,
        on_counts_changed: Option<CountsChanged>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                conversation_id: conversation_id.into(),
                backends,
                on_counts_changed,
                sending: AtomicBool::new(false),
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn viewer(&self) -> Option<MeResponse> {
        self.state().viewer.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    /// Last surfaced failure, suitable for an alert.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn draft(&self) -> Draft {
        self.state().draft.clone()
    }

    pub fn scroll_anchor(&self) -> Option<String> {
        self.state().scroll_anchor.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.inner.sending.load(Ordering::Acquire)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        // State is plain data; a panic mid-update cannot leave it unusable.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn viewer_id_role(&self) -> Option<(i64, ChatRole)> {
        self.state().viewer.as_ref().map(|v| (v.id, v.role))
    }

    fn fail(&self, e: &ClientError) {
        self.state().error = Some(e.to_string());
    }

    fn notify_counts_changed(&self) {
        if let Some(callback) = &self.inner.on_counts_changed {
            callback(&self.inner.conversation_id);
        }
    }

    /// Map the platform identity to the numeric chef/manager id.
    pub async fn resolve_identity(&self) -> Result<MeResponse, ClientError> {
        match self.inner.backends.identity.resolve().await {
            Ok(me) => {
                debug!("Session {} viewer is {} {}", self.conversation_id(), me.role, me.id);
                self.state().viewer = Some(me.clone());
                Ok(me)
            }
            Err(e) => {
                warn!("Identity lookup failed: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Mount the conversation: resolve the viewer, load and read the history,
    /// then listen for live snapshots. A failed history load is kept in the
    /// error slot and does not stop the listener.
    pub async fn open(&self, feed: &dyn LiveFeed) -> Result<LiveListener, ClientError> {
        self.resolve_identity().await?;
        if let Err(e) = self.load_history().await {
            debug!("Opening {} without history: {}", self.conversation_id(), e);
        }
        self.attach(feed).await
    }

    /// Fetch the full history and mark it read. Deferred until the viewer is
    /// known.
    pub async fn load_history(&self) -> Result<(), ClientError> {
        if self.viewer_id_role().is_none() {
            debug!("History load for {} deferred: viewer unknown", self.conversation_id());
            return Ok(());
        }

        match self.inner.backends.store.load_messages(self.conversation_id()).await {
            Ok(messages) => {
                self.apply_snapshot(messages);
                if let Err(e) = self.mark_as_read().await {
                    warn!("Mark-as-read after initial load failed: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to load messages for {}: {}", self.conversation_id(), e);
                let mut state = self.state();
                state.messages.clear();
                state.scroll_anchor = None;
                state.error = Some(e.to_string());
                state.phase = Phase::Ready;
                Err(e)
            }
        }
    }

    /// Replace the message list with `messages`, oldest first.
    pub fn apply_snapshot(&self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut state = self.state();
        state.scroll_anchor = messages.last().map(|m| m.id.clone());
        state.messages = messages;
        state.phase = Phase::Ready;
    }

    /// Zero the viewer's own unread counter. Deferred until the viewer is known.
    pub async fn mark_as_read(&self) -> Result<(), ClientError> {
        let Some((user_id, role)) = self.viewer_id_role() else {
            debug!("Mark-as-read for {} deferred: viewer unknown", self.conversation_id());
            return Ok(());
        };

        self.inner
            .backends
            .store
            .mark_read(self.conversation_id(), user_id, role)
            .await?;
        self.notify_counts_changed();
        Ok(())
    }

    /// Start listening for live snapshots. Each snapshot replaces the list and
    /// marks the conversation read. The listener stops when the returned guard
    /// is dropped or closed.
    pub async fn attach(&self, feed: &dyn LiveFeed) -> Result<LiveListener, ClientError> {
        let mut subscription = feed.subscribe(self.conversation_id()).await?;
        let session = self.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.events.recv().await {
                match event {
                    FeedEvent::Snapshot(messages) => {
                        session.apply_snapshot(messages);
                        if let Err(e) = session.mark_as_read().await {
                            warn!("Mark-as-read after snapshot failed: {}", e);
                        }
                    }
                    FeedEvent::Error { kind, message } => {
                        let e = ClientError::Subscription { kind, message };
                        warn!("Live updates for {} unavailable: {}", session.conversation_id(), e);
                        session.fail(&e);
                    }
                    FeedEvent::Closed => break,
                }
            }
            debug!("Live listener for {} stopped", session.conversation_id());
        });

        Ok(LiveListener { task: Some(task) })
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.state().draft.text = text.into();
    }

    /// Pick an ad hoc file. Oversized files are refused and leave no selection.
    pub fn select_file(&self, file: LocalFile) -> Result<(), ClientError> {
        let result = attachment::validate_chat_attachment(&file);
        let mut state = self.state();
        match result {
            Ok(()) => {
                state.draft.selected_file = Some(file);
                Ok(())
            }
            Err(e) => {
                state.draft.selected_file = None;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn clear_file(&self) {
        self.state().draft.selected_file = None;
    }

    /// Attach a stored facility document. Managers only.
    pub fn attach_facility_document(&self, document: FacilityDocument) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.viewer.as_ref().map(|v| v.role) != Some(ChatRole::Manager) {
            return Err(ClientError::FacilityDocumentsManagerOnly);
        }
        state.draft.facility_document = Some(document);
        Ok(())
    }

    pub fn clear_facility_document(&self) {
        self.state().draft.facility_document = None;
    }

    /// Send the draft. An uploaded file takes precedence over a facility
    /// document. On failure the draft is kept for retry. The message list is
    /// left to the next live snapshot.
    pub async fn send(&self) -> Result<SendOutcome, ClientError> {
        let draft = self.draft();
        if draft.is_empty() {
            return Ok(SendOutcome::Skipped);
        }
        if self
            .inner
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SendOutcome::InFlight);
        }

        let result = self.send_draft(&draft).await;
        self.inner.sending.store(false, Ordering::Release);

        match result {
            Ok(None) => Ok(SendOutcome::Skipped),
            Ok(Some(message)) => {
                {
                    // Keep whatever was typed or picked while the send was running.
                    let mut state = self.state();
                    if state.draft.text == draft.text {
                        state.draft.text.clear();
                    }
                    if state.draft.selected_file == draft.selected_file {
                        state.draft.selected_file = None;
                    }
                    state.draft.facility_document = None;
                    state.error = None;
                }
                info!("Sent message {} to {}", message.id, self.conversation_id());
                self.notify_counts_changed();
                Ok(SendOutcome::Sent(message))
            }
            Err(e) => {
                warn!("Send to {} failed: {}", self.conversation_id(), e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn send_draft(&self, draft: &Draft) -> Result<Option<Message>, ClientError> {
        let outgoing = match (&draft.selected_file, &draft.facility_document) {
            (Some(file), _) => Some(OutgoingAttachment::Uploaded(
                self.inner
                    .backends
                    .files
                    .upload(self.conversation_id(), file)
                    .await?,
            )),
            (None, Some(document)) => Some(OutgoingAttachment::FacilityDocument(document.clone())),
            (None, None) => None,
        };

        let Some(request) = attachment::compose(&draft.text, outgoing.as_ref()) else {
            return Ok(None);
        };
        let message = self
            .inner
            .backends
            .store
            .send_message(self.conversation_id(), &request)
            .await?;
        Ok(Some(message))
    }
}

/// Running live listener; stops on drop.
pub struct LiveListener {
    task: Option<JoinHandle<()>>,
}

impl LiveListener {
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LiveListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use galley_types::events::SubscriptionErrorKind;
    use galley_types::models::{MessageKind, SenderRole};

    use super::*;
    use crate::fakes::{FakeFeed, FakeFiles, FakeIdentity, FakeStore, conversation, message_at};

    struct Harness {
        store: Arc<FakeStore>,
        files: Arc<FakeFiles>,
        counts_changed: Arc<AtomicUsize>,
        session: ChatSession,
    }

    fn harness(viewer: Option<(i64, ChatRole)>) -> Harness {
        let store = Arc::new(FakeStore::default());
        store.put_conversations(vec![conversation("c1", 10, 1, 2)]);
        let files = Arc::new(FakeFiles::default());
        let identity = Arc::new(FakeIdentity::new(viewer));
        let counts_changed = Arc::new(AtomicUsize::new(0));
        let counter = counts_changed.clone();
        let on_counts_changed: CountsChanged = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let session = ChatSession::new(
            "c1",
            Backends {
                identity,
                store: store.clone(),
                files: files.clone(),
            },
            Some(on_counts_changed),
        );
        Harness {
            store,
            files,
            counts_changed,
            session,
        }
    }

    async fn ready(viewer: (i64, ChatRole)) -> Harness {
        let h = harness(Some(viewer));
        h.session.resolve_identity().await.unwrap();
        h
    }

    #[tokio::test]
    async fn history_and_read_wait_for_identity() {
        let h = harness(None);
        h.session.load_history().await.unwrap();
        h.session.mark_as_read().await.unwrap();
        assert_eq!(h.store.load_calls(), 0);
        assert_eq!(h.store.mark_read_calls(), 0);
        assert_eq!(h.session.phase(), Phase::Loading);

        assert!(h.session.resolve_identity().await.is_err());
        assert!(h.session.error().is_some());
    }

    #[tokio::test]
    async fn history_is_sorted_and_anchored() {
        let h = ready((1, ChatRole::Chef)).await;
        h.store.put_messages(
            "c1",
            vec![
                message_at("m2", Some(2), SenderRole::Manager, "later", 20),
                message_at("m1", Some(1), SenderRole::Chef, "earlier", 10),
            ],
        );

        h.session.load_history().await.unwrap();
        let ids: Vec<_> = h.session.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["m1", "m2"]);
        assert_eq!(h.session.scroll_anchor().as_deref(), Some("m2"));
        assert_eq!(h.session.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn history_failure_shows_empty_list_with_error() {
        let h = ready((1, ChatRole::Chef)).await;
        h.store.fail_reads(true);
        assert!(h.session.load_history().await.is_err());
        assert!(h.session.messages().is_empty());
        assert!(h.session.error().is_some());
        assert_eq!(h.session.phase(), Phase::Ready);
        assert_eq!(h.store.mark_read_calls(), 0);
    }

    #[tokio::test]
    async fn initial_load_marks_conversation_read() {
        let h = ready((2, ChatRole::Manager)).await;
        h.store.bump_unread("c1", 0, 3);
        h.session.load_history().await.unwrap();

        assert_eq!(h.store.mark_read_calls(), 1);
        assert_eq!(h.store.conversation("c1").unwrap().unread_manager_count, 0);
        assert_eq!(h.counts_changed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_resolves_loads_reads_then_listens() {
        let h = harness(Some((2, ChatRole::Manager)));
        h.store.bump_unread("c1", 0, 2);
        h.store.put_messages("c1", vec![message_at("m1", Some(1), SenderRole::Chef, "a", 10)]);
        let feed = FakeFeed::default();

        let _listener = h.session.open(&feed).await.unwrap();
        assert_eq!(h.session.viewer().map(|v| v.id), Some(2));
        assert_eq!(h.store.load_calls(), 1);
        assert_eq!(h.store.mark_read_calls(), 1);
        assert_eq!(h.store.conversation("c1").unwrap().unread_manager_count, 0);
        assert_eq!(h.session.messages().len(), 1);

        feed.emit(
            "c1",
            FeedEvent::Snapshot(vec![
                message_at("m1", Some(1), SenderRole::Chef, "a", 10),
                message_at("m2", Some(1), SenderRole::Chef, "b", 20),
            ]),
        );
        wait_for(|| h.store.mark_read_calls() == 2).await;
        assert_eq!(h.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn open_without_identity_does_not_listen() {
        let h = harness(None);
        let feed = FakeFeed::default();
        assert!(h.session.open(&feed).await.is_err());
        assert_eq!(h.store.load_calls(), 0);
        assert!(!feed.emit("c1", FeedEvent::Closed));
    }

    #[tokio::test]
    async fn empty_send_is_a_no_op() {
        let h = ready((1, ChatRole::Chef)).await;
        h.session.set_text("   ");
        assert_eq!(h.session.send().await.unwrap(), SendOutcome::Skipped);
        assert_eq!(h.store.send_calls(), 0);
        assert_eq!(h.files.upload_calls(), 0);
        assert_eq!(h.session.draft().text, "   ");
        assert!(h.session.messages().is_empty());
    }

    #[tokio::test]
    async fn text_send_clears_draft_and_notifies() {
        let h = ready((1, ChatRole::Chef)).await;
        h.session.set_text("Hello");
        let SendOutcome::Sent(message) = h.session.send().await.unwrap() else {
            panic!("expected a sent message");
        };
        assert_eq!(message.content, "Hello");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(h.session.draft(), Draft::default());
        assert_eq!(h.counts_changed.load(Ordering::SeqCst), 1);
        // The list only changes with the next snapshot.
        assert!(h.session.messages().is_empty());
        assert_eq!(h.session.scroll_anchor(), None);
    }

    #[tokio::test]
    async fn file_only_send_uploads_and_captions() {
        let h = ready((1, ChatRole::Chef)).await;
        h.session
            .select_file(LocalFile::new("menu.pdf", vec![1u8; 64]))
            .unwrap();

        let SendOutcome::Sent(message) = h.session.send().await.unwrap() else {
            panic!("expected a sent message");
        };
        assert_eq!(h.files.upload_calls(), 1);
        assert_eq!(message.kind, MessageKind::File);
        assert_eq!(message.content, "Attached file: menu.pdf");
        assert_eq!(message.file_name.as_deref(), Some("menu.pdf"));
    }

    #[tokio::test]
    async fn manager_sends_facility_document_without_upload() {
        let h = ready((2, ChatRole::Manager)).await;
        h.session
            .attach_facility_document(FacilityDocument {
                name: "License.pdf".into(),
                url: "https://docs.example/license".into(),
            })
            .unwrap();

        let SendOutcome::Sent(message) = h.session.send().await.unwrap() else {
            panic!("expected a sent message");
        };
        assert_eq!(h.files.upload_calls(), 0);
        assert_eq!(message.kind, MessageKind::File);
        assert_eq!(message.file_name.as_deref(), Some("License.pdf"));
        assert_eq!(message.content, "Attached facility document: License.pdf");
        assert!(h.session.draft().facility_document.is_none());
    }

    #[tokio::test]
    async fn chefs_cannot_attach_facility_documents() {
        let h = ready((1, ChatRole::Chef)).await;
        let err = h
            .session
            .attach_facility_document(FacilityDocument {
                name: "License.pdf".into(),
                url: "https://docs.example/license".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::FacilityDocumentsManagerOnly));
    }

    #[tokio::test]
    async fn oversized_file_is_never_uploaded() {
        let h = ready((1, ChatRole::Chef)).await;
        let big = LocalFile::new("walkthrough.mp4", vec![0u8; 12 * 1024 * 1024]);
        assert!(matches!(
            h.session.select_file(big),
            Err(ClientError::AttachmentTooLarge { .. })
        ));
        assert!(h.session.draft().selected_file.is_none());
        assert_eq!(h.session.send().await.unwrap(), SendOutcome::Skipped);
        assert_eq!(h.files.upload_calls(), 0);
    }

    #[tokio::test]
    async fn failed_send_keeps_draft() {
        let h = ready((1, ChatRole::Chef)).await;
        h.store.fail_sends(true);
        h.session.set_text("Are you open Sunday?");
        assert!(h.session.send().await.is_err());
        assert_eq!(h.session.draft().text, "Are you open Sunday?");
        assert!(h.session.error().is_some());
        assert_eq!(h.counts_changed.load(Ordering::SeqCst), 0);
        assert!(!h.session.is_sending());
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_refused() {
        let h = ready((1, ChatRole::Chef)).await;
        let gate = h.store.hold_sends();
        h.session.set_text("first");

        let first = tokio::spawn({
            let session = h.session.clone();
            async move { session.send().await }
        });
        while h.store.send_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.session.send().await.unwrap(), SendOutcome::InFlight);
        gate.add_permits(1);
        assert!(matches!(first.await.unwrap().unwrap(), SendOutcome::Sent(_)));
        assert_eq!(h.store.send_calls(), 1);
    }

    #[tokio::test]
    async fn text_typed_during_send_survives() {
        let h = ready((1, ChatRole::Chef)).await;
        let gate = h.store.hold_sends();
        h.session.set_text("first");

        let first = tokio::spawn({
            let session = h.session.clone();
            async move { session.send().await }
        });
        while h.store.send_calls() == 0 {
            tokio::task::yield_now().await;
        }
        h.session.set_text("second, typed while first was sending");
        gate.add_permits(1);

        let SendOutcome::Sent(message) = first.await.unwrap().unwrap() else {
            panic!("expected a sent message");
        };
        assert_eq!(message.content, "first");
        assert_eq!(h.session.draft().text, "second, typed while first was sending");
    }

    #[tokio::test]
    async fn attachments_can_be_cleared() {
        let h = ready((2, ChatRole::Manager)).await;
        h.session
            .select_file(LocalFile::new("menu.pdf", vec![1u8; 8]))
            .unwrap();
        h.session
            .attach_facility_document(FacilityDocument {
                name: "License.pdf".into(),
                url: "https://docs.example/license".into(),
            })
            .unwrap();

        h.session.clear_file();
        assert!(h.session.draft().selected_file.is_none());
        assert!(h.session.draft().facility_document.is_some());

        h.session.clear_facility_document();
        assert_eq!(h.session.draft(), Draft::default());
        assert_eq!(h.session.send().await.unwrap(), SendOutcome::Skipped);
    }

    #[tokio::test]
    async fn mark_as_read_zeroes_own_counter_only() {
        let h = ready((2, ChatRole::Manager)).await;
        h.store.bump_unread("c1", 3, 4);
        h.session.mark_as_read().await.unwrap();

        let conversation = h.store.conversation("c1").unwrap();
        assert_eq!(conversation.unread_manager_count, 0);
        assert_eq!(conversation.unread_chef_count, 3);
        assert_eq!(h.counts_changed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_snapshots_replace_list_and_mark_read() {
        let h = ready((2, ChatRole::Manager)).await;
        let feed = FakeFeed::default();
        let listener = h.session.attach(&feed).await.unwrap();

        feed.emit(
            "c1",
            FeedEvent::Error {
                kind: SubscriptionErrorKind::FailedPrecondition,
                message: "conversation not created yet".into(),
            },
        );
        feed.emit(
            "c1",
            FeedEvent::Snapshot(vec![
                message_at("m2", Some(2), SenderRole::Manager, "b", 20),
                message_at("m1", Some(1), SenderRole::Chef, "a", 10),
            ]),
        );
        wait_for(|| h.store.mark_read_calls() == 1).await;
        assert_eq!(h.session.messages().len(), 2);
        assert_eq!(h.session.messages()[0].id, "m1");
        assert!(h.session.error().unwrap().contains("failed-precondition"));

        feed.emit(
            "c1",
            FeedEvent::Snapshot(vec![message_at("m1", Some(1), SenderRole::Chef, "a", 10)]),
        );
        wait_for(|| h.store.mark_read_calls() == 2).await;
        assert_eq!(h.session.messages().len(), 1);

        listener.close();
        wait_for(|| !feed.emit("c1", FeedEvent::Closed)).await;
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}
