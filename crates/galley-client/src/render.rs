use chrono::TimeZone;

use galley_types::models::{Message, MessageKind, SenderRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Sent by the viewer, whatever their role.
    Own,
    Chef,
    Manager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    File {
        file_name: String,
        caption: String,
        download_url: Option<String>,
    },
}

/// Display model of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageView {
    /// Centered notice, no sender label.
    System { text: String, time: String },
    Bubble {
        tone: Tone,
        align: Align,
        sender_label: String,
        body: MessageBody,
        time: String,
    },
}

pub fn render_message<Tz: TimeZone>(message: &Message, viewer_id: i64, tz: &Tz) -> MessageView
where
    Tz::Offset: std::fmt::Display,
{
    let time = message.created_at.with_timezone(tz).format("%H:%M").to_string();

    let tone = match message.sender_role {
        SenderRole::System => {
            return MessageView::System {
                text: message.content.clone(),
                time,
            };
        }
        _ if message.sender_id == Some(viewer_id) => Tone::Own,
        SenderRole::Chef => Tone::Chef,
        SenderRole::Manager => Tone::Manager,
    };

    let sender_label = match tone {
        Tone::Own => "You",
        Tone::Chef => "Chef",
        Tone::Manager => "Manager",
    };

    let body = match message.kind {
        MessageKind::File => MessageBody::File {
            file_name: message
                .file_name
                .clone()
                .unwrap_or_else(|| "Attachment".to_string()),
            caption: message.content.clone(),
            download_url: message.file_url.clone(),
        },
        MessageKind::Text => MessageBody::Text(message.content.clone()),
    };

    MessageView::Bubble {
        tone,
        align: if tone == Tone::Own { Align::Right } else { Align::Left },
        sender_label: sender_label.to_string(),
        body,
        time,
    }
}

/// Render a snapshot oldest-first, whatever order it arrived in.
pub fn render_list<Tz: TimeZone>(messages: &[Message], viewer_id: i64, tz: &Tz) -> Vec<MessageView>
where
    Tz::Offset: std::fmt::Display,
{
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    sorted
        .into_iter()
        .map(|m| render_message(m, viewer_id, tz))
        .collect()
}
