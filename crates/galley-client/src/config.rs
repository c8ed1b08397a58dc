/// Where the client talks to and who it is.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `https://app.example.com`.
    pub api_base: String,
    /// WebSocket URL of the live gateway, e.g. `wss://app.example.com/gateway`.
    pub gateway_url: String,
    /// Bearer token issued by the platform auth provider.
    pub token: String,
}

impl ClientConfig {
    /// Derive the gateway URL from the API base (`http` → `ws`, `https` → `wss`).
    pub fn new(api_base: &str, token: &str) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        let gateway_url = match api_base.split_once("://") {
            Some(("https", rest)) => format!("wss://{}/gateway", rest),
            Some((_, rest)) => format!("ws://{}/gateway", rest),
            None => format!("ws://{}/gateway", api_base),
        };
        Self {
            api_base,
            gateway_url,
            token: token.to_string(),
        }
    }
}
