use serde::{Deserialize, Serialize};

/// Payload carried through the channel, serialized as JSON text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DemoMessage {
    pub id: u32,
    pub content: String,
    /// Creation instant, RFC 3339 UTC.
    pub timestamp: String,
}

impl DemoMessage {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            content: format!("Hello, World! {id}"),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
