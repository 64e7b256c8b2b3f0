use serde::Serialize;

// an upload settled into a share link
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AutoShareReady {
    pub path: String,
    pub share_hash: String,
    /// decoded file name, empty when the path has none
    pub file_label: String,
    pub stream_url: String,
}

// an upload settled but the share call failed
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AutoShareFailed {
    pub path: String,
    pub error: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoShareEvent {
    Ready(AutoShareReady),
    Failed(AutoShareFailed),
}

impl AutoShareEvent {
    pub fn path(&self) -> &str {
        match self {
            AutoShareEvent::Ready(e) => &e.path,
            AutoShareEvent::Failed(e) => &e.path,
        }
    }
}

// one entry of the auto-share feed
#[derive(Serialize, Debug, Clone)]
pub struct AutoShareRecord {
    pub id: String,
    pub at: String,
    #[serde(flatten)]
    pub event: AutoShareEvent,
}

// response for the auto-share feed endpoint
#[derive(Serialize, Debug)]
pub struct AutoShareFeedResponse {
    pub events: Vec<AutoShareRecord>,
    pub total: usize,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
