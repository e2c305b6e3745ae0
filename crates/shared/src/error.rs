use thiserror::Error;

/// Why an inbound frame was dropped instead of being turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IgnoredFrame {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame has no event_type")]
    MissingEventType,
    #[error("unknown event_type '{0}'")]
    UnknownEventType(String),
}

impl IgnoredFrame {
    pub fn malformed(reason: impl ToString) -> Self {
        Self::Malformed(reason.to_string())
    }
}
