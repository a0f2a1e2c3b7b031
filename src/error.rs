use ulid::Ulid;

#[derive(Debug)]
pub enum CoreError {
    /// Unknown resource, hold, or waitlist entry.
    NotFound(Ulid),
    /// Caller-side input problem other than the window itself.
    Validation(&'static str),
    /// start >= end, or duration outside the configured booking length.
    InvalidWindow(&'static str),
    /// Another booking or live hold already covers the window.
    Conflict(Ulid),
    /// All capacity slots for the window are occupied.
    CapacityExceeded(u32),
    /// Schedule or booking data is self-contradictory.
    Integrity(String),
    /// Database unreachable or a store operation failed.
    Storage(String),
    LimitExceeded(&'static str),
}

impl CoreError {
    /// Conflicts are retryable by the caller against a fresh slot list;
    /// nothing else is.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_) | CoreError::CapacityExceeded(_))
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::NotFound(id) => write!(f, "not found: {id}"),
            CoreError::Validation(msg) => write!(f, "validation failed: {msg}"),
            CoreError::InvalidWindow(msg) => write!(f, "invalid window: {msg}"),
            CoreError::Conflict(id) => write!(f, "slot unavailable: conflicts with {id}"),
            CoreError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: all slots occupied")
            }
            CoreError::Integrity(msg) => write!(f, "data integrity: {msg}"),
            CoreError::Storage(msg) => write!(f, "storage error: {msg}"),
            CoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification() {
        assert!(CoreError::Conflict(Ulid::new()).is_conflict());
        assert!(CoreError::CapacityExceeded(2).is_conflict());
        assert!(!CoreError::NotFound(Ulid::new()).is_conflict());
        assert!(!CoreError::Storage("down".into()).is_conflict());
    }
}
