pub type SceniumResult<T> = Result<T, SceniumError>;

#[derive(thiserror::Error, Debug)]
pub enum SceniumError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("render context lost: {0}")]
    ContextLost(String),

    #[error("reentrancy error: {0}")]
    Reentrancy(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SceniumError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn context_lost(msg: impl Into<String>) -> Self {
        Self::ContextLost(msg.into())
    }

    pub fn reentrancy(msg: impl Into<String>) -> Self {
        Self::Reentrancy(msg.into())
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    /// Whether this error is the recoverable backend-invalidation class.
    ///
    /// Context loss is the only error a render cycle may swallow when the
    /// caller opts into `catch_exceptions`; everything else propagates.
    pub fn is_context_loss(&self) -> bool {
        matches!(self, Self::ContextLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            SceniumError::protocol("x")
                .to_string()
                .contains("protocol error:")
        );
        assert!(
            SceniumError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            SceniumError::context_lost("x")
                .to_string()
                .contains("render context lost:")
        );
        assert!(
            SceniumError::reentrancy("x")
                .to_string()
                .contains("reentrancy error:")
        );
        assert!(
            SceniumError::snapshot("x")
                .to_string()
                .contains("snapshot error:")
        );
    }

    #[test]
    fn only_context_loss_is_recoverable() {
        assert!(SceniumError::context_lost("gone").is_context_loss());
        assert!(!SceniumError::protocol("bad").is_context_loss());
        assert!(!SceniumError::reentrancy("again").is_context_loss());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = SceniumError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
