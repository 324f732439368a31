//! Error types for standbyd

use thiserror::Error;

/// Core error type for standbyd operations
#[derive(Debug, Error)]
pub enum StandbyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Standby service is not ready")]
    NotReady,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Caller is not a system app (uid {0})")]
    NotSystemApp(i32),

    #[error("Plugin load error: {0}")]
    PluginLoad(String),

    #[error("State init failed: {0}")]
    StateInitFailed(String),

    #[error("Timer service error: {0}")]
    TimerService(String),

    #[error("Timed task not found: {0}")]
    TimerNotFound(String),

    #[error("Transition vetoed: {0}")]
    TransitionVetoed(String),

    #[error("Strategy not deployed: {0}")]
    StrategyNotDeployed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StandbyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::PluginLoad(msg.into())
    }

    pub fn timer(msg: impl Into<String>) -> Self {
        Self::TimerService(msg.into())
    }

    pub fn vetoed(msg: impl Into<String>) -> Self {
        Self::TransitionVetoed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// Whether this error was raised before any shared state was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotReady | Self::PermissionDenied(_) | Self::NotSystemApp(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StandbyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classes() {
        assert!(StandbyError::validation("bad mask").is_rejection());
        assert!(StandbyError::NotReady.is_rejection());
        assert!(StandbyError::NotSystemApp(10).is_rejection());
        assert!(!StandbyError::timer("arm failed").is_rejection());
        assert!(!StandbyError::plugin("missing").is_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = StandbyError::validation("uid must not be negative");
        assert_eq!(err.to_string(), "Validation error: uid must not be negative");
        assert_eq!(StandbyError::NotReady.to_string(), "Standby service is not ready");
    }
}
