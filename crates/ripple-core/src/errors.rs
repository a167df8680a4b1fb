use crate::ids::UserId;

/// Typed error hierarchy for relay operations.
/// Classifies errors as terminal for the connection (close the transport),
/// recoverable (connection stays open), or retryable dependency failures.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    // Terminal — the handshake or connection must be closed
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("expired credential")]
    ExpiredCredential,
    #[error("unknown identity: {0}")]
    UnknownIdentity(UserId),

    // Recoverable — reported to the sending connection only
    #[error("malformed payload: {0}")]
    Decode(String),

    // Isolated — disconnects the affected subscriber, never the publisher
    #[error("delivery to {connection_id} failed: {reason}")]
    Delivery {
        connection_id: String,
        reason: String,
    },

    // Retryable — a dependency exceeded its bounded timeout
    #[error("{dependency} timed out")]
    DependencyTimeout { dependency: &'static str },

    #[error("store error: {0}")]
    Store(String),
}

impl RelayError {
    /// True when the connection (or handshake) must be closed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::InvalidCredential(_)
                | Self::ExpiredCredential
                | Self::UnknownIdentity(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DependencyTimeout { .. } | Self::Store(_))
    }

    /// Short classification string for logging and error acks.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
            Self::UnknownIdentity(_) => "unknown_identity",
            Self::Decode(_) => "decode_error",
            Self::Delivery { .. } => "delivery_error",
            Self::DependencyTimeout { .. } => "dependency_timeout",
            Self::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_terminal() {
        assert!(RelayError::MissingCredential.is_terminal());
        assert!(RelayError::InvalidCredential("bad signature".into()).is_terminal());
        assert!(RelayError::ExpiredCredential.is_terminal());
        assert!(RelayError::UnknownIdentity(UserId::new(9)).is_terminal());
    }

    #[test]
    fn decode_and_delivery_are_not_terminal() {
        assert!(!RelayError::Decode("not json".into()).is_terminal());
        assert!(!RelayError::Delivery {
            connection_id: "conn_x".into(),
            reason: "closed".into()
        }
        .is_terminal());
    }

    #[test]
    fn timeout_is_retryable_not_terminal() {
        let err = RelayError::DependencyTimeout {
            dependency: "credential validator",
        };
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(RelayError::ExpiredCredential.error_kind(), "expired_credential");
        assert_eq!(RelayError::Decode("x".into()).error_kind(), "decode_error");
        assert_eq!(
            RelayError::DependencyTimeout { dependency: "store" }.error_kind(),
            "dependency_timeout"
        );
    }
}
