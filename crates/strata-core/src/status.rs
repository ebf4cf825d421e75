//! Status-bearing response verification.
//!
//! Cross-component acknowledgements carry a [`Status`] record. Callers
//! verify them through [`verify_response`], which dispatches statically on
//! the [`StatusBearing`] capability instead of inspecting response types at
//! runtime; bare status records go through [`verify_status`].

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// Wire-level outcome record attached to acknowledgements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Zero means success; anything else is an error code.
    pub code: i32,
    pub reason: String,
}

impl Status {
    /// A success status.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// An error status with the given code and reason.
    #[must_use]
    pub fn error(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Whether the status reports success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Capability of a response that carries a [`Status`].
pub trait StatusBearing {
    fn status(&self) -> &Status;
}

/// Verifies a bare status record.
///
/// # Errors
///
/// Returns `MetaError::InvalidState` carrying the remote reason when the
/// status reports failure.
pub fn verify_status(status: &Status) -> MetaResult<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(MetaError::invalid_state(format!(
            "remote returned error code {}: {}",
            status.code, status.reason
        )))
    }
}

/// Verifies a status-bearing response and passes it through on success.
///
/// # Errors
///
/// Returns the embedded status error when the response reports failure.
pub fn verify_response<R: StatusBearing>(response: R) -> MetaResult<R> {
    verify_status(response.status())?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ack {
        status: Status,
    }

    impl StatusBearing for Ack {
        fn status(&self) -> &Status {
            &self.status
        }
    }

    #[test]
    fn test_verify_success() {
        let ack = Ack {
            status: Status::success(),
        };
        assert!(verify_response(ack).is_ok());
        assert!(verify_status(&Status::success()).is_ok());
    }

    #[test]
    fn test_verify_failure_carries_reason() {
        let ack = Ack {
            status: Status::error(9, "queue full"),
        };
        let err = verify_response(ack).unwrap_err();
        assert!(err.to_string().contains("queue full"));
    }
}
