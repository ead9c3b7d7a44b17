//! Service error taxonomy.

use thiserror::Error;

/// Result type used across services and the realtime core.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Classified failure shared by every layer.
///
/// Lower layers keep their own error enums and convert into this taxonomy at
/// the point they cross into the gate or the bridge. Mapping to a transport
/// status happens only at the outermost boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Credential missing, malformed, expired, wrongly typed or badly signed.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid identity without the required permission.
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    /// Referenced principal, room or device is absent.
    #[error("not found")]
    NotFound,

    /// An upstream authority answered with a non-success status that must be
    /// forwarded verbatim.
    #[error("upstream responded with status {status}")]
    Upstream { status: u16 },

    /// A downstream dependency could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything unexpected (broker failure, storage failure, bad payload).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn forbidden(permission: impl Into<String>) -> Self {
        Self::Forbidden(permission.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::NotFound => "not_found",
            ServiceError::Upstream { .. } => "upstream_error",
            ServiceError::ServiceUnavailable(_) => "service_unavailable",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to return to a caller.
    ///
    /// Never includes driver or library text; that only goes to the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized => "authentication required",
            ServiceError::Forbidden(_) => "insufficient permissions",
            ServiceError::NotFound => "resource not found",
            ServiceError::Upstream { .. } => "authority rejected the request",
            ServiceError::ServiceUnavailable(_) => "a dependency is unavailable",
            ServiceError::Internal(_) => "internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_messages_do_not_leak_details() {
        let err = ServiceError::internal("pq: connection refused at 10.0.0.3:5432");
        assert_eq!(err.public_message(), "internal error");
        assert!(!err.public_message().contains("10.0.0.3"));

        let err = ServiceError::unavailable("dial tcp: timeout");
        assert_eq!(err.code(), "service_unavailable");
        assert!(!err.public_message().contains("tcp"));
    }

    #[test]
    fn forbidden_keeps_permission_for_logs() {
        let err = ServiceError::forbidden("gestionar_salas");
        assert_eq!(err.to_string(), "forbidden: missing permission 'gestionar_salas'");
        assert_eq!(err.code(), "forbidden");
    }
}
