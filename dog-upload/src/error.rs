use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Result type for blob store primitives
pub type StoreResult<T> = Result<T, StoreError>;

/// Structured error kinds with their HTTP status equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,       // 400
    NotAuthenticated, // 401
    Forbidden,        // 403
    NotFound,         // 404
    Timeout,          // 408
    Conflict,         // 409
    Cancelled,        // 499
    GeneralError,     // 500
    BadGateway,       // 502
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::Cancelled => 499,
            ErrorKind::GeneralError => 500,
            ErrorKind::BadGateway => 502,
        }
    }

    /// Error `name` (e.g. "NotFound")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::BadGateway => "BadGateway",
        }
    }

    /// Kebab-cased `className`
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::BadGateway => "bad-gateway",
        }
    }

    /// Reverse of [`ErrorKind::name`], used when decoding remote error bodies.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "BadRequest" => ErrorKind::BadRequest,
            "NotAuthenticated" => ErrorKind::NotAuthenticated,
            "Forbidden" => ErrorKind::Forbidden,
            "NotFound" => ErrorKind::NotFound,
            "Timeout" => ErrorKind::Timeout,
            "Conflict" => ErrorKind::Conflict,
            "Cancelled" => ErrorKind::Cancelled,
            "GeneralError" => ErrorKind::GeneralError,
            "BadGateway" => ErrorKind::BadGateway,
            _ => return None,
        };
        Some(kind)
    }
}

/// Errors that can occur while coordinating or performing an upload
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Not authenticated: {message}")]
    NotAuthenticated { message: String },

    #[error("Blob store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("Transport error: {message}")]
    Transport { message: String, transient: bool },

    /// The store refused a presigned URL, usually an expired signature
    #[error("Presigned URL rejected: {message}")]
    UrlRejected { message: String },

    #[error("Integrity error: {message}")]
    Integrity { message: String },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[cfg(feature = "sqlite")]
    #[error("Session database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },
}

impl UploadError {
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest { message: message.into() }
    }

    pub fn not_authenticated<S: Into<String>>(message: S) -> Self {
        Self::NotAuthenticated { message: message.into() }
    }

    /// A network failure worth retrying (connection reset, 5xx, timeout).
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// A network-level failure that retrying will not fix.
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    pub fn url_rejected<S: Into<String>>(message: S) -> Self {
        Self::UrlRejected { message: message.into() }
    }

    pub fn integrity<S: Into<String>>(message: S) -> Self {
        Self::Integrity { message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Structured kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::NotAuthenticated { .. } => ErrorKind::NotAuthenticated,
            Self::Store { .. } | Self::Transport { .. } | Self::UrlRejected { .. } | Self::Integrity { .. } => {
                ErrorKind::BadGateway
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } | Self::Serialization { .. } => ErrorKind::GeneralError,
            #[cfg(feature = "sqlite")]
            Self::Database { .. } => ErrorKind::GeneralError,
        }
    }

    /// Only transient transport failures and timeouts are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { transient: true, .. } | Self::Timeout { .. }
        )
    }

    /// Retrying with the same URL is pointless, a freshly minted one may work.
    pub fn is_url_rejected(&self) -> bool {
        matches!(self, Self::UrlRejected { .. })
    }

    /// Message safe to hand to a remote caller. Backend details stay in logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::NotFound { message }
            | Self::Forbidden { message }
            | Self::Conflict { message }
            | Self::BadRequest { message }
            | Self::NotAuthenticated { message } => message.clone(),
            Self::Store { .. } => "Blob store request failed".to_string(),
            Self::Transport { .. } | Self::UrlRejected { .. } | Self::Integrity { .. } => {
                "Upstream transfer failed".to_string()
            }
            Self::Cancelled => "Upload cancelled".to_string(),
            Self::Timeout { operation } => format!("Timed out during {}", operation),
            _ => "Internal error".to_string(),
        }
    }

    /// Rebuild an error from a remote `{name, message}` body.
    pub fn from_remote(name: &str, message: String, status: u16) -> Self {
        match ErrorKind::from_name(name) {
            Some(ErrorKind::NotFound) => Self::NotFound { message },
            Some(ErrorKind::Forbidden) => Self::Forbidden { message },
            Some(ErrorKind::Conflict) => Self::Conflict { message },
            Some(ErrorKind::BadRequest) => Self::BadRequest { message },
            Some(ErrorKind::NotAuthenticated) => Self::NotAuthenticated { message },
            Some(ErrorKind::Timeout) => Self::Timeout { operation: message },
            _ => Self::Transport {
                message,
                transient: status >= 500 || status == 429 || status == 408,
            },
        }
    }
}

/// Failures reported by a blob store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    /// The remote multipart upload no longer exists (aborted, completed or lifecycle-expired).
    #[error("Multipart upload no longer exists: {upload_id}")]
    UploadGone { upload_id: String },

    #[error("Unexpected store response: {message}")]
    InvalidResponse { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn upload_gone<S: Into<String>>(upload_id: S) -> Self {
        Self::UploadGone {
            upload_id: upload_id.into(),
        }
    }

    pub fn is_upload_gone(&self) -> bool {
        matches!(self, Self::UploadGone { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(UploadError::not_found("x").kind().status_code(), 404);
        assert_eq!(UploadError::forbidden("x").kind().status_code(), 403);
        assert_eq!(UploadError::conflict("x").kind().status_code(), 409);
        assert_eq!(UploadError::bad_request("x").kind().status_code(), 400);
        assert_eq!(UploadError::Cancelled.kind().class_name(), "cancelled");
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(UploadError::transient("reset").is_retryable());
        assert!(UploadError::timeout("part upload").is_retryable());
        assert!(!UploadError::permanent("403").is_retryable());
        assert!(!UploadError::conflict("terminal").is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
        assert!(!UploadError::integrity("no etag").is_retryable());
        assert!(!UploadError::url_rejected("expired").is_retryable());
        assert!(UploadError::url_rejected("expired").is_url_rejected());
        assert_eq!(UploadError::url_rejected("expired").kind(), ErrorKind::BadGateway);
    }

    #[test]
    fn client_message_hides_backend_details() {
        let err = UploadError::from(StoreError::invalid_response("secret bucket layout"));
        assert_eq!(err.client_message(), "Blob store request failed");
        assert_eq!(err.kind(), ErrorKind::BadGateway);
    }

    #[test]
    fn remote_errors_round_trip_by_name() {
        let err = UploadError::from_remote("Conflict", "Upload session is aborted".into(), 409);
        assert!(matches!(err, UploadError::Conflict { .. }));

        let err = UploadError::from_remote("GeneralError", "boom".into(), 503);
        assert!(err.is_retryable());
    }
}
