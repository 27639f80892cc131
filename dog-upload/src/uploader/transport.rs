use async_trait::async_trait;
use bytes::Bytes;

use crate::UploadResult;

/// Data plane: PUT one part's bytes to a presigned URL.
///
/// Returns the store's etag, or `None` when the response carried none.
/// Failures worth retrying come back as transient transport errors. A URL the
/// store refuses to honour (403) comes back as [`UploadError::UrlRejected`] so
/// the caller can mint a fresh one.
///
/// [`UploadError::UrlRejected`]: crate::UploadError::UrlRejected
#[async_trait]
pub trait PartTransport: Send + Sync {
    async fn put_part(&self, url: &str, body: Bytes) -> UploadResult<Option<String>>;
}

#[cfg(feature = "http-client")]
pub use http::HttpPartTransport;

#[cfg(feature = "http-client")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::{header, Client, StatusCode};

    use super::PartTransport;
    use crate::{UploadError, UploadResult};

    /// reqwest-based part uploader
    #[derive(Debug, Clone)]
    pub struct HttpPartTransport {
        client: Client,
        timeout: Option<Duration>,
    }

    impl HttpPartTransport {
        pub fn new() -> Self {
            Self::with_client(Client::new())
        }

        pub fn with_client(client: Client) -> Self {
            Self { client, timeout: None }
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }
    }

    impl Default for HttpPartTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    pub(crate) fn request_error(err: reqwest::Error) -> UploadError {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            UploadError::transient(format!("request failed: {}", err))
        } else {
            UploadError::permanent(format!("request failed: {}", err))
        }
    }

    pub(crate) fn is_transient_status(status: StatusCode) -> bool {
        status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
    }

    /// A presigned PUT answered 403 carries an expired or revoked signature
    pub(crate) fn part_status_error(status: StatusCode, message: String) -> UploadError {
        if status == StatusCode::FORBIDDEN {
            UploadError::url_rejected(message)
        } else if is_transient_status(status) {
            UploadError::transient(message)
        } else {
            UploadError::permanent(message)
        }
    }

    #[async_trait]
    impl PartTransport for HttpPartTransport {
        async fn put_part(&self, url: &str, body: Bytes) -> UploadResult<Option<String>> {
            let mut request = self
                .client
                .put(url)
                .header(header::CONTENT_LENGTH, body.len())
                .body(body);
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            let response = request.send().await.map_err(request_error)?;
            let status = response.status();

            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                let message = format!("part upload rejected with {}: {}", status, detail.trim());
                return Err(part_status_error(status, message));
            }

            Ok(response
                .headers()
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string))
        }
    }
}

#[cfg(feature = "http-client")]
pub(crate) use http::{is_transient_status, request_error};

#[cfg(all(test, feature = "http-client"))]
mod tests {
    use reqwest::StatusCode;

    use super::http::part_status_error;

    #[test]
    fn forbidden_put_asks_for_a_fresh_url() {
        let err = part_status_error(StatusCode::FORBIDDEN, "Request has expired".into());
        assert!(err.is_url_rejected());

        assert!(part_status_error(StatusCode::SERVICE_UNAVAILABLE, "slow down".into()).is_retryable());

        let err = part_status_error(StatusCode::BAD_REQUEST, "EntityTooSmall".into());
        assert!(!err.is_retryable());
        assert!(!err.is_url_rejected());
    }
}
