use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    ActiveUpload, CompletedUpload, InitiateOutcome, InitiateRequest, PartCompletion, PresignedPartUrl, SessionId,
    UploadCoordinator, UploadResult, UploadStatusReport,
};

/// Header carrying the caller's identity on the HTTP routes
pub const OWNER_HEADER: &str = "x-owner-id";

/// Control-plane calls the chunked uploader makes, on behalf of one owner.
#[async_trait]
pub trait UploadControl: Send + Sync {
    async fn initiate(&self, request: InitiateRequest) -> UploadResult<InitiateOutcome>;

    async fn status(&self, session_id: &SessionId, include_urls: bool) -> UploadResult<UploadStatusReport>;

    async fn more_urls(&self, session_id: &SessionId, part_numbers: &[u32]) -> UploadResult<Vec<PresignedPartUrl>>;

    async fn part_complete(&self, session_id: &SessionId, part_number: u32, etag: &str)
        -> UploadResult<PartCompletion>;

    async fn complete(&self, session_id: &SessionId) -> UploadResult<CompletedUpload>;

    async fn abort(&self, session_id: &SessionId) -> UploadResult<()>;

    async fn active(&self) -> UploadResult<Vec<ActiveUpload>>;

    async fn sync(&self, session_id: &SessionId) -> UploadResult<UploadStatusReport>;
}

/// Calls a coordinator in the same process
#[derive(Clone)]
pub struct LocalControl {
    coordinator: Arc<UploadCoordinator>,
    owner_id: String,
}

impl LocalControl {
    pub fn new<S: Into<String>>(coordinator: Arc<UploadCoordinator>, owner_id: S) -> Self {
        Self {
            coordinator,
            owner_id: owner_id.into(),
        }
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl UploadControl for LocalControl {
    async fn initiate(&self, request: InitiateRequest) -> UploadResult<InitiateOutcome> {
        self.coordinator.initiate(&self.owner_id, request).await
    }

    async fn status(&self, session_id: &SessionId, include_urls: bool) -> UploadResult<UploadStatusReport> {
        self.coordinator
            .get_status(&self.owner_id, session_id, include_urls)
            .await
    }

    async fn more_urls(&self, session_id: &SessionId, part_numbers: &[u32]) -> UploadResult<Vec<PresignedPartUrl>> {
        self.coordinator
            .get_more_urls(&self.owner_id, session_id, part_numbers)
            .await
    }

    async fn part_complete(
        &self,
        session_id: &SessionId,
        part_number: u32,
        etag: &str,
    ) -> UploadResult<PartCompletion> {
        self.coordinator
            .mark_part_completed(&self.owner_id, session_id, part_number, etag)
            .await
    }

    async fn complete(&self, session_id: &SessionId) -> UploadResult<CompletedUpload> {
        self.coordinator.complete_upload(&self.owner_id, session_id).await
    }

    async fn abort(&self, session_id: &SessionId) -> UploadResult<()> {
        self.coordinator.abort_upload(&self.owner_id, session_id).await
    }

    async fn active(&self) -> UploadResult<Vec<ActiveUpload>> {
        self.coordinator.list_active(&self.owner_id).await
    }

    async fn sync(&self, session_id: &SessionId) -> UploadResult<UploadStatusReport> {
        self.coordinator.sync_with_store(&self.owner_id, session_id).await
    }
}

#[cfg(feature = "http-client")]
pub use http::HttpControl;

#[cfg(feature = "http-client")]
mod http {
    use async_trait::async_trait;
    use reqwest::{Client, Method, RequestBuilder, Response};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Serialize};

    use super::{UploadControl, OWNER_HEADER};
    use crate::uploader::transport::{is_transient_status, request_error};
    use crate::{
        ActiveUpload, CompletedUpload, InitiateOutcome, InitiateRequest, MoreUrlsRequest, MoreUrlsResponse,
        PartCompleteRequest, PartCompletion, PresignedPartUrl, SessionId, UploadError, UploadResult,
        UploadStatusReport,
    };

    #[derive(Deserialize)]
    struct ErrorBody {
        name: String,
        message: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct StatusQuery {
        include_urls: bool,
    }

    /// Talks to the upload routes over HTTP
    #[derive(Debug, Clone)]
    pub struct HttpControl {
        client: Client,
        base_url: String,
        owner_id: String,
    }

    impl HttpControl {
        /// `base_url` is where the upload routes are mounted, e.g. `http://host/uploads`
        pub fn new<B: Into<String>, O: Into<String>>(base_url: B, owner_id: O) -> Self {
            Self::with_client(Client::new(), base_url, owner_id)
        }

        pub fn with_client<B: Into<String>, O: Into<String>>(client: Client, base_url: B, owner_id: O) -> Self {
            Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                owner_id: owner_id.into(),
            }
        }

        fn request(&self, method: Method, path: &str) -> RequestBuilder {
            self.client
                .request(method, format!("{}{}", self.base_url, path))
                .header(OWNER_HEADER, &self.owner_id)
        }

        async fn send(&self, request: RequestBuilder) -> UploadResult<Response> {
            let response = request.send().await.map_err(request_error)?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let code = status.as_u16();
            match response.json::<ErrorBody>().await {
                Ok(body) => Err(UploadError::from_remote(&body.name, body.message, code)),
                Err(_) if is_transient_status(status) => {
                    Err(UploadError::transient(format!("upload service returned {}", status)))
                }
                Err(_) => Err(UploadError::permanent(format!("upload service returned {}", status))),
            }
        }

        async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> UploadResult<T> {
            self.send(request)
                .await?
                .json::<T>()
                .await
                .map_err(|e| UploadError::permanent(format!("invalid response body: {}", e)))
        }
    }

    #[async_trait]
    impl UploadControl for HttpControl {
        async fn initiate(&self, request: InitiateRequest) -> UploadResult<InitiateOutcome> {
            self.json(self.request(Method::POST, "/initiate").json(&request)).await
        }

        async fn status(&self, session_id: &SessionId, include_urls: bool) -> UploadResult<UploadStatusReport> {
            let path = format!("/{}/status", session_id);
            self.json(self.request(Method::GET, &path).query(&StatusQuery { include_urls }))
                .await
        }

        async fn more_urls(
            &self,
            session_id: &SessionId,
            part_numbers: &[u32],
        ) -> UploadResult<Vec<PresignedPartUrl>> {
            let body = MoreUrlsRequest {
                part_numbers: part_numbers.to_vec(),
            };
            let path = format!("/{}/urls", session_id);
            let response: MoreUrlsResponse = self.json(self.request(Method::POST, &path).json(&body)).await?;
            Ok(response.presigned_urls)
        }

        async fn part_complete(
            &self,
            session_id: &SessionId,
            part_number: u32,
            etag: &str,
        ) -> UploadResult<PartCompletion> {
            let body = PartCompleteRequest { etag: etag.to_string() };
            let path = format!("/{}/parts/{}/complete", session_id, part_number);
            self.json(self.request(Method::POST, &path).json(&body)).await
        }

        async fn complete(&self, session_id: &SessionId) -> UploadResult<CompletedUpload> {
            let path = format!("/{}/complete", session_id);
            self.json(self.request(Method::POST, &path)).await
        }

        async fn abort(&self, session_id: &SessionId) -> UploadResult<()> {
            let path = format!("/{}", session_id);
            self.send(self.request(Method::DELETE, &path)).await?;
            Ok(())
        }

        async fn active(&self) -> UploadResult<Vec<ActiveUpload>> {
            self.json(self.request(Method::GET, "/active")).await
        }

        async fn sync(&self, session_id: &SessionId) -> UploadResult<UploadStatusReport> {
            let path = format!("/{}/sync", session_id);
            self.json(self.request(Method::POST, &path)).await
        }
    }
}
