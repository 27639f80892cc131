use std::env;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};

use crate::store::{CompletedObject, CompletedPart, MultipartBlobStore, PartsPage, RemotePart};
use crate::{normalize_etag, StoreError, StoreResult, UploadError, UploadResult};

const NO_SUCH_UPLOAD: &str = "NoSuchUpload";

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint (MinIO, RustFS, R2). `None` means AWS.
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new<S: Into<String>>(region: S) -> Self {
        Self {
            region: region.into(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }

    /// Reads `S3_REGION`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`,
    /// `S3_ENDPOINT_URL` and `S3_FORCE_PATH_STYLE`.
    pub fn from_env() -> UploadResult<Self> {
        let region = env::var("S3_REGION")
            .map_err(|_| UploadError::bad_request("S3_REGION environment variable required"))?;

        let force_path_style = match env::var("S3_FORCE_PATH_STYLE") {
            Ok(value) => value
                .parse::<bool>()
                .map_err(|_| UploadError::bad_request("S3_FORCE_PATH_STYLE must be true or false"))?,
            Err(_) => false,
        };

        Ok(Self {
            region,
            access_key_id: env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
            endpoint_url: env::var("S3_ENDPOINT_URL").ok(),
            force_path_style,
        })
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(mut self, access_key_id: A, secret: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret.into());
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_path_style(mut self, force: bool) -> Self {
        self.force_path_style = force;
        self
    }
}

/// [`MultipartBlobStore`] backed by the AWS SDK
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> Self {
        Self {
            client: Self::create_client(config).await,
        }
    }

    pub async fn from_env() -> UploadResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn create_client(config: S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region));

        // Explicit keys win over the default provider chain
        if let (Some(key), Some(secret)) = (config.access_key_id, config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "dog-upload"));
        }
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let aws_config = loader.load().await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }

    fn map_aws_error(err: impl std::error::Error + Send + Sync + 'static) -> StoreError {
        StoreError::backend(err)
    }

    fn is_no_such_upload(err: &impl ProvideErrorMetadata) -> bool {
        err.code() == Some(NO_SUCH_UPLOAD)
    }
}

fn part_number_i32(part_number: u32) -> StoreResult<i32> {
    i32::try_from(part_number)
        .map_err(|_| StoreError::invalid_response(format!("part number {} out of range", part_number)))
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl MultipartBlobStore for S3CompatibleStore {
    async fn open_multipart_upload(&self, bucket: &str, key: &str, content_type: &str) -> StoreResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(Self::map_aws_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::invalid_response("CreateMultipartUpload returned no UploadId"))
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(Self::map_aws_error)?;

        let request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number_i32(part_number)?)
            .presigned(presigning)
            .await
            .map_err(Self::map_aws_error)?;

        Ok(request.uri().to_string())
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        page_token: Option<&str>,
    ) -> StoreResult<PartsPage> {
        let result = self
            .client
            .list_parts()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .set_part_number_marker(page_token.map(str::to_string))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) if Self::is_no_such_upload(&err) => return Err(StoreError::upload_gone(upload_id)),
            Err(err) => return Err(Self::map_aws_error(err)),
        };

        let mut parts = Vec::with_capacity(output.parts().len());
        for part in output.parts() {
            let (Some(number), Some(etag)) = (part.part_number(), part.e_tag()) else {
                tracing::warn!(upload_id, "skipping listed part without number or etag");
                continue;
            };
            let Ok(part_number) = u32::try_from(number) else {
                continue;
            };
            parts.push(RemotePart {
                part_number,
                etag: normalize_etag(etag),
                size: part.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                modified_at: part.last_modified().and_then(to_chrono),
            });
        }

        Ok(PartsPage {
            parts,
            more: output.is_truncated().unwrap_or(false),
            next_page_token: output.next_part_number_marker().map(str::to_string),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<CompletedObject> {
        let mut sorted = parts.to_vec();
        sorted.sort_by_key(|p| p.part_number);

        let mut completed = Vec::with_capacity(sorted.len());
        for part in sorted {
            completed.push(
                S3CompletedPart::builder()
                    .part_number(part_number_i32(part.part_number)?)
                    .e_tag(part.etag)
                    .build(),
            );
        }

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build())
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) if Self::is_no_such_upload(&err) => return Err(StoreError::upload_gone(upload_id)),
            Err(err) => return Err(Self::map_aws_error(err)),
        };

        Ok(CompletedObject {
            etag: output.e_tag().map(normalize_etag),
            location: output.location().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if Self::is_no_such_upload(&err) => {
                tracing::debug!(upload_id, "multipart upload already gone");
                Ok(())
            }
            Err(err) => Err(Self::map_aws_error(err)),
        }
    }
}
