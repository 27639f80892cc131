use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{UploadError, UploadResult};

/// Random-access bytes to upload
#[async_trait]
pub trait UploadSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &str;

    fn mime_type(&self) -> &str;

    /// Exactly the bytes in `range`
    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes>;
}

/// A file on local disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    mime_type: String,
    len: u64,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>, M: Into<String>>(path: P, mime_type: M) -> UploadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(UploadError::bad_request(format!("{} is not a file", path.display())));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        Ok(Self {
            path,
            name,
            mime_type: mime_type.into(),
            len: metadata.len(),
        })
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes> {
        check_range(&range, self.len)?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Bytes already in memory
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    name: String,
    mime_type: String,
}

impl BytesSource {
    pub fn new<D: Into<Bytes>, N: Into<String>, M: Into<String>>(data: D, name: N, mime_type: M) -> Self {
        Self {
            data: data.into(),
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes> {
        check_range(&range, self.len())?;
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

fn check_range(range: &Range<u64>, len: u64) -> UploadResult<()> {
    if range.start > range.end || range.end > len {
        return Err(UploadError::bad_request(format!(
            "byte range {}..{} is outside a {} byte source",
            range.start, range.end, len
        )));
    }
    Ok(())
}
