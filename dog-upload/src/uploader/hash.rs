use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use super::UploadSource;
use crate::UploadResult;

const HASH_BLOCK: u64 = 8 * 1024 * 1024;

/// Base64 SHA-256 of the whole source, read block by block.
pub async fn content_hash(source: &dyn UploadSource) -> UploadResult<String> {
    let mut hasher = Sha256::new();
    let len = source.len();
    let mut offset = 0;

    while offset < len {
        let end = (offset + HASH_BLOCK).min(len);
        let block = source.read_range(offset..end).await?;
        hasher.update(&block);
        offset = end;
    }

    Ok(STANDARD.encode(hasher.finalize()))
}
