//! Streaming SHA-256 content fingerprints.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::utils::fs::io_error;
use crate::Result;

/// Read buffer size; the whole file is never held in memory.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hash everything `reader` yields until EOF, returning lowercase hex.
pub async fn hash_reader<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash the file at `path`.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_error("opening for hashing", path, e))?;
    hash_reader(&mut file)
        .await
        .map_err(|e| io_error("hashing", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_digest() {
        let mut input: &[u8] = b"abc";
        let digest = hash_reader(&mut input).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn file_larger_than_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..HASH_CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let streamed = hash_file(&path).await.unwrap();
        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(streamed, expected);
        assert_eq!(streamed.len(), 64);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, crate::Error::IoPath { .. }));
    }
}
