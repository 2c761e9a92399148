use anyhow::{Result, bail};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// On-disk blob store.
///
/// Object keys are caller-chosen names used verbatim as the logical key, so
/// the file on disk is named after the SHA-256 of the key instead of the key
/// itself. Writing an existing key replaces its bytes.
pub struct Storage {
    dir: PathBuf,
    /// Distinguishes temp files of concurrent uploads to the same key.
    next_tmp: AtomicU64,
}

/// What was stored for an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            next_tmp: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used on disk for an object key.
    pub fn file_name(object_key: &str) -> String {
        hex::encode(Sha256::digest(object_key.as_bytes()))
    }

    fn object_path(&self, object_key: &str) -> PathBuf {
        self.dir.join(Self::file_name(object_key))
    }

    /// Store `data` under `object_key`, replacing any previous bytes.
    /// The write lands in a temp file first and is renamed into place, so a
    /// reader never sees a half-written object.
    pub async fn put_object(&self, object_key: &str, data: &Bytes) -> Result<StoredObject> {
        if object_key.is_empty() {
            bail!("Object key must not be empty");
        }

        let file_name = Self::file_name(object_key);
        let final_path = self.dir.join(&file_name);
        let tmp_id = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.dir.join(format!("{}.{}.partial", file_name, tmp_id));

        if let Err(e) = write_then_rename(&tmp_path, &final_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        let sha256 = hex::encode(Sha256::digest(data));
        debug!("Stored object '{}' ({} bytes) as {}", object_key, data.len(), file_name);

        Ok(StoredObject {
            file_name,
            size: data.len() as u64,
            sha256,
        })
    }

    /// Open an object for streaming reads. `None` when it does not exist.
    pub async fn open_object(&self, object_key: &str) -> Result<Option<fs::File>> {
        match fs::File::open(self.object_path(object_key)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read an object fully into memory. `None` when it does not exist.
    pub async fn read_object(&self, object_key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.object_path(object_key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, object_key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.object_path(object_key)).await?)
    }
}

async fn write_then_rename(tmp_path: &Path, final_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(tmp_path, final_path).await?;
    Ok(())
}
