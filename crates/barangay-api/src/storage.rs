use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// On-disk store for uploaded ID images.
///
/// Files are content-addressed: `{dir}/{sha256}.{ext}`. Uploading the same
/// image twice yields the same name and a single file.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path for a stored name. Names are only ever produced by `save`, but
    /// they round-trip through the database, so anything that isn't
    /// `<hex>.<ext>` is refused.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        let valid = match name.split_once('.') {
            Some((hash, ext)) => {
                hash.len() == 64
                    && hash.chars().all(|c| c.is_ascii_hexdigit())
                    && !ext.is_empty()
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            }
            None => false,
        };
        if !valid {
            bail!("invalid stored file name '{}'", name);
        }
        Ok(self.dir.join(name))
    }

    /// Write `data` and return its stored name.
    pub async fn save(&self, data: &[u8], ext: &str) -> Result<String> {
        let hash = hex::encode(Sha256::digest(data));
        let name = format!("{}.{}", hash, ext);
        let path = self.file_path(&name)?;

        if fs::try_exists(&path).await? {
            debug!("Upload {} already stored", name);
            return Ok(name);
        }

        // The final name only ever holds a complete file. Each writer gets its
        // own temp file; concurrent saves of the same bytes both rename into place.
        let tmp = self.dir.join(format!("{}.{}.partial", hash, Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        fs::rename(&tmp, &path).await?;

        info!("Stored upload {} ({} bytes)", name, data.len());
        Ok(name)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.file_path(name)?;
        Ok(fs::read(&path).await?)
    }
}
