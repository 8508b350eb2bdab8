use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

/// Prefix for files written by the receiving side.
pub const OUTPUT_PREFIX: &str = "received_";

/// Maps file identifiers to files under one directory.
///
/// The holder resolves requested identifiers against it; the requester
/// writes reassembled output into it.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!("File storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map an identifier to a path inside the storage directory.
    ///
    /// Absolute identifiers and identifiers that climb out of the directory
    /// resolve to nothing.
    pub fn resolve(&self, identifier: &str) -> Option<PathBuf> {
        let relative = Path::new(identifier);
        let mut path = self.dir.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (depth > 0).then_some(path)
    }

    /// Read the whole source for `identifier`, or `None` if there is no such file.
    pub async fn read_source(&self, identifier: &str) -> io::Result<Option<Bytes>> {
        let Some(path) = self.resolve(identifier) else {
            debug!("Identifier {:?} does not name a path inside the storage directory", identifier);
            return Ok(None);
        };

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let data = fs::read(&path).await?;
        Ok(Some(Bytes::from(data)))
    }

    /// Path the reassembled copy of `identifier` is written to:
    /// `received_` + the identifier's file name.
    pub fn output_path(&self, identifier: &str) -> PathBuf {
        let name = Path::new(identifier)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());
        self.dir.join(format!("{}{}", OUTPUT_PREFIX, name))
    }

    /// Write (or overwrite) the output for `identifier`. Returns its path.
    pub async fn write_output(&self, identifier: &str, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.output_path(identifier);
        fs::write(&path, data).await?;
        Ok(path)
    }
}
