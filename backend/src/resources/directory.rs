//! Resources served from a directory on disk.

use async_trait::async_trait;
use sluice_types::{ResourceContents, ResourceDescriptor};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{encode_contents, ResourceError, ResourceProvider, Result};

const URI_PREFIX: &str = "file:///";

/// Serves the regular files directly inside `root` as `file:///<name>`.
///
/// Subdirectories and hidden files are not listed. Names are sorted so the
/// listing order is stable.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Create a provider for an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ResourceError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("resource directory {} does not exist", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URI to a file name, rejecting anything that could leave `root`.
    fn file_name<'a>(&self, uri: &'a str) -> Option<&'a str> {
        let name = uri.strip_prefix(URI_PREFIX)?;
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && name != "..";
        valid.then_some(name)
    }
}

fn mime_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[async_trait]
impl ResourceProvider for DirectoryProvider {
    async fn list(&self) -> Result<Vec<ResourceDescriptor>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                debug!("Skipping non UTF-8 file name in {}", self.root.display());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            files.push((name, metadata.len()));
        }
        files.sort();

        Ok(files
            .into_iter()
            .map(|(name, size)| ResourceDescriptor {
                uri: format!("{URI_PREFIX}{name}"),
                description: Some(format!("File {} ({} bytes)", name, size)),
                mime_type: mime_for(&name),
                name,
            })
            .collect())
    }

    async fn read(&self, uri: &str) -> Result<ResourceContents> {
        let name = self
            .file_name(uri)
            .ok_or_else(|| ResourceError::NotFound(uri.to_string()))?;
        let path = self.root.join(name);

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(ResourceError::NotFound(uri.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ResourceError::NotFound(uri.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let bytes = tokio::fs::read(&path).await?;
        Ok(encode_contents(uri, &mime_for(name), &bytes))
    }
}
