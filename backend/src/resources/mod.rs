//! Resource providers.
//!
//! The dispatcher only sees the [`ResourceProvider`] trait; the server ships
//! an embedded sample catalog and a provider backed by a directory on disk.

mod catalog;
mod directory;

pub use catalog::StaticCatalog;
pub use directory::DirectoryProvider;

use async_trait::async_trait;
use base64::Engine;
use sluice_types::{ResourceContents, ResourceDescriptor};

/// Error type for resource operations.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Source of the resource catalog and resource content.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// List all resources, in catalog order.
    async fn list(&self) -> Result<Vec<ResourceDescriptor>>;

    /// Read one resource by URI.
    async fn read(&self, uri: &str) -> Result<ResourceContents>;
}

/// Build resource contents, as text when the mime type is textual and the
/// bytes are valid UTF-8, otherwise as a base64 blob.
pub(crate) fn encode_contents(uri: &str, mime_type: &str, bytes: &[u8]) -> ResourceContents {
    if is_textual(mime_type) {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return ResourceContents::text(uri, mime_type, text);
        }
    }
    let blob = base64::engine::general_purpose::STANDARD.encode(bytes);
    ResourceContents::blob(uri, mime_type, blob)
}

fn is_textual(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || matches!(
            mime_type,
            "application/json" | "application/xml" | "application/javascript" | "image/svg+xml"
        )
}
