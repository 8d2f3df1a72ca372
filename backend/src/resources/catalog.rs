//! In-memory resource catalog.

use async_trait::async_trait;
use rust_embed::RustEmbed;
use sluice_types::{ResourceContents, ResourceDescriptor};
use std::borrow::Cow;
use tracing::warn;

use super::{encode_contents, ResourceError, ResourceProvider, Result};

/// Sample resources bundled into the binary.
#[derive(RustEmbed)]
#[folder = "assets/catalog/"]
struct CatalogAssets;

/// Bundled entries: (uri, name, description, asset file).
const SAMPLE_ENTRIES: &[(&str, &str, &str, &str)] = &[
    (
        "csv://sample-data",
        "Sample CSV Data",
        "A sample CSV file with test data",
        "sample-data.csv",
    ),
    (
        "image://test-image",
        "Test Image",
        "A sample test image",
        "test-image.png",
    ),
    (
        "csv://employees",
        "Employee Data",
        "Employee information in CSV format",
        "employees.csv",
    ),
    (
        "image://logo",
        "Company Logo",
        "Company logo image",
        "logo.jpg",
    ),
];

struct CatalogEntry {
    descriptor: ResourceDescriptor,
    content: Cow<'static, [u8]>,
}

/// Fixed catalog held in memory. Listing preserves insertion order.
#[derive(Default)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the bundled sample resources.
    pub fn sample() -> Self {
        let mut catalog = Self::new();
        for (uri, name, description, file) in SAMPLE_ENTRIES {
            let Some(asset) = CatalogAssets::get(file) else {
                warn!("Bundled resource {} is missing from the catalog assets", file);
                continue;
            };
            let mime_type = mime_guess::from_path(file).first_or_octet_stream();
            catalog.push(
                ResourceDescriptor {
                    uri: uri.to_string(),
                    name: name.to_string(),
                    description: Some(description.to_string()),
                    mime_type: mime_type.essence_str().to_string(),
                },
                asset.data,
            );
        }
        catalog
    }

    /// Append a resource. When two entries share a URI, reads return the first.
    pub fn with_resource(
        mut self,
        descriptor: ResourceDescriptor,
        content: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        self.push(descriptor, content.into());
        self
    }

    fn push(&mut self, descriptor: ResourceDescriptor, content: Cow<'static, [u8]>) {
        self.entries.push(CatalogEntry {
            descriptor,
            content,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResourceProvider for StaticCatalog {
    async fn list(&self) -> Result<Vec<ResourceDescriptor>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect())
    }

    async fn read(&self, uri: &str) -> Result<ResourceContents> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.descriptor.uri == uri)
            .ok_or_else(|| ResourceError::NotFound(uri.to_string()))?;
        Ok(encode_contents(
            uri,
            &entry.descriptor.mime_type,
            &entry.content,
        ))
    }
}
