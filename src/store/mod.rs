//! Content store and blob sink seams.
//!
//! The driver only ever talks to a [`ContentStore`] and a [`BlobSink`]; the
//! filesystem and in-memory implementations live in the submodules.

pub mod fs;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;

use crate::compression::MediaType;
use crate::errors::StoreError;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Opaque identifier of an item in a content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentRef(pub String);

impl ContentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobContainer(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub id: ContentRef,
    pub name: String,
    pub mime_type: String,
    pub public_url: String,
    pub blob: BlobHandle,
    pub container: BlobContainer,
}

impl ImageAsset {
    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime(&self.mime_type)
    }

    /// Extension of the asset name without the leading dot, empty if none.
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// A clone of an image that may be given a new binary payload and saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableImage {
    asset: ImageAsset,
}

impl WritableImage {
    pub fn new(asset: ImageAsset) -> Self {
        Self { asset }
    }

    pub fn asset(&self) -> &ImageAsset {
        &self.asset
    }

    pub fn container(&self) -> &BlobContainer {
        &self.asset.container
    }

    pub fn set_binary_data(&mut self, blob: BlobHandle) {
        self.asset.blob = blob;
    }

    pub fn into_asset(self) -> ImageAsset {
        self.asset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// No access rights are checked for the save.
    NoAccess,
}

pub trait ContentStore: Send + Sync {
    /// Every item below `root`, in whatever order the store keeps them.
    fn descendants(&self, root: &ContentRef) -> Result<Vec<ContentRef>, StoreError>;

    /// `Ok(None)` when the item exists but is not an image.
    fn try_load_image(&self, reference: &ContentRef) -> Result<Option<ImageAsset>, StoreError>;

    fn read_content(&self, asset: &ImageAsset) -> Result<Vec<u8>, StoreError>;

    /// `None` when the store cannot hand out a writable image for `asset`.
    fn writable_clone(&self, asset: &ImageAsset) -> Option<WritableImage>;

    fn save(&self, image: WritableImage, action: SaveAction, access: AccessLevel) -> Result<(), StoreError>;
}

pub trait BlobSink: Send + Sync {
    fn create_blob(&self, container: &BlobContainer, extension: &str) -> Result<BlobHandle, StoreError>;

    /// Opens a writer that replaces the blob's whole content.
    fn open_write<'a>(&'a self, handle: &BlobHandle) -> Result<Box<dyn Write + 'a>, StoreError>;

    /// Drops a blob that will never be attached to an item.
    fn discard(&self, handle: &BlobHandle) -> Result<(), StoreError>;
}

pub(crate) fn blob_file_name(extension: &str) -> String {
    let id = uuid::Uuid::new_v4();
    if extension.is_empty() {
        id.to_string()
    } else {
        format!("{}.{}", id, extension)
    }
}
