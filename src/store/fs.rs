use log::debug;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    blob_file_name, AccessLevel, BlobContainer, BlobHandle, BlobSink, ContentRef, ContentStore, ImageAsset,
    SaveAction, WritableImage,
};
use crate::errors::StoreError;

/// Staging area for new blobs, relative to the store root.
pub const BLOB_STAGING_DIR: &str = ".optimizer-blobs";

/// Content store over a directory tree. Item ids are `/`-separated paths
/// relative to the root; hidden files and directories are not content.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, id: &ContentRef) -> PathBuf {
        id.as_str()
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn blob_path(&self, handle: &BlobHandle) -> PathBuf {
        handle
            .0
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.join(BLOB_STAGING_DIR), |path, part| path.join(part))
    }

    /// Public URL of an item, each path segment percent-encoded.
    fn public_url(&self, id: &ContentRef) -> String {
        let segments = id.as_str().split('/').filter(|part| !part.is_empty());
        let Ok(mut url) = reqwest::Url::parse(&self.public_base_url) else {
            return format!("{}/{}", self.public_base_url.trim_end_matches('/'), id.as_str());
        };
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    fn relative_id(&self, path: &Path) -> Option<ContentRef> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(ContentRef::new(parts.join("/")))
    }
}

/// MIME type for a file extension, `None` for files that are not images.
pub fn image_mime_for_extension(extension: &str) -> Option<String> {
    let mime = match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "bmp" => mime::IMAGE_BMP.to_string(),
        "svg" => mime::IMAGE_SVG.to_string(),
        "webp" => "image/webp".to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        _ => return None,
    };
    Some(mime)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

impl ContentStore for FsStore {
    fn descendants(&self, root: &ContentRef) -> Result<Vec<ContentRef>, StoreError> {
        let start = self.content_path(root);
        if !start.is_dir() {
            return Err(StoreError::NotFound(start.display().to_string()));
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&start)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = entry.map_err(|e| StoreError::Backend(format!("walk failed: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(id) = self.relative_id(entry.path()) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    fn try_load_image(&self, reference: &ContentRef) -> Result<Option<ImageAsset>, StoreError> {
        let path = self.content_path(reference);
        if !path.is_file() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(mime_type) = image_mime_for_extension(&extension) else {
            return Ok(None);
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let container = reference
            .as_str()
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        Ok(Some(ImageAsset {
            id: reference.clone(),
            name,
            mime_type,
            public_url: self.public_url(reference),
            blob: BlobHandle(String::new()),
            container: BlobContainer(container),
        }))
    }

    fn read_content(&self, asset: &ImageAsset) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.content_path(&asset.id))?)
    }

    fn writable_clone(&self, asset: &ImageAsset) -> Option<WritableImage> {
        Some(WritableImage::new(asset.clone()))
    }

    fn save(&self, image: WritableImage, action: SaveAction, access: AccessLevel) -> Result<(), StoreError> {
        let asset = image.into_asset();
        if asset.blob.0.is_empty() {
            return Err(StoreError::Backend(format!("{} has no staged blob", asset.id)));
        }

        let staged = self.blob_path(&asset.blob);
        let target = self.content_path(&asset.id);
        if let Ok(metadata) = fs::metadata(&target) {
            fs::set_permissions(&staged, metadata.permissions())?;
        }
        if fs::rename(&staged, &target).is_err() {
            // Different filesystems: fall back to copy + remove.
            let copied = fs::copy(&staged, &target);
            let removed = fs::remove_file(&staged);
            copied?;
            removed?;
        }

        debug!("Saved {} ({:?}, {:?})", asset.id, action, access);
        Ok(())
    }
}

impl BlobSink for FsStore {
    fn create_blob(&self, container: &BlobContainer, extension: &str) -> Result<BlobHandle, StoreError> {
        let handle = if container.0.is_empty() {
            BlobHandle(blob_file_name(extension))
        } else {
            BlobHandle(format!("{}/{}", container.0, blob_file_name(extension)))
        };

        let path = self.blob_path(&handle);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&path)?;
        Ok(handle)
    }

    fn open_write<'a>(&'a self, handle: &BlobHandle) -> Result<Box<dyn Write + 'a>, StoreError> {
        let path = self.blob_path(handle);
        if !path.is_file() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let file = fs::File::create(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn discard(&self, handle: &BlobHandle) -> Result<(), StoreError> {
        match fs::remove_file(self.blob_path(handle)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
