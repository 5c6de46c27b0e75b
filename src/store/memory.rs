use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    blob_file_name, AccessLevel, BlobContainer, BlobHandle, BlobSink, ContentRef, ContentStore, ImageAsset,
    SaveAction, WritableImage,
};
use crate::errors::StoreError;

type BlobMap = Arc<Mutex<HashMap<BlobHandle, Vec<u8>>>>;

#[derive(Debug, Clone)]
enum MemoryItem {
    Image { asset: ImageAsset, writable: bool },
    Other,
}

#[derive(Debug, Default)]
struct MemoryState {
    order: Vec<ContentRef>,
    items: HashMap<ContentRef, MemoryItem>,
}

/// In-process content store and blob sink. Keeps call counters so callers can
/// verify exactly which store operations a run performed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    blobs: BlobMap,
    enumerations: AtomicUsize,
    loads: AtomicUsize,
    reads: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&self, name: &str, mime_type: &str, content: Vec<u8>) -> ContentRef {
        self.insert_image_item(name, mime_type, content, true)
    }

    /// An image whose writable clone is not available.
    pub fn insert_read_only_image(&self, name: &str, mime_type: &str, content: Vec<u8>) -> ContentRef {
        self.insert_image_item(name, mime_type, content, false)
    }

    /// A non-image item, such as a folder or a document.
    pub fn insert_other(&self, name: &str) -> ContentRef {
        let id = ContentRef::new(name);
        let mut state = lock(&self.state);
        state.order.push(id.clone());
        state.items.insert(id.clone(), MemoryItem::Other);
        id
    }

    fn insert_image_item(&self, name: &str, mime_type: &str, content: Vec<u8>, writable: bool) -> ContentRef {
        let id = ContentRef::new(name);
        let container = BlobContainer(name.to_string());
        let blob = BlobHandle(format!("{}/original", name));
        lock(&self.blobs).insert(blob.clone(), content);

        let asset = ImageAsset {
            id: id.clone(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            public_url: format!("memory://{}", name),
            blob,
            container,
        };

        let mut state = lock(&self.state);
        state.order.push(id.clone());
        state.items.insert(id.clone(), MemoryItem::Image { asset, writable });
        id
    }

    /// Current payload of an image item.
    pub fn content(&self, id: &ContentRef) -> Option<Vec<u8>> {
        let blob = match lock(&self.state).items.get(id) {
            Some(MemoryItem::Image { asset, .. }) => asset.blob.clone(),
            _ => return None,
        };
        lock(&self.blobs).get(&blob).cloned()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of blobs held, attached or not.
    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ContentStore for MemoryStore {
    fn descendants(&self, root: &ContentRef) -> Result<Vec<ContentRef>, StoreError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        Ok(state
            .order
            .iter()
            .filter(|id| id.as_str().starts_with(root.as_str()))
            .cloned()
            .collect())
    }

    fn try_load_image(&self, reference: &ContentRef) -> Result<Option<ImageAsset>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match lock(&self.state).items.get(reference) {
            Some(MemoryItem::Image { asset, .. }) => Ok(Some(asset.clone())),
            Some(MemoryItem::Other) => Ok(None),
            None => Err(StoreError::NotFound(reference.to_string())),
        }
    }

    fn read_content(&self, asset: &ImageAsset) -> Result<Vec<u8>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.blobs)
            .get(&asset.blob)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(asset.blob.0.clone()))
    }

    fn writable_clone(&self, asset: &ImageAsset) -> Option<WritableImage> {
        match lock(&self.state).items.get(&asset.id) {
            Some(MemoryItem::Image { writable: true, .. }) => Some(WritableImage::new(asset.clone())),
            _ => None,
        }
    }

    fn save(&self, image: WritableImage, _action: SaveAction, _access: AccessLevel) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("save rejected for {}", image.asset().id)));
        }
        if !lock(&self.blobs).contains_key(&image.asset().blob) {
            return Err(StoreError::NotFound(image.asset().blob.0.clone()));
        }

        let asset = image.into_asset();
        let mut state = lock(&self.state);
        match state.items.get_mut(&asset.id) {
            Some(MemoryItem::Image { asset: stored, .. }) => {
                *stored = asset;
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(StoreError::NotFound(asset.id.to_string())),
        }
    }
}

impl BlobSink for MemoryStore {
    fn create_blob(&self, container: &BlobContainer, extension: &str) -> Result<BlobHandle, StoreError> {
        let handle = BlobHandle(format!("{}/{}", container.0, blob_file_name(extension)));
        lock(&self.blobs).insert(handle.clone(), Vec::new());
        Ok(handle)
    }

    fn open_write<'a>(&'a self, handle: &BlobHandle) -> Result<Box<dyn Write + 'a>, StoreError> {
        if !lock(&self.blobs).contains_key(handle) {
            return Err(StoreError::NotFound(handle.0.clone()));
        }
        Ok(Box::new(MemoryBlobWriter {
            blobs: Arc::clone(&self.blobs),
            handle: handle.clone(),
            buf: Vec::new(),
        }))
    }

    fn discard(&self, handle: &BlobHandle) -> Result<(), StoreError> {
        lock(&self.blobs).remove(handle);
        Ok(())
    }
}

struct MemoryBlobWriter {
    blobs: BlobMap,
    handle: BlobHandle,
    buf: Vec<u8>,
}

impl Write for MemoryBlobWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.blobs).insert(self.handle.clone(), self.buf.clone());
        Ok(())
    }
}

impl Drop for MemoryBlobWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
