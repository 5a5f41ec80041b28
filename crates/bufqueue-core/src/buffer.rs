//! Graphic buffer handle and storage

use crate::format::{PixelFormat, Usage};
use crate::guard::BufferGuard;
use crate::shm::SharedMemory;
use crate::storage::{AccessMode, StorageType};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared ownership of a graphic buffer between the queue and its clients
pub type BufferHandle = Arc<GraphicBuffer>;

/// Pixel memory behind a graphic buffer
pub enum BufferData {
    Heap(Vec<u8>),
    Shared(SharedMemory),
}

impl BufferData {
    pub fn storage_type(&self) -> StorageType {
        match self {
            BufferData::Heap(_) => StorageType::Heap,
            BufferData::Shared(_) => StorageType::Shared,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            BufferData::Heap(bytes) => bytes.len(),
            BufferData::Shared(shm) => shm.size(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            BufferData::Heap(bytes) => bytes,
            BufferData::Shared(shm) => shm.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            BufferData::Heap(bytes) => bytes,
            BufferData::Shared(shm) => shm.as_mut_slice(),
        }
    }
}

/// An allocated graphic buffer.
///
/// Geometry is fixed at allocation. The generation number is stamped by the
/// queue that allocated (or will accept) the buffer and can be changed so a
/// detached buffer may be attached to a queue with a newer generation.
pub struct GraphicBuffer {
    id: u64,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    usage: Usage,
    generation: AtomicU32,
    data: Mutex<BufferData>,
}

impl GraphicBuffer {
    /// Wrap already-allocated pixel memory; `data` must hold a full frame
    pub fn new(
        id: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
        data: BufferData,
    ) -> Result<Self> {
        let required = Self::frame_size(width, height, format);
        if data.size() < required {
            return Err(Error::InvalidArgument(format!(
                "buffer storage holds {} bytes, {}x{} {:?} needs {}",
                data.size(),
                width,
                height,
                format,
                required
            )));
        }
        Ok(Self {
            id,
            width,
            height,
            stride: width,
            format,
            usage,
            generation: AtomicU32::new(0),
            data: Mutex::new(data),
        })
    }

    /// Bytes needed for a tightly packed frame
    pub fn frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Stride in pixels
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn generation_number(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn set_generation_number(&self, generation: u32) {
        self.generation.store(generation, Ordering::Release);
    }

    pub fn storage_type(&self) -> StorageType {
        self.data.lock().storage_type()
    }

    /// Name of the backing shared memory region, if any
    pub fn shm_name(&self) -> Option<String> {
        match &*self.data.lock() {
            BufferData::Shared(shm) => Some(shm.name().to_string()),
            BufferData::Heap(_) => None,
        }
    }

    /// Whether this buffer cannot satisfy a request for the given geometry
    pub fn needs_reallocation(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> bool {
        self.width != width
            || self.height != height
            || self.format != format
            || !self.usage.contains(usage)
    }

    /// Map the pixels for CPU access, blocking while another mapping is live
    pub fn lock(&self, mode: AccessMode) -> BufferGuard<'_> {
        BufferGuard::new(self.data.lock(), mode)
    }

    /// Map the pixels for CPU access without blocking
    pub fn try_lock(&self, mode: AccessMode) -> Option<BufferGuard<'_>> {
        self.data.try_lock().map(|data| BufferGuard::new(data, mode))
    }
}

impl std::fmt::Debug for GraphicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("usage", &self.usage)
            .field("generation", &self.generation_number())
            .finish()
    }
}
