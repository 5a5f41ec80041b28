//! Buffer allocation backends and device capability limits

use crate::buffer::{BufferData, BufferHandle, GraphicBuffer};
use crate::format::{PixelFormat, Usage};
use crate::shm::SharedMemory;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Turns a geometry request into backing memory.
///
/// Called by the queue without its lock held, so an implementation may block.
pub trait GraphicBufferAlloc: Send + Sync {
    fn create_graphic_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> Result<BufferHandle>;
}

/// Result of probing the display/GPU limits, injected at queue construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub max_texture_size: u32,
    pub max_viewport_width: u32,
    pub max_viewport_height: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            max_viewport_width: 8192,
            max_viewport_height: 8192,
        }
    }
}

impl DeviceCaps {
    pub fn max_width(&self) -> u32 {
        self.max_texture_size.min(self.max_viewport_width)
    }

    pub fn max_height(&self) -> u32 {
        self.max_texture_size.min(self.max_viewport_height)
    }

    /// Reject dimensions the device cannot sample or render
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if width > self.max_width() || height > self.max_height() {
            return Err(Error::InvalidArgument(format!(
                "{}x{} exceeds device limit {}x{}",
                width,
                height,
                self.max_width(),
                self.max_height()
            )));
        }
        Ok(())
    }
}

/// Allocates process-local buffers on the heap
#[derive(Debug, Default)]
pub struct HeapAllocator {
    next_id: AtomicU64,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphicBufferAlloc for HeapAllocator {
    fn create_graphic_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> Result<BufferHandle> {
        let size = GraphicBuffer::frame_size(width, height, format);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer = GraphicBuffer::new(id, width, height, format, usage, BufferData::Heap(vec![0; size]))?;
        Ok(Arc::new(buffer))
    }
}

/// Allocates each buffer in its own named shared memory region so another
/// process can map it by name
#[derive(Debug)]
pub struct ShmAllocator {
    prefix: String,
    next_id: AtomicU64,
}

impl ShmAllocator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Region name for the buffer with the given id
    pub fn buffer_shm_name(&self, id: u64) -> String {
        format!("{}_buf_{}", self.prefix, id)
    }
}

impl GraphicBufferAlloc for ShmAllocator {
    fn create_graphic_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> Result<BufferHandle> {
        let size = GraphicBuffer::frame_size(width, height, format);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shm = SharedMemory::create(&self.buffer_shm_name(id), size)?;
        tracing::debug!(name = shm.name(), size, "allocated shared buffer");
        let buffer = GraphicBuffer::new(id, width, height, format, usage, BufferData::Shared(shm))?;
        Ok(Arc::new(buffer))
    }
}
