//! Buffer queue construction

use crate::allocator::{DeviceCaps, GraphicBufferAlloc, HeapAllocator, ShmAllocator};
use crate::config::QueueConfig;
use crate::consumer::BufferQueueConsumer;
use crate::core::BufferQueueCore;
use crate::producer::BufferQueueProducer;
use crate::Result;
use std::sync::Arc;

/// Entry point tying a producer and a consumer session to one shared core
pub struct BufferQueue;

impl BufferQueue {
    /// Create a queue with default configuration backed by heap buffers
    pub fn create_buffer_queue() -> (BufferQueueProducer, BufferQueueConsumer) {
        let core = BufferQueueCore::new_unchecked(
            &QueueConfig::default(),
            DeviceCaps::default(),
            Arc::new(HeapAllocator::new()),
        );
        Self::sessions(Arc::new(core))
    }

    /// Create a queue with the given configuration, limits and allocator
    pub fn create_with_config(
        config: &QueueConfig,
        caps: DeviceCaps,
        allocator: Arc<dyn GraphicBufferAlloc>,
    ) -> Result<(BufferQueueProducer, BufferQueueConsumer)> {
        let core = BufferQueueCore::new(config, caps, allocator)?;
        Ok(Self::sessions(Arc::new(core)))
    }

    /// Create a queue whose buffers live in named shared memory regions
    /// `{prefix}_buf_{id}`
    pub fn create_shared(
        prefix: &str,
        config: &QueueConfig,
    ) -> Result<(BufferQueueProducer, BufferQueueConsumer)> {
        Self::create_with_config(config, DeviceCaps::default(), Arc::new(ShmAllocator::new(prefix)))
    }

    fn sessions(core: Arc<BufferQueueCore>) -> (BufferQueueProducer, BufferQueueConsumer) {
        (
            BufferQueueProducer::new(core.clone()),
            BufferQueueConsumer::new(core),
        )
    }
}
