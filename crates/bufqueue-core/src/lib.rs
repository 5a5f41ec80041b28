//! bufqueue - Producer/consumer graphics buffer queue

pub mod allocator;
pub mod buffer;
pub mod config;
pub mod consumer;
pub mod core;
pub mod error;
pub mod fence;
pub mod format;
pub mod guard;
pub mod item;
pub mod listener;
pub mod producer;
pub mod queue;
pub mod sequencer;
pub mod shm;
pub mod slot;
pub mod storage;

pub use allocator::{DeviceCaps, GraphicBufferAlloc, HeapAllocator, ShmAllocator};
pub use buffer::{BufferHandle, GraphicBuffer};
pub use config::QueueConfig;
pub use consumer::{BufferQueueConsumer, GraphicBufferConsumer};
pub use error::{Error, Result};
pub use fence::Fence;
pub use format::{PixelFormat, Usage};
pub use guard::BufferGuard;
pub use item::{
    AcquireOutcome, AttachBufferOutput, BufferItem, DequeueBufferOutput, DequeueFlags, FrameInfo,
    NativeHandle, QueryKind, QueueBufferInput, QueueBufferOutput, Rect, ScalingMode,
    SidebandStream,
};
pub use listener::{Api, ConsumerListener, ProducerListener, ProxyConsumerListener};
pub use producer::{BufferQueueProducer, GraphicBufferProducer};
pub use queue::BufferQueue;
pub use slot::{BufferState, MAX_MAX_ACQUIRED_BUFFERS, NUM_BUFFER_SLOTS};
pub use storage::{AccessMode, StorageType};
