//! Buffer slot: one lifecycle cell of the queue

use crate::buffer::BufferHandle;
use crate::fence::Fence;

/// Hard upper bound on the number of slots in one queue
pub const NUM_BUFFER_SLOTS: usize = 64;

/// At least two slots stay available to the producer
pub const MAX_MAX_ACQUIRED_BUFFERS: usize = NUM_BUFFER_SLOTS - 2;

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    /// Owned by the queue; may be dequeued
    #[default]
    Free,
    /// Owned by the producer
    Dequeued,
    /// Waiting in the FIFO for the consumer
    Queued,
    /// Owned by the consumer
    Acquired,
}

impl BufferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferState::Free => "FREE",
            BufferState::Dequeued => "DEQUEUED",
            BufferState::Queued => "QUEUED",
            BufferState::Acquired => "ACQUIRED",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BufferSlot {
    pub buffer: Option<BufferHandle>,
    pub state: BufferState,
    /// Signals when the previous owner is done with the buffer
    pub fence: Fence,
    /// Frame number of the last queue into this slot, 0 if none
    pub frame_number: u64,
    /// Connection epoch the slot was dequeued or attached under
    pub epoch: u64,
    /// The producer fetched the buffer with `request_buffer`
    pub request_buffer_called: bool,
    /// The consumer already holds a reference to the buffer
    pub acquire_called: bool,
    /// The buffer must be freed when the consumer releases it
    pub needs_cleanup_on_release: bool,
    /// Attached by the consumer; the producer has never seen this buffer
    pub attached_by_consumer: bool,
}

impl BufferSlot {
    pub fn is_free(&self) -> bool {
        self.state == BufferState::Free
    }

    /// Drop the buffer and reset the cell to a blank FREE entry
    pub fn clear(&mut self) {
        *self = BufferSlot::default();
    }

    /// Whether `buffer` is the one currently held by this slot
    pub fn holds(&self, buffer: &BufferHandle) -> bool {
        self.buffer
            .as_ref()
            .is_some_and(|b| std::sync::Arc::ptr_eq(b, buffer))
    }
}
