//! Listener contracts and producer connection APIs

use crate::item::FrameInfo;
use std::sync::Weak;

/// Producer API identifier; one API may be connected at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Api {
    Egl = 1,
    Cpu = 2,
    Media = 3,
    Camera = 4,
}

impl Api {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Api::Egl),
            2 => Some(Api::Cpu),
            3 => Some(Api::Media),
            4 => Some(Api::Camera),
            _ => None,
        }
    }
}

/// Notifications delivered to the consumer.
///
/// Calls arrive in the order of the state transitions that caused them and
/// are made without the queue lock held. Acquiring or releasing buffers from
/// inside a callback is allowed.
pub trait ConsumerListener: Send + Sync {
    /// A frame was appended to the queue
    fn on_frame_available(&self, frame: &FrameInfo);

    /// The droppable frame last in the queue was replaced by `frame`
    fn on_frame_replaced(&self, frame: &FrameInfo) {
        self.on_frame_available(frame);
    }

    /// Cached buffers must be dropped; see `get_released_buffers`
    fn on_buffers_released(&self);

    fn on_sideband_stream_changed(&self);
}

/// Notifications delivered to the connected producer
pub trait ProducerListener: Send + Sync {
    /// A buffer went back to the free pool and may be dequeued again
    fn on_buffer_released(&self);
}

/// Forwards to a weakly held listener so the queue never keeps its consumer alive
pub struct ProxyConsumerListener {
    inner: Weak<dyn ConsumerListener>,
}

impl ProxyConsumerListener {
    pub fn new(inner: Weak<dyn ConsumerListener>) -> Self {
        Self { inner }
    }
}

impl ConsumerListener for ProxyConsumerListener {
    fn on_frame_available(&self, frame: &FrameInfo) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_frame_available(frame);
        }
    }

    fn on_frame_replaced(&self, frame: &FrameInfo) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_frame_replaced(frame);
        }
    }

    fn on_buffers_released(&self) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_buffers_released();
        }
    }

    fn on_sideband_stream_changed(&self) {
        if let Some(listener) = self.inner.upgrade() {
            listener.on_sideband_stream_changed();
        }
    }
}
