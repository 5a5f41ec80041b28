//! Values exchanged between the queue and its producer and consumer

use crate::buffer::BufferHandle;
use crate::fence::Fence;
use crate::{Error, Result};
use std::sync::Arc;

pub const TRANSFORM_FLIP_H: u32 = 0x01;
pub const TRANSFORM_FLIP_V: u32 = 0x02;
pub const TRANSFORM_ROT_90: u32 = 0x04;
/// Apply the inverse of the display transform; stripped from `transform` at queue time
pub const TRANSFORM_INVERSE_DISPLAY: u32 = 0x08;

/// Integer rectangle, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Bounds of a `width` x `height` buffer
    pub fn from_size(width: u32, height: u32) -> Result<Self> {
        let too_large = |_| {
            Error::InvalidArgument(format!("size {}x{} does not fit a rect", width, height))
        };
        let right = i32::try_from(width).map_err(too_large)?;
        let bottom = i32::try_from(height).map_err(too_large)?;
        Ok(Self::new(0, 0, right, bottom))
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Intersection, or the empty rect if they do not overlap
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() {
            Rect::default()
        } else {
            r
        }
    }
}

/// How the consumer scales a buffer whose size differs from the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingMode {
    #[default]
    Freeze,
    ScaleToWindow,
    ScaleCrop,
    NoScaleCrop,
}

/// Opaque handle to an out-of-band buffer stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeHandle {
    pub fds: Vec<i32>,
    pub ints: Vec<i32>,
}

pub type SidebandStream = Arc<NativeHandle>;

/// A queued frame as stored in the FIFO and handed out by `acquire_buffer`
#[derive(Debug, Clone, Default)]
pub struct BufferItem {
    /// None if the consumer already received this slot's buffer on an earlier acquire
    pub graphic_buffer: Option<BufferHandle>,
    /// Signals when the producer's writes are complete
    pub fence: Fence,
    pub crop: Rect,
    pub transform: u32,
    pub transform_to_display_inverse: bool,
    pub scaling_mode: ScalingMode,
    /// Desired present time in nanoseconds
    pub timestamp: i64,
    pub is_auto_timestamp: bool,
    pub frame_number: u64,
    pub slot: usize,
    /// Queued in non-blocking mode; may be replaced by a newer frame
    pub is_droppable: bool,
    /// The consumer has acquired this slot's buffer before
    pub acquire_called: bool,
}

impl BufferItem {
    /// Callback view of this item, without the buffer or slot
    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            frame_number: self.frame_number,
            timestamp: self.timestamp,
            is_auto_timestamp: self.is_auto_timestamp,
            crop: self.crop,
            transform: self.transform,
            scaling_mode: self.scaling_mode,
            is_droppable: self.is_droppable,
        }
    }
}

/// Frame description passed to `ConsumerListener` callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub frame_number: u64,
    pub timestamp: i64,
    pub is_auto_timestamp: bool,
    pub crop: Rect,
    pub transform: u32,
    pub scaling_mode: ScalingMode,
    pub is_droppable: bool,
}

/// Arguments to `queue_buffer`
#[derive(Debug, Clone, Default)]
pub struct QueueBufferInput {
    pub timestamp: i64,
    pub is_auto_timestamp: bool,
    /// Empty means the whole buffer
    pub crop: Rect,
    pub scaling_mode: ScalingMode,
    pub transform: u32,
    pub sticky_transform: u32,
    /// Queue in non-blocking mode; the frame becomes droppable
    pub async_mode: bool,
    pub fence: Fence,
}

impl QueueBufferInput {
    pub fn new(timestamp: i64, fence: Fence) -> Self {
        Self {
            timestamp,
            fence,
            ..Self::default()
        }
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_transform(mut self, transform: u32) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_scaling_mode(mut self, scaling_mode: ScalingMode) -> Self {
        self.scaling_mode = scaling_mode;
        self
    }

    pub fn with_async(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_auto_timestamp(mut self, auto: bool) -> Self {
        self.is_auto_timestamp = auto;
        self
    }
}

/// Values returned to the producer by `connect` and `queue_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueBufferOutput {
    pub width: u32,
    pub height: u32,
    pub transform_hint: u32,
    pub num_pending_buffers: usize,
    pub next_frame_number: u64,
    /// Current connection generation
    pub generation: u64,
}

/// Extra actions a producer must take after `dequeue_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DequeueFlags {
    /// Call `request_buffer` for the returned slot
    pub needs_reallocation: bool,
    /// Drop every cached buffer reference for this queue
    pub release_all_buffers: bool,
}

impl DequeueFlags {
    pub const BUFFER_NEEDS_REALLOCATION: u32 = 0x1;
    pub const RELEASE_ALL_BUFFERS: u32 = 0x2;

    /// Wire encoding
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.needs_reallocation {
            bits |= Self::BUFFER_NEEDS_REALLOCATION;
        }
        if self.release_all_buffers {
            bits |= Self::RELEASE_ALL_BUFFERS;
        }
        bits
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            needs_reallocation: bits & Self::BUFFER_NEEDS_REALLOCATION != 0,
            release_all_buffers: bits & Self::RELEASE_ALL_BUFFERS != 0,
        }
    }
}

/// Result of a successful `dequeue_buffer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeueBufferOutput {
    pub slot: usize,
    /// Connection the slot belongs to; pass it back to queue or cancel
    pub generation: u64,
    /// Do not write the buffer before this signals
    pub fence: Fence,
    pub flags: DequeueFlags,
}

/// Result of a successful producer-side `attach_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachBufferOutput {
    pub slot: usize,
    pub generation: u64,
    pub flags: DequeueFlags,
}

/// Result of `acquire_buffer`; only `Acquired` changes queue state
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(BufferItem),
    /// The queue is empty; normal steady state
    NoBufferAvailable,
    /// The head frame is not due yet at the given present time
    PresentLater,
}

impl AcquireOutcome {
    pub fn into_item(self) -> Option<BufferItem> {
        match self {
            AcquireOutcome::Acquired(item) => Some(item),
            _ => None,
        }
    }
}

/// Read-only attributes available through `query`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Width,
    Height,
    Format,
    MinUndequeuedBuffers,
    ConsumerRunningBehind,
    ConsumerUsageBits,
    MaxBufferCount,
}
