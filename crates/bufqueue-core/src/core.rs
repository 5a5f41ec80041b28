//! Shared queue state and the primitives both sessions build on.
//!
//! Every field of `CoreState` is guarded by `BufferQueueCore::state`. Listener
//! callbacks never run with that lock held; they are ordered by the
//! `CallbackSequencer` instead.

use crate::allocator::{DeviceCaps, GraphicBufferAlloc};
use crate::buffer::GraphicBuffer;
use crate::config::QueueConfig;
use crate::fence::Fence;
use crate::format::{PixelFormat, Usage};
use crate::item::{BufferItem, SidebandStream};
use crate::listener::{Api, ConsumerListener, ProducerListener};
use crate::sequencer::{CallbackSequencer, Ticket, TicketDispenser};
use crate::slot::{BufferSlot, BufferState, NUM_BUFFER_SLOTS};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

/// Geometry a dequeued buffer must satisfy, after defaults are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferRequest {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: Usage,
}

impl BufferRequest {
    pub fn is_satisfied_by(&self, buffer: &GraphicBuffer) -> bool {
        !buffer.needs_reallocation(self.width, self.height, self.format, self.usage)
    }
}

/// Which producer call is looking for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotSearch<'a> {
    Dequeue(&'a BufferRequest),
    Attach,
}

/// A consumer callback that must be delivered once the core lock is dropped
pub(crate) struct Notification {
    ticket: Ticket,
    listener: Arc<dyn ConsumerListener>,
}

pub(crate) struct CoreState {
    pub consumer_name: String,
    pub abandoned: bool,
    pub consumer_listener: Option<Arc<dyn ConsumerListener>>,
    pub consumer_controlled_by_app: bool,
    pub producer_listener: Option<Arc<dyn ProducerListener>>,
    pub connected_api: Option<Api>,
    /// Bumped on every producer connect and disconnect
    pub connection_epoch: u64,
    pub slots: Vec<BufferSlot>,
    pub queue: VecDeque<BufferItem>,
    /// FREE slots without a buffer
    pub free_slots: BTreeSet<usize>,
    /// FREE slots holding a buffer, oldest released first
    pub free_buffers: VecDeque<usize>,
    /// Slot count set by the producer; 0 means unset
    pub override_max_buffer_count: usize,
    pub default_width: u32,
    pub default_height: u32,
    pub default_format: PixelFormat,
    pub consumer_usage_bits: Usage,
    pub default_max_buffer_count: usize,
    pub max_acquired_buffer_count: usize,
    pub max_dequeued_buffer_count: usize,
    pub use_async_buffer: bool,
    /// Producer and consumer are both app-controlled; dequeue never waits
    pub dequeue_buffer_cannot_block: bool,
    pub frame_counter: u64,
    pub transform_hint: u32,
    pub sticky_transform: u32,
    pub is_allocating: bool,
    pub allow_allocation: bool,
    /// Stamped on new buffers; attached buffers must carry it
    pub generation_number: u32,
    pub sideband_stream: Option<SidebandStream>,
    pub last_queue_buffer_fence: Fence,
    /// Timestamp of the last explicitly timestamped frame of this connection
    pub last_queued_timestamp: Option<i64>,
    pub tickets: TicketDispenser,
}

impl CoreState {
    fn new(config: &QueueConfig) -> Self {
        Self {
            consumer_name: config.consumer_name.clone(),
            abandoned: false,
            consumer_listener: None,
            consumer_controlled_by_app: false,
            producer_listener: None,
            connected_api: None,
            connection_epoch: 0,
            slots: vec![BufferSlot::default(); NUM_BUFFER_SLOTS],
            queue: VecDeque::new(),
            free_slots: (0..NUM_BUFFER_SLOTS).collect(),
            free_buffers: VecDeque::new(),
            override_max_buffer_count: 0,
            default_width: config.default_width,
            default_height: config.default_height,
            default_format: config.default_format,
            consumer_usage_bits: config.consumer_usage_bits,
            default_max_buffer_count: config.default_max_buffer_count,
            max_acquired_buffer_count: config.max_acquired_buffer_count,
            max_dequeued_buffer_count: config.max_dequeued_buffer_count,
            use_async_buffer: config.use_async_buffer,
            dequeue_buffer_cannot_block: false,
            frame_counter: 0,
            transform_hint: 0,
            sticky_transform: 0,
            is_allocating: false,
            allow_allocation: true,
            generation_number: 0,
            sideband_stream: None,
            last_queue_buffer_fence: Fence::NO_FENCE,
            last_queued_timestamp: None,
            tickets: TicketDispenser::default(),
        }
    }

    pub fn ensure_alive(&self) -> Result<()> {
        if self.abandoned {
            return Err(Error::Abandoned);
        }
        Ok(())
    }

    pub fn ensure_slot_index(slot: usize) -> Result<()> {
        if slot >= NUM_BUFFER_SLOTS {
            return Err(Error::InvalidArgument(format!(
                "slot index {} out of range [0, {})",
                slot, NUM_BUFFER_SLOTS
            )));
        }
        Ok(())
    }

    /// Reject a producer call naming a slot/generation pair from an earlier
    /// connection
    pub fn ensure_current_slot(&self, slot: usize, generation: u64) -> Result<()> {
        if generation != self.connection_epoch || self.slots[slot].epoch != generation {
            return Err(Error::StaleBufferSlot { slot });
        }
        Ok(())
    }

    /// Buffers the consumer must leave undequeued so it can keep acquiring
    pub fn min_undequeued_buffer_count(&self, async_mode: bool) -> usize {
        if (self.use_async_buffer && async_mode) || self.dequeue_buffer_cannot_block {
            self.max_acquired_buffer_count + 1
        } else {
            self.max_acquired_buffer_count
        }
    }

    /// Smallest slot count that leaves room for one dequeued buffer
    pub fn min_max_buffer_count(&self, async_mode: bool) -> usize {
        self.min_undequeued_buffer_count(async_mode) + 1
    }

    /// Number of slots currently in use, never shrinking below a DEQUEUED or
    /// QUEUED slot
    pub fn max_buffer_count(&self, async_mode: bool) -> usize {
        let mut max = if self.override_max_buffer_count > 0 {
            self.override_max_buffer_count
        } else {
            let extra = usize::from(
                (self.use_async_buffer && async_mode) || self.dequeue_buffer_cannot_block,
            );
            self.default_max_buffer_count
                .max(self.max_acquired_buffer_count + self.max_dequeued_buffer_count + extra)
        };
        for s in max..NUM_BUFFER_SLOTS {
            if matches!(
                self.slots[s].state,
                BufferState::Dequeued | BufferState::Queued
            ) {
                max = s + 1;
            }
        }
        max.min(NUM_BUFFER_SLOTS)
    }

    /// How many buffers the producer may hold at once
    pub fn max_dequeued(&self, async_mode: bool) -> usize {
        if self.override_max_buffer_count > 0 {
            self.override_max_buffer_count
                .saturating_sub(self.min_undequeued_buffer_count(async_mode))
        } else {
            self.max_dequeued_buffer_count
        }
    }

    pub fn count_in_state(&self, state: BufferState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    /// Reset a slot to a blank FREE entry; an ACQUIRED slot keeps its buffer
    /// until the consumer releases it
    pub fn free_buffer(&mut self, slot: usize) {
        if self.slots[slot].state == BufferState::Acquired {
            self.slots[slot].needs_cleanup_on_release = true;
            return;
        }
        self.free_buffers.retain(|&s| s != slot);
        self.slots[slot].clear();
        self.free_slots.insert(slot);
    }

    pub fn free_all_buffers(&mut self) {
        for slot in 0..NUM_BUFFER_SLOTS {
            self.free_buffer(slot);
        }
    }

    /// Whether `item` still refers to the buffer held by its slot
    pub fn still_tracking(&self, item: &BufferItem) -> bool {
        item.graphic_buffer
            .as_ref()
            .is_some_and(|b| self.slots[item.slot].holds(b))
    }

    pub fn take_free_slot(&mut self, max: usize) -> Option<usize> {
        let slot = self.free_slots.iter().copied().find(|&s| s < max)?;
        self.free_slots.remove(&slot);
        Some(slot)
    }

    pub fn take_free_buffer(&mut self, max: usize, request: Option<&BufferRequest>) -> Option<usize> {
        let compatible = request.and_then(|request| {
            self.free_buffers.iter().position(|&s| {
                s < max
                    && self.slots[s]
                        .buffer
                        .as_ref()
                        .is_some_and(|b| request.is_satisfied_by(b))
            })
        });
        let index = compatible.or_else(|| self.free_buffers.iter().position(|&s| s < max))?;
        self.free_buffers.remove(index)
    }

    /// Take a ticket if a consumer listener is connected
    pub fn notification(&mut self) -> Option<Notification> {
        let listener = self.consumer_listener.clone()?;
        Some(Notification {
            ticket: self.tickets.take(),
            listener,
        })
    }

    /// Describe the first accounting violation, if any
    fn consistency_error(&self) -> Option<String> {
        let mut seen = 0u64;
        for &s in &self.free_slots {
            let slot = &self.slots[s];
            if !slot.is_free() || slot.buffer.is_some() {
                return Some(format!("slot {} in free slots but is {} with buffer={}", s, slot.state.as_str(), slot.buffer.is_some()));
            }
            seen |= 1u64 << s;
        }
        for &s in &self.free_buffers {
            let slot = &self.slots[s];
            if !slot.is_free() || slot.buffer.is_none() {
                return Some(format!("slot {} in free buffers but is {} with buffer={}", s, slot.state.as_str(), slot.buffer.is_some()));
            }
            if seen & (1u64 << s) != 0 {
                return Some(format!("slot {} listed twice in free lists", s));
            }
            seen |= 1u64 << s;
        }
        for (s, slot) in self.slots.iter().enumerate() {
            if slot.is_free() && seen & (1u64 << s) == 0 {
                return Some(format!("free slot {} missing from free lists", s));
            }
        }
        let acquired = self.count_in_state(BufferState::Acquired);
        if acquired > self.max_acquired_buffer_count {
            return Some(format!(
                "{} buffers acquired, limit is {}",
                acquired, self.max_acquired_buffer_count
            ));
        }
        for item in &self.queue {
            if self.still_tracking(item) && self.slots[item.slot].state != BufferState::Queued {
                return Some(format!(
                    "queued frame {} refers to slot {} in state {}",
                    item.frame_number,
                    item.slot,
                    self.slots[item.slot].state.as_str()
                ));
            }
        }
        None
    }

    pub fn dump(&self, prefix: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}-BufferQueue max_acquired_buffer_count={}, max_dequeued_buffer_count={}, dequeue_buffer_cannot_block={}, default_size=[{}x{}], default_format={:?}, transform_hint={:02x}, FIFO({})={{",
            prefix,
            self.max_acquired_buffer_count,
            self.max_dequeued_buffer_count,
            self.dequeue_buffer_cannot_block,
            self.default_width,
            self.default_height,
            self.default_format,
            self.transform_hint,
            self.queue.len()
        );
        for item in &self.queue {
            let _ = writeln!(
                out,
                "{}    {:02}: frame={} crop=[{},{},{},{}] xform=0x{:02x} time={} scale={:?}",
                prefix,
                item.slot,
                item.frame_number,
                item.crop.left,
                item.crop.top,
                item.crop.right,
                item.crop.bottom,
                item.transform,
                item.timestamp,
                item.scaling_mode
            );
        }
        let _ = writeln!(out, "{}}}", prefix);
        for (s, slot) in self.slots.iter().enumerate().take(self.max_buffer_count(false)) {
            let marker = if slot.state == BufferState::Acquired { '>' } else { ' ' };
            let _ = write!(out, "{}{}[{:02}] state={:<8}", prefix, marker, s, slot.state.as_str());
            if let Some(buffer) = &slot.buffer {
                let _ = write!(
                    out,
                    ", id={} [{:4}x{:4}:{:4},{:?}] frame={}",
                    buffer.id(),
                    buffer.width(),
                    buffer.height(),
                    buffer.stride(),
                    buffer.format(),
                    slot.frame_number
                );
            }
            out.push('\n');
        }
        out
    }
}

/// State shared by the producer and consumer sessions of one queue
pub struct BufferQueueCore {
    pub(crate) state: Mutex<CoreState>,
    /// Signaled on any transition a blocked dequeue may care about
    pub(crate) dequeue_condition: Condvar,
    pub(crate) allocating_condition: Condvar,
    pub(crate) sequencer: CallbackSequencer,
    pub(crate) allocator: Arc<dyn GraphicBufferAlloc>,
    pub(crate) caps: DeviceCaps,
}

impl BufferQueueCore {
    pub fn new(config: &QueueConfig, caps: DeviceCaps, allocator: Arc<dyn GraphicBufferAlloc>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new_unchecked(config, caps, allocator))
    }

    /// Build from a configuration already known to be valid
    pub(crate) fn new_unchecked(
        config: &QueueConfig,
        caps: DeviceCaps,
        allocator: Arc<dyn GraphicBufferAlloc>,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState::new(config)),
            dequeue_condition: Condvar::new(),
            allocating_condition: Condvar::new(),
            sequencer: CallbackSequencer::new(),
            allocator,
            caps,
        }
    }

    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    pub(crate) fn wait_while_allocating(&self, state: &mut MutexGuard<'_, CoreState>) {
        while state.is_allocating {
            self.allocating_condition.wait(state);
        }
    }

    /// Abandon the queue if its accounting no longer adds up
    pub(crate) fn validate(&self, state: &mut CoreState) -> Result<()> {
        match state.consistency_error() {
            None => Ok(()),
            Some(reason) => {
                tracing::error!(name = %state.consumer_name, %reason, "buffer accounting violated, abandoning queue");
                state.abandoned = true;
                self.dequeue_condition.notify_all();
                Err(Error::Fatal(reason))
            }
        }
    }

    /// Find a FREE slot for the producer, waiting if the caller may block.
    ///
    /// Returns the slot, already removed from the free lists, and whether
    /// buffers beyond the current slot count were discarded.
    pub(crate) fn wait_for_free_slot(
        &self,
        state: &mut MutexGuard<'_, CoreState>,
        search: SlotSearch<'_>,
        async_mode: bool,
        epoch: u64,
    ) -> Result<(usize, bool)> {
        let mut released = false;
        loop {
            state.ensure_alive()?;
            if state.connected_api.is_none() || state.connection_epoch != epoch {
                return Err(Error::Disconnected);
            }

            let max = state.max_buffer_count(async_mode);
            if async_mode
                && state.override_max_buffer_count > 0
                && max < state.min_max_buffer_count(async_mode)
            {
                return Err(Error::InvalidArgument(format!(
                    "async mode needs at least {} buffers, {} set",
                    state.min_max_buffer_count(async_mode),
                    max
                )));
            }

            for s in max..NUM_BUFFER_SLOTS {
                if state.slots[s].is_free() && state.slots[s].buffer.is_some() {
                    state.free_buffer(s);
                    released = true;
                }
            }

            let dequeued = state.count_in_state(BufferState::Dequeued);
            let too_many = dequeued >= state.max_dequeued(async_mode) || state.queue.len() > max;
            let found = if too_many {
                None
            } else {
                match search {
                    SlotSearch::Dequeue(request) => {
                        let from_buffers = state.take_free_buffer(max, Some(request));
                        match from_buffers {
                            Some(s) => Some(s),
                            None if state.allow_allocation => state.take_free_slot(max),
                            None => None,
                        }
                    }
                    SlotSearch::Attach => state
                        .take_free_slot(max)
                        .or_else(|| state.take_free_buffer(max, None)),
                }
            };
            if let Some(slot) = found {
                return Ok((slot, released));
            }

            if search == SlotSearch::Attach {
                return Err(if too_many {
                    Error::WouldBlock
                } else {
                    Error::NoMemory("no free slot to attach into".to_string())
                });
            }
            if async_mode || state.dequeue_buffer_cannot_block {
                return Err(Error::WouldBlock);
            }
            tracing::trace!(name = %state.consumer_name, dequeued, queued = state.queue.len(), "waiting for a free slot");
            self.dequeue_condition.wait(state);
        }
    }

    /// Deliver a consumer callback in ticket order; call without the core lock
    pub(crate) fn deliver(&self, notification: Option<Notification>, f: impl FnOnce(&dyn ConsumerListener)) {
        if let Some(Notification { ticket, listener }) = notification {
            self.sequencer.deliver(ticket, || f(listener.as_ref()));
        }
    }

    pub fn dump(&self, prefix: &str) -> String {
        self.state.lock().dump(prefix)
    }
}

impl std::fmt::Debug for BufferQueueCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferQueueCore")
            .field("name", &state.consumer_name)
            .field("connected_api", &state.connected_api)
            .field("queued", &state.queue.len())
            .field("abandoned", &state.abandoned)
            .finish()
    }
}
