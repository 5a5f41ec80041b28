//! Consumer session: acquire and release queued frames

use crate::buffer::BufferHandle;
use crate::core::{BufferQueueCore, CoreState};
use crate::fence::Fence;
use crate::format::{PixelFormat, Usage};
use crate::item::{AcquireOutcome, SidebandStream};
use crate::listener::ConsumerListener;
use crate::slot::{BufferState, MAX_MAX_ACQUIRED_BUFFERS, NUM_BUFFER_SLOTS};
use crate::{Error, Result};
use std::sync::Arc;

/// Frames whose timestamp is further than this from the expected present
/// time are treated as bogus and never dropped for
const MAX_REASONABLE_NSEC: i64 = 1_000_000_000;

/// Operations available to the consumer side of a buffer queue.
///
/// The consumer never blocks: an empty queue is reported, not waited for.
pub trait GraphicBufferConsumer: Send + Sync {
    /// Take the oldest queued frame.
    ///
    /// With a non-zero `expected_present` (nanoseconds), frames that would be
    /// superseded by a successor already due at that time are dropped, and a
    /// head frame that is not yet due yields `PresentLater`. A non-zero
    /// `max_frame_number` keeps later frames from being acquired early.
    fn acquire_buffer(&self, expected_present: i64, max_frame_number: u64) -> Result<AcquireOutcome>;

    /// Return an acquired buffer. `StaleBufferSlot` means the slot was
    /// recycled since the frame was acquired and the call had no effect.
    fn release_buffer(&self, slot: usize, frame_number: u64, release_fence: Fence) -> Result<()>;

    fn consumer_connect(&self, listener: Arc<dyn ConsumerListener>, controlled_by_app: bool) -> Result<()>;

    /// Abandon the queue; every later call on either side fails
    fn consumer_disconnect(&self) -> Result<()>;

    fn detach_buffer(&self, slot: usize) -> Result<BufferHandle>;

    /// Place an external buffer into a free slot in the ACQUIRED state
    fn attach_buffer(&self, buffer: BufferHandle) -> Result<usize>;

    /// Bit `n` is set if the consumer must drop its cached buffer for slot `n`
    fn get_released_buffers(&self) -> Result<u64>;

    fn set_default_buffer_size(&self, width: u32, height: u32) -> Result<()>;

    fn set_default_max_buffer_count(&self, count: usize) -> Result<()>;

    /// Stop granting async producers an extra buffer; only before connecting
    fn disable_async_buffer(&self) -> Result<()>;

    /// Only while no producer is connected
    fn set_max_acquired_buffer_count(&self, count: usize) -> Result<()>;

    fn set_consumer_name(&self, name: &str) -> Result<()>;

    fn set_default_buffer_format(&self, format: PixelFormat) -> Result<()>;

    fn set_consumer_usage_bits(&self, usage: Usage) -> Result<()>;

    fn set_transform_hint(&self, hint: u32) -> Result<()>;

    fn get_sideband_stream(&self) -> Result<Option<SidebandStream>>;

    fn dump(&self, prefix: &str) -> String;
}

/// In-process consumer session backed by a `BufferQueueCore`
#[derive(Clone)]
pub struct BufferQueueConsumer {
    core: Arc<BufferQueueCore>,
}

impl BufferQueueConsumer {
    pub(crate) fn new(core: Arc<BufferQueueCore>) -> Self {
        Self { core }
    }
}

impl GraphicBufferConsumer for BufferQueueConsumer {
    fn acquire_buffer(&self, expected_present: i64, max_frame_number: u64) -> Result<AcquireOutcome> {
        let (outcome, dropped, listener) = {
            let mut state = self.core.state.lock();
            state.ensure_alive()?;
            if state.queue.is_empty() {
                return Ok(AcquireOutcome::NoBufferAvailable);
            }
            let acquired = state.count_in_state(BufferState::Acquired);
            if acquired >= state.max_acquired_buffer_count {
                return Err(Error::InvalidOperation(format!(
                    "max acquired buffer count reached: {} (max {})",
                    acquired, state.max_acquired_buffer_count
                )));
            }

            let mut dropped = 0;
            let mut present_later = false;
            if expected_present != 0 {
                let earliest = expected_present.saturating_sub(MAX_REASONABLE_NSEC);
                while state.queue.len() > 1 && !state.queue[0].is_auto_timestamp {
                    let next = &state.queue[1];
                    if max_frame_number != 0 && next.frame_number > max_frame_number {
                        break;
                    }
                    if next.timestamp < earliest || next.timestamp > expected_present {
                        break;
                    }
                    if let Some(front) = state.queue.pop_front() {
                        if state.still_tracking(&front) {
                            state.slots[front.slot].state = BufferState::Free;
                            state.free_buffers.push_back(front.slot);
                            dropped += 1;
                        }
                        tracing::debug!(name = %state.consumer_name, frame = front.frame_number, "dropped late frame");
                    }
                }

                let front = &state.queue[0];
                let due = front.timestamp <= expected_present
                    || front.timestamp > expected_present.saturating_add(MAX_REASONABLE_NSEC);
                let ready = max_frame_number == 0 || front.frame_number <= max_frame_number;
                present_later = !due || !ready;
            }

            let outcome = match state.queue.pop_front() {
                Some(mut item) if !present_later => {
                    if state.still_tracking(&item) {
                        let s = &mut state.slots[item.slot];
                        s.acquire_called = true;
                        s.needs_cleanup_on_release = false;
                        s.state = BufferState::Acquired;
                        s.fence = Fence::NO_FENCE;
                    }
                    if item.acquire_called {
                        // the consumer already caches this slot's buffer
                        item.graphic_buffer = None;
                    }
                    tracing::debug!(name = %state.consumer_name, slot = item.slot, frame = item.frame_number, "acquired");
                    AcquireOutcome::Acquired(item)
                }
                Some(item) => {
                    state.queue.push_front(item);
                    AcquireOutcome::PresentLater
                }
                None => AcquireOutcome::NoBufferAvailable,
            };

            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            let listener = if dropped > 0 {
                state.producer_listener.clone()
            } else {
                None
            };
            (outcome, dropped, listener)
        };

        if let Some(listener) = listener {
            for _ in 0..dropped {
                listener.on_buffer_released();
            }
        }
        Ok(outcome)
    }

    fn release_buffer(&self, slot: usize, frame_number: u64, release_fence: Fence) -> Result<()> {
        let listener = {
            let mut state = self.core.state.lock();
            state.ensure_alive()?;
            CoreState::ensure_slot_index(slot)?;

            if state.slots[slot].frame_number != frame_number {
                tracing::warn!(
                    name = %state.consumer_name,
                    slot,
                    frame_number,
                    current = state.slots[slot].frame_number,
                    "ignoring release of a recycled slot"
                );
                return Err(Error::StaleBufferSlot { slot });
            }
            if state.queue.iter().any(|item| item.slot == slot) {
                return Err(Error::InvalidArgument(format!(
                    "slot {} was queued while acquired",
                    slot
                )));
            }

            let s = &mut state.slots[slot];
            match s.state {
                BufferState::Acquired if s.needs_cleanup_on_release => {
                    s.clear();
                    state.free_slots.insert(slot);
                }
                BufferState::Acquired => {
                    s.state = BufferState::Free;
                    s.fence = release_fence;
                    state.free_buffers.push_back(slot);
                }
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "slot {} is not acquired (state={})",
                        slot,
                        other.as_str()
                    )));
                }
            }

            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            tracing::debug!(name = %state.consumer_name, slot, frame_number, "released");
            state.producer_listener.clone()
        };

        if let Some(listener) = listener {
            listener.on_buffer_released();
        }
        Ok(())
    }

    fn consumer_connect(&self, listener: Arc<dyn ConsumerListener>, controlled_by_app: bool) -> Result<()> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        state.consumer_listener = Some(listener);
        state.consumer_controlled_by_app = controlled_by_app;
        tracing::debug!(name = %state.consumer_name, controlled_by_app, "consumer connected");
        Ok(())
    }

    fn consumer_disconnect(&self) -> Result<()> {
        let mut state = self.core.state.lock();
        if state.consumer_listener.is_none() {
            return Err(Error::NotConnected("consumer"));
        }
        state.abandoned = true;
        state.consumer_listener = None;
        state.queue.clear();
        for slot in state.slots.iter_mut() {
            slot.clear();
        }
        state.free_buffers.clear();
        state.free_slots = (0..NUM_BUFFER_SLOTS).collect();
        self.core.dequeue_condition.notify_all();
        tracing::debug!(name = %state.consumer_name, "consumer disconnected, queue abandoned");
        Ok(())
    }

    fn detach_buffer(&self, slot: usize) -> Result<BufferHandle> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        CoreState::ensure_slot_index(slot)?;

        let s = &mut state.slots[slot];
        if s.state != BufferState::Acquired {
            return Err(Error::InvalidArgument(format!(
                "slot {} is not acquired (state={})",
                slot,
                s.state.as_str()
            )));
        }
        let buffer = s
            .buffer
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("slot {} has no buffer", slot)))?;
        s.clear();
        state.free_slots.insert(slot);

        self.core.dequeue_condition.notify_all();
        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "detached by consumer");
        Ok(buffer)
    }

    fn attach_buffer(&self, buffer: BufferHandle) -> Result<usize> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        if buffer.generation_number() != state.generation_number {
            return Err(Error::InvalidArgument(format!(
                "buffer generation {} does not match queue generation {}",
                buffer.generation_number(),
                state.generation_number
            )));
        }
        let acquired = state.count_in_state(BufferState::Acquired);
        if acquired >= state.max_acquired_buffer_count {
            return Err(Error::InvalidOperation(format!(
                "max acquired buffer count reached: {} (max {})",
                acquired, state.max_acquired_buffer_count
            )));
        }
        let slot = state
            .free_slots
            .pop_first()
            .ok_or_else(|| Error::NoMemory("no free slot to attach into".to_string()))?;

        let s = &mut state.slots[slot];
        s.buffer = Some(buffer);
        s.state = BufferState::Acquired;
        s.attached_by_consumer = true;
        s.needs_cleanup_on_release = false;
        s.fence = Fence::NO_FENCE;
        s.frame_number = 0;
        // send the buffer with the next acquire of this slot
        s.acquire_called = false;

        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "attached by consumer");
        Ok(slot)
    }

    fn get_released_buffers(&self) -> Result<u64> {
        let state = self.core.state.lock();
        state.ensure_alive()?;
        let mut mask = 0u64;
        for (s, slot) in state.slots.iter().enumerate() {
            if !slot.acquire_called {
                mask |= 1u64 << s;
            }
        }
        // the consumer keeps its cache for queued frames it will not be sent again
        for item in &state.queue {
            if item.acquire_called {
                mask &= !(1u64 << item.slot);
            }
        }
        Ok(mask)
    }

    fn set_default_buffer_size(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!(
                "default size {}x{} must be non-zero",
                width, height
            )));
        }
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        state.default_width = width;
        state.default_height = height;
        Ok(())
    }

    fn set_default_max_buffer_count(&self, count: usize) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        let min = if state.use_async_buffer { 2 } else { 1 };
        if !(min..=NUM_BUFFER_SLOTS).contains(&count) {
            return Err(Error::InvalidArgument(format!(
                "default max buffer count {} outside {}..={}",
                count, min, NUM_BUFFER_SLOTS
            )));
        }
        state.default_max_buffer_count = count;
        self.core.dequeue_condition.notify_all();
        Ok(())
    }

    fn disable_async_buffer(&self) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        if state.consumer_listener.is_some() {
            return Err(Error::InvalidOperation(
                "consumer already connected".to_string(),
            ));
        }
        state.use_async_buffer = false;
        Ok(())
    }

    fn set_max_acquired_buffer_count(&self, count: usize) -> Result<()> {
        if !(1..=MAX_MAX_ACQUIRED_BUFFERS).contains(&count) {
            return Err(Error::InvalidArgument(format!(
                "max acquired buffer count {} outside 1..={}",
                count, MAX_MAX_ACQUIRED_BUFFERS
            )));
        }
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        if state.connected_api.is_some() {
            return Err(Error::InvalidOperation(
                "producer already connected".to_string(),
            ));
        }
        let acquired = state.count_in_state(BufferState::Acquired);
        if acquired > count {
            return Err(Error::InvalidOperation(format!(
                "{} buffers are acquired, more than the requested {}",
                acquired, count
            )));
        }
        state.max_acquired_buffer_count = count;
        Ok(())
    }

    fn set_consumer_name(&self, name: &str) -> Result<()> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        state.consumer_name = name.to_string();
        Ok(())
    }

    fn set_default_buffer_format(&self, format: PixelFormat) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        state.default_format = format;
        Ok(())
    }

    fn set_consumer_usage_bits(&self, usage: Usage) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        state.consumer_usage_bits = usage;
        Ok(())
    }

    fn set_transform_hint(&self, hint: u32) -> Result<()> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        state.transform_hint = hint;
        Ok(())
    }

    fn get_sideband_stream(&self) -> Result<Option<SidebandStream>> {
        let state = self.core.state.lock();
        state.ensure_alive()?;
        Ok(state.sideband_stream.clone())
    }

    fn dump(&self, prefix: &str) -> String {
        self.core.dump(prefix)
    }
}

impl std::fmt::Debug for BufferQueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueueConsumer")
            .field("core", &self.core)
            .finish()
    }
}
