//! Producer session: the operations a frame source calls on a queue

use crate::buffer::BufferHandle;
use crate::core::{BufferQueueCore, BufferRequest, CoreState, SlotSearch};
use crate::fence::Fence;
use crate::format::{PixelFormat, Usage};
use crate::item::{
    AttachBufferOutput, BufferItem, DequeueBufferOutput, DequeueFlags, QueryKind,
    QueueBufferInput, QueueBufferOutput, Rect, SidebandStream, TRANSFORM_INVERSE_DISPLAY,
};
use crate::listener::{Api, ProducerListener};
use crate::slot::{BufferState, NUM_BUFFER_SLOTS};
use crate::{Error, Result};
use std::sync::Arc;

/// Operations available to the producer side of a buffer queue.
///
/// Every call is synchronous, so a transport can forward each one 1:1.
pub trait GraphicBufferProducer: Send + Sync {
    /// Authoritative buffer for a slot the producer owns
    fn request_buffer(&self, slot: usize) -> Result<BufferHandle>;

    /// Override the slot count; 0 restores the consumer's default.
    ///
    /// Fails if any buffer is dequeued. Every buffer is freed on success.
    fn set_buffer_count(&self, count: usize) -> Result<()>;

    fn set_max_dequeued_buffer_count(&self, count: usize) -> Result<()>;

    /// Take a FREE slot, blocking unless `async_mode` or the queue is
    /// non-blocking. Zero width and height select the default size and
    /// `None` the default format.
    fn dequeue_buffer(
        &self,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
        async_mode: bool,
    ) -> Result<DequeueBufferOutput>;

    /// Take back a dequeued buffer, leaving its slot empty
    fn detach_buffer(&self, slot: usize) -> Result<BufferHandle>;

    /// Take the oldest free buffer out of the queue
    fn detach_next_buffer(&self) -> Result<(BufferHandle, Fence)>;

    /// Place an external buffer into a slot in the DEQUEUED state
    fn attach_buffer(&self, buffer: BufferHandle) -> Result<AttachBufferOutput>;

    /// Hand a dequeued slot to the consumer. `generation` is the one
    /// returned with the slot; a pair from an earlier connection fails with
    /// `StaleBufferSlot` and is never queued.
    fn queue_buffer(
        &self,
        slot: usize,
        generation: u64,
        input: QueueBufferInput,
    ) -> Result<QueueBufferOutput>;

    fn cancel_buffer(&self, slot: usize, generation: u64, fence: Fence) -> Result<()>;

    fn query(&self, what: QueryKind) -> Result<u32>;

    fn connect(
        &self,
        listener: Option<Arc<dyn ProducerListener>>,
        api: Api,
        producer_controlled_by_app: bool,
    ) -> Result<QueueBufferOutput>;

    fn disconnect(&self, api: Api) -> Result<()>;

    fn set_sideband_stream(&self, stream: Option<SidebandStream>) -> Result<()>;

    /// Allocate buffers for every empty slot up to the current slot count
    fn allocate_buffers(
        &self,
        async_mode: bool,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
    ) -> Result<()>;

    fn allow_allocation(&self, allow: bool) -> Result<()>;

    /// Generation stamped on new buffers; attached buffers must match it
    fn set_generation_number(&self, generation: u32) -> Result<()>;

    fn consumer_name(&self) -> Result<String>;
}

/// In-process producer session backed by a `BufferQueueCore`
#[derive(Clone)]
pub struct BufferQueueProducer {
    core: Arc<BufferQueueCore>,
}

impl BufferQueueProducer {
    pub(crate) fn new(core: Arc<BufferQueueCore>) -> Self {
        Self { core }
    }

    fn buffer_request(
        state: &CoreState,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
    ) -> BufferRequest {
        let (width, height) = if width == 0 && height == 0 {
            (state.default_width, state.default_height)
        } else {
            (width, height)
        };
        BufferRequest {
            width,
            height,
            format: format.unwrap_or(state.default_format),
            usage: usage | state.consumer_usage_bits,
        }
    }

    fn queue_output(state: &CoreState) -> QueueBufferOutput {
        QueueBufferOutput {
            width: state.default_width,
            height: state.default_height,
            transform_hint: state.transform_hint,
            num_pending_buffers: state.queue.len(),
            next_frame_number: state.frame_counter + 1,
            generation: state.connection_epoch,
        }
    }

    fn allocation_error(err: Error) -> Error {
        match err {
            Error::NoMemory(_) => err,
            other => Error::NoMemory(other.to_string()),
        }
    }

    /// Install a buffer allocated without the lock into the slot it was
    /// dequeued for
    fn finish_allocation(
        &self,
        slot: usize,
        epoch: u64,
        allocated: Result<BufferHandle>,
    ) -> Result<()> {
        let mut state = self.core.state.lock();
        state.is_allocating = false;
        self.core.allocating_condition.notify_all();
        let still_ours = state.connection_epoch == epoch
            && state.slots[slot].state == BufferState::Dequeued
            && state.slots[slot].buffer.is_none();

        let buffer = match allocated {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::warn!(name = %state.consumer_name, slot, error = %err, "buffer allocation failed");
                if still_ours && !state.abandoned {
                    state.slots[slot].clear();
                    state.free_slots.insert(slot);
                    self.core.dequeue_condition.notify_all();
                }
                return Err(Self::allocation_error(err));
            }
        };

        state.ensure_alive()?;
        if state.connection_epoch != epoch {
            return Err(Error::Disconnected);
        }
        if !still_ours {
            return Err(Error::InvalidOperation(format!(
                "slot {} was released while its buffer was allocated",
                slot
            )));
        }
        buffer.set_generation_number(state.generation_number);
        state.slots[slot].buffer = Some(buffer);
        self.core.validate(&mut state)
    }
}

impl GraphicBufferProducer for BufferQueueProducer {
    fn request_buffer(&self, slot: usize) -> Result<BufferHandle> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        CoreState::ensure_slot_index(slot)?;

        let epoch = state.connection_epoch;
        let s = &mut state.slots[slot];
        if !matches!(s.state, BufferState::Dequeued | BufferState::Queued) {
            return Err(Error::InvalidArgument(format!(
                "slot {} is not owned by the producer (state={})",
                slot,
                s.state.as_str()
            )));
        }
        if s.epoch != epoch {
            return Err(Error::StaleBufferSlot { slot });
        }
        let buffer = s
            .buffer
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("slot {} has no buffer", slot)))?;
        s.request_buffer_called = true;
        Ok(buffer)
    }

    fn set_buffer_count(&self, count: usize) -> Result<()> {
        let notification = {
            let mut state = self.core.state.lock();
            self.core.wait_while_allocating(&mut state);
            state.ensure_alive()?;

            if count > NUM_BUFFER_SLOTS {
                return Err(Error::InvalidArgument(format!(
                    "buffer count {} exceeds {}",
                    count, NUM_BUFFER_SLOTS
                )));
            }
            if let Some(slot) = state.slots.iter().position(|s| s.state == BufferState::Dequeued) {
                return Err(Error::InvalidArgument(format!(
                    "buffer in slot {} is still dequeued",
                    slot
                )));
            }
            if count == 0 {
                state.override_max_buffer_count = 0;
                self.core.dequeue_condition.notify_all();
                return Ok(());
            }
            let min = state.min_max_buffer_count(false);
            if count < min {
                return Err(Error::InvalidArgument(format!(
                    "buffer count {} is below the minimum {}",
                    count, min
                )));
            }

            // freed buffers are not returned by later requests
            state.free_all_buffers();
            state.override_max_buffer_count = count;
            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            tracing::debug!(name = %state.consumer_name, count, "buffer count set");
            state.notification()
        };
        self.core.deliver(notification, |listener| listener.on_buffers_released());
        Ok(())
    }

    fn set_max_dequeued_buffer_count(&self, count: usize) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;

        let limit = NUM_BUFFER_SLOTS - state.max_acquired_buffer_count;
        if count == 0 || count >= limit {
            return Err(Error::InvalidArgument(format!(
                "max dequeued count {} outside 1..{}",
                count, limit
            )));
        }
        let dequeued = state.count_in_state(BufferState::Dequeued);
        if dequeued > count {
            return Err(Error::InvalidArgument(format!(
                "{} buffers are dequeued, more than the requested {}",
                dequeued, count
            )));
        }
        state.override_max_buffer_count = 0;
        state.max_dequeued_buffer_count = count;
        self.core.dequeue_condition.notify_all();
        Ok(())
    }

    fn dequeue_buffer(
        &self,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
        async_mode: bool,
    ) -> Result<DequeueBufferOutput> {
        if (width == 0) != (height == 0) {
            return Err(Error::InvalidArgument(format!(
                "invalid size {}x{}",
                width, height
            )));
        }
        self.core.caps.check_dimensions(width, height)?;

        let (output, epoch, request) = {
            let mut state = self.core.state.lock();
            self.core.wait_while_allocating(&mut state);
            state.ensure_alive()?;
            if state.connected_api.is_none() {
                return Err(Error::NotConnected("producer"));
            }
            let epoch = state.connection_epoch;
            let request = Self::buffer_request(&state, width, height, format, usage);
            if request.width == 0 || request.height == 0 {
                return Err(Error::InvalidArgument(format!(
                    "invalid size {}x{} after defaults",
                    request.width, request.height
                )));
            }

            let mut flags = DequeueFlags::default();
            let slot = loop {
                let (slot, released) = self.core.wait_for_free_slot(
                    &mut state,
                    SlotSearch::Dequeue(&request),
                    async_mode,
                    epoch,
                )?;
                flags.release_all_buffers |= released;

                let stale = state.slots[slot]
                    .buffer
                    .as_ref()
                    .is_some_and(|b| !request.is_satisfied_by(b));
                if stale && !state.allow_allocation {
                    // cannot replace it, so drop it and look again
                    state.free_buffer(slot);
                    continue;
                }
                break slot;
            };

            let s = &mut state.slots[slot];
            s.state = BufferState::Dequeued;
            s.epoch = epoch;
            let reallocate = s
                .buffer
                .as_ref()
                .map_or(true, |b| !request.is_satisfied_by(b));
            if reallocate {
                s.buffer = None;
                s.acquire_called = false;
                s.request_buffer_called = false;
                flags.needs_reallocation = true;
            }
            if s.attached_by_consumer {
                s.attached_by_consumer = false;
                s.request_buffer_called = false;
                flags.needs_reallocation = true;
            }
            let fence = std::mem::take(&mut s.fence);

            self.core.validate(&mut state)?;
            tracing::debug!(
                name = %state.consumer_name,
                slot,
                flags = flags.bits(),
                "dequeued"
            );
            if reallocate {
                // configuration changes wait until the buffer is installed
                state.is_allocating = true;
            }
            let output = DequeueBufferOutput {
                slot,
                generation: epoch,
                fence,
                flags,
            };
            (output, epoch, reallocate.then_some(request))
        };

        if let Some(request) = request {
            let allocated = self.core.allocator.create_graphic_buffer(
                request.width,
                request.height,
                request.format,
                request.usage,
            );
            self.finish_allocation(output.slot, epoch, allocated)?;
        }
        Ok(output)
    }

    fn detach_buffer(&self, slot: usize) -> Result<BufferHandle> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        CoreState::ensure_slot_index(slot)?;

        let s = &state.slots[slot];
        if s.state != BufferState::Dequeued {
            return Err(Error::InvalidArgument(format!(
                "slot {} is not dequeued (state={})",
                slot,
                s.state.as_str()
            )));
        }
        if !s.request_buffer_called {
            return Err(Error::InvalidArgument(format!(
                "buffer in slot {} was never requested",
                slot
            )));
        }
        let buffer = s
            .buffer
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("slot {} has no buffer", slot)))?;

        state.free_buffer(slot);
        self.core.dequeue_condition.notify_all();
        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "detached by producer");
        Ok(buffer)
    }

    fn detach_next_buffer(&self) -> Result<(BufferHandle, Fence)> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;

        let slot = *state
            .free_buffers
            .front()
            .ok_or_else(|| Error::NoMemory("no free buffer to detach".to_string()))?;
        let s = &state.slots[slot];
        let fence = s.fence.clone();
        let buffer = s
            .buffer
            .clone()
            .ok_or_else(|| Error::Fatal(format!("free buffer slot {} is empty", slot)))?;

        state.free_buffer(slot);
        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "detached next buffer");
        Ok((buffer, fence))
    }

    fn attach_buffer(&self, buffer: BufferHandle) -> Result<AttachBufferOutput> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        if state.connected_api.is_none() {
            return Err(Error::NotConnected("producer"));
        }
        if buffer.generation_number() != state.generation_number {
            return Err(Error::InvalidArgument(format!(
                "buffer generation {} does not match queue generation {}",
                buffer.generation_number(),
                state.generation_number
            )));
        }

        let epoch = state.connection_epoch;
        let (slot, released) = self
            .core
            .wait_for_free_slot(&mut state, SlotSearch::Attach, false, epoch)?;

        let s = &mut state.slots[slot];
        s.buffer = Some(buffer);
        s.state = BufferState::Dequeued;
        s.fence = Fence::NO_FENCE;
        s.epoch = epoch;
        s.request_buffer_called = true;
        s.acquire_called = false;
        s.attached_by_consumer = false;

        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "attached by producer");
        Ok(AttachBufferOutput {
            slot,
            generation: epoch,
            flags: DequeueFlags {
                needs_reallocation: false,
                release_all_buffers: released,
            },
        })
    }

    fn queue_buffer(
        &self,
        slot: usize,
        generation: u64,
        input: QueueBufferInput,
    ) -> Result<QueueBufferOutput> {
        let (output, item, replaced, notification, throttle) = {
            let mut state = self.core.state.lock();
            state.ensure_alive()?;
            let api = state.connected_api.ok_or(Error::NotConnected("producer"))?;

            let max = state.max_buffer_count(input.async_mode);
            if input.async_mode
                && state.override_max_buffer_count > 0
                && max < state.min_max_buffer_count(true)
            {
                return Err(Error::InvalidArgument(format!(
                    "async mode needs at least {} buffers, {} set",
                    state.min_max_buffer_count(true),
                    max
                )));
            }
            if slot >= max {
                return Err(Error::InvalidArgument(format!(
                    "slot index {} out of range [0, {})",
                    slot, max
                )));
            }
            state.ensure_current_slot(slot, generation)?;
            let s = &state.slots[slot];
            if s.state != BufferState::Dequeued {
                return Err(Error::InvalidArgument(format!(
                    "slot {} is not dequeued (state={})",
                    slot,
                    s.state.as_str()
                )));
            }
            if !s.request_buffer_called {
                return Err(Error::InvalidArgument(format!(
                    "slot {} was queued without requesting its buffer",
                    slot
                )));
            }
            let buffer = s
                .buffer
                .clone()
                .ok_or_else(|| Error::InvalidArgument(format!("slot {} has no buffer", slot)))?;
            if buffer.width() == 0 || buffer.height() == 0 {
                return Err(Error::InvalidArgument(format!(
                    "buffer in slot {} has zero size",
                    slot
                )));
            }
            let bounds = Rect::from_size(buffer.width(), buffer.height())?;
            let crop = if input.crop.is_empty() {
                bounds
            } else if input.crop.intersect(&bounds) == input.crop {
                input.crop
            } else {
                return Err(Error::InvalidArgument(format!(
                    "crop {:?} exceeds buffer bounds {:?}",
                    input.crop, bounds
                )));
            };
            if !input.is_auto_timestamp {
                if let Some(last) = state.last_queued_timestamp {
                    if input.timestamp < last {
                        return Err(Error::InvalidArgument(format!(
                            "timestamp {} precedes the previous frame's {}",
                            input.timestamp, last
                        )));
                    }
                }
                state.last_queued_timestamp = Some(input.timestamp);
            }

            state.frame_counter += 1;
            let frame_number = state.frame_counter;
            let droppable = state.dequeue_buffer_cannot_block || input.async_mode;
            let s = &mut state.slots[slot];
            s.fence = input.fence.clone();
            s.state = BufferState::Queued;
            s.frame_number = frame_number;

            let item = BufferItem {
                graphic_buffer: Some(buffer),
                fence: input.fence.clone(),
                crop,
                transform: input.transform & !TRANSFORM_INVERSE_DISPLAY,
                transform_to_display_inverse: input.transform & TRANSFORM_INVERSE_DISPLAY != 0,
                scaling_mode: input.scaling_mode,
                timestamp: input.timestamp,
                is_auto_timestamp: input.is_auto_timestamp,
                frame_number,
                slot,
                is_droppable: droppable,
                acquire_called: s.acquire_called,
            };
            state.sticky_transform = input.sticky_transform;

            let replace_tail = state.queue.back().is_some_and(|last| last.is_droppable);
            if replace_tail {
                let tail = state.queue.len() - 1;
                let previous = std::mem::replace(&mut state.queue[tail], item.clone());
                if state.still_tracking(&previous) {
                    state.slots[previous.slot].state = BufferState::Free;
                    state.free_buffers.push_front(previous.slot);
                }
            } else {
                state.queue.push_back(item.clone());
            }

            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            tracing::debug!(
                name = %state.consumer_name,
                slot,
                frame = frame_number,
                replaced = replace_tail,
                "queued"
            );

            let throttle = (api == Api::Egl).then(|| {
                std::mem::replace(&mut state.last_queue_buffer_fence, input.fence.clone())
            });
            let output = Self::queue_output(&state);
            (output, item, replace_tail, state.notification(), throttle)
        };

        let frame = item.frame_info();
        self.core.deliver(notification, |listener| {
            if replaced {
                listener.on_frame_replaced(&frame);
            } else {
                listener.on_frame_available(&frame);
            }
        });

        if let Some(fence) = throttle {
            fence.wait_forever("throttling EGL production");
        }
        Ok(output)
    }

    fn cancel_buffer(&self, slot: usize, generation: u64, fence: Fence) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.wait_while_allocating(&mut state);
        state.ensure_alive()?;
        CoreState::ensure_slot_index(slot)?;
        state.ensure_current_slot(slot, generation)?;

        let s = &mut state.slots[slot];
        if s.state != BufferState::Dequeued {
            return Err(Error::InvalidArgument(format!(
                "slot {} is not dequeued (state={})",
                slot,
                s.state.as_str()
            )));
        }
        s.state = BufferState::Free;
        s.frame_number = 0;
        s.fence = fence;
        if s.buffer.is_some() {
            state.free_buffers.push_front(slot);
        } else {
            state.slots[slot].clear();
            state.free_slots.insert(slot);
        }
        self.core.dequeue_condition.notify_all();
        self.core.validate(&mut state)?;
        tracing::debug!(name = %state.consumer_name, slot, "canceled");
        Ok(())
    }

    fn query(&self, what: QueryKind) -> Result<u32> {
        let state = self.core.state.lock();
        state.ensure_alive()?;
        let value = match what {
            QueryKind::Width => state.default_width,
            QueryKind::Height => state.default_height,
            QueryKind::Format => state.default_format as u32,
            QueryKind::MinUndequeuedBuffers => state.min_undequeued_buffer_count(false) as u32,
            QueryKind::ConsumerRunningBehind => u32::from(state.queue.len() > 1),
            QueryKind::ConsumerUsageBits => state.consumer_usage_bits.bits(),
            QueryKind::MaxBufferCount => state.max_buffer_count(false) as u32,
        };
        Ok(value)
    }

    fn connect(
        &self,
        listener: Option<Arc<dyn ProducerListener>>,
        api: Api,
        producer_controlled_by_app: bool,
    ) -> Result<QueueBufferOutput> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        if state.consumer_listener.is_none() {
            return Err(Error::NotConnected("consumer"));
        }
        if let Some(current) = state.connected_api {
            return Err(Error::WrongConnection {
                current: Some(current),
                requested: api,
            });
        }

        state.connected_api = Some(api);
        state.producer_listener = listener;
        state.connection_epoch += 1;
        state.allow_allocation = true;
        state.dequeue_buffer_cannot_block =
            state.consumer_controlled_by_app && producer_controlled_by_app;
        state.last_queued_timestamp = None;
        state.last_queue_buffer_fence = Fence::NO_FENCE;

        tracing::debug!(
            name = %state.consumer_name,
            ?api,
            generation = state.connection_epoch,
            cannot_block = state.dequeue_buffer_cannot_block,
            "producer connected"
        );
        Ok(Self::queue_output(&state))
    }

    fn disconnect(&self, api: Api) -> Result<()> {
        let notification = {
            let mut state = self.core.state.lock();
            self.core.wait_while_allocating(&mut state);
            if state.abandoned {
                // the consumer already tore everything down
                return Ok(());
            }
            if state.connected_api != Some(api) {
                return Err(Error::WrongConnection {
                    current: state.connected_api,
                    requested: api,
                });
            }

            state.free_all_buffers();
            state.sideband_stream = None;
            state.connected_api = None;
            state.producer_listener = None;
            state.connection_epoch += 1;
            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            tracing::debug!(name = %state.consumer_name, ?api, "producer disconnected");
            state.notification()
        };
        self.core.deliver(notification, |listener| listener.on_buffers_released());
        Ok(())
    }

    fn set_sideband_stream(&self, stream: Option<SidebandStream>) -> Result<()> {
        let notification = {
            let mut state = self.core.state.lock();
            state.ensure_alive()?;
            state.sideband_stream = stream;
            state.notification()
        };
        self.core.deliver(notification, |listener| listener.on_sideband_stream_changed());
        Ok(())
    }

    fn allocate_buffers(
        &self,
        async_mode: bool,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
    ) -> Result<()> {
        loop {
            let (request, count) = {
                let mut state = self.core.state.lock();
                self.core.wait_while_allocating(&mut state);
                state.ensure_alive()?;
                if !state.allow_allocation {
                    return Err(Error::InvalidOperation(
                        "allocation is not allowed for this queue".to_string(),
                    ));
                }
                let current = state.slots.iter().filter(|s| s.buffer.is_some()).count();
                let max = state.max_buffer_count(async_mode);
                if current >= max {
                    return Ok(());
                }
                state.is_allocating = true;
                (
                    Self::buffer_request(&state, width, height, format, usage),
                    max - current,
                )
            };

            let allocated: Result<Vec<BufferHandle>> = (0..count)
                .map(|_| {
                    self.core.allocator.create_graphic_buffer(
                        request.width,
                        request.height,
                        request.format,
                        request.usage,
                    )
                })
                .collect();

            let mut state = self.core.state.lock();
            state.is_allocating = false;
            self.core.allocating_condition.notify_all();
            let buffers = allocated.map_err(Self::allocation_error)?;
            state.ensure_alive()?;

            if Self::buffer_request(&state, width, height, format, usage) != request {
                // defaults changed while the lock was dropped
                continue;
            }
            let max = state.max_buffer_count(async_mode);
            for buffer in buffers {
                let Some(slot) = state.take_free_slot(max) else {
                    break;
                };
                buffer.set_generation_number(state.generation_number);
                let s = &mut state.slots[slot];
                s.buffer = Some(buffer);
                s.fence = Fence::NO_FENCE;
                state.free_buffers.push_front(slot);
            }
            self.core.dequeue_condition.notify_all();
            self.core.validate(&mut state)?;
            tracing::debug!(name = %state.consumer_name, count, "preallocated buffers");
            return Ok(());
        }
    }

    fn allow_allocation(&self, allow: bool) -> Result<()> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        state.allow_allocation = allow;
        self.core.dequeue_condition.notify_all();
        Ok(())
    }

    fn set_generation_number(&self, generation: u32) -> Result<()> {
        let mut state = self.core.state.lock();
        state.ensure_alive()?;
        state.generation_number = generation;
        Ok(())
    }

    fn consumer_name(&self) -> Result<String> {
        Ok(self.core.state.lock().consumer_name.clone())
    }
}

impl std::fmt::Debug for BufferQueueProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueueProducer")
            .field("core", &self.core)
            .finish()
    }
}
