//! Producer/consumer contract tests for a single in-process queue

use bufqueue_core::{
    AccessMode, AcquireOutcome, Api, BufferHandle, BufferItem, BufferQueue, BufferQueueConsumer,
    BufferQueueProducer, ConsumerListener, DeviceCaps, Error, Fence, FrameInfo,
    GraphicBufferAlloc, GraphicBufferConsumer, GraphicBufferProducer, HeapAllocator,
    NativeHandle, PixelFormat, ProducerListener, QueryKind, QueueBufferInput, QueueConfig, Rect,
    Usage, MAX_MAX_ACQUIRED_BUFFERS, NUM_BUFFER_SLOTS,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const TEST_DATA: u32 = 0x12345678;

struct DummyConsumer;

impl ConsumerListener for DummyConsumer {
    fn on_frame_available(&self, _frame: &FrameInfo) {}
    fn on_buffers_released(&self) {}
    fn on_sideband_stream_changed(&self) {}
}

struct DummyProducerListener;

impl ProducerListener for DummyProducerListener {
    fn on_buffer_released(&self) {}
}

#[derive(Default)]
struct ReleaseCounter {
    released: AtomicUsize,
}

impl ReleaseCounter {
    fn count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ProducerListener for ReleaseCounter {
    fn on_buffer_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records which frame callback fired for each frame
#[derive(Default)]
struct FrameLog {
    events: Mutex<Vec<(&'static str, u64)>>,
}

impl ConsumerListener for FrameLog {
    fn on_frame_available(&self, frame: &FrameInfo) {
        self.events.lock().push(("available", frame.frame_number));
    }

    fn on_frame_replaced(&self, frame: &FrameInfo) {
        self.events.lock().push(("replaced", frame.frame_number));
    }

    fn on_buffers_released(&self) {}

    fn on_sideband_stream_changed(&self) {}
}

/// Fails its first allocation, then behaves like the heap allocator
#[derive(Default)]
struct FlakyAllocator {
    failed: AtomicBool,
    heap: HeapAllocator,
}

impl GraphicBufferAlloc for FlakyAllocator {
    fn create_graphic_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> bufqueue_core::Result<BufferHandle> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(Error::NoMemory("out of buffer memory".to_string()));
        }
        self.heap.create_graphic_buffer(width, height, format, usage)
    }
}

fn connected_queue(controlled_by_app: bool) -> (BufferQueueProducer, BufferQueueConsumer) {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    consumer
        .consumer_connect(Arc::new(DummyConsumer), controlled_by_app)
        .unwrap();
    producer
        .connect(
            Some(Arc::new(DummyProducerListener)),
            Api::Cpu,
            controlled_by_app,
        )
        .unwrap();
    (producer, consumer)
}

fn queue_input() -> QueueBufferInput {
    QueueBufferInput::new(0, Fence::NO_FENCE).with_crop(Rect::new(0, 0, 1, 1))
}

fn acquire(consumer: &BufferQueueConsumer) -> BufferItem {
    match consumer.acquire_buffer(0, 0).unwrap() {
        AcquireOutcome::Acquired(item) => item,
        other => panic!("expected a frame, got {:?}", other),
    }
}

fn write_word(buffer: &BufferHandle, value: u32) {
    let mut guard = buffer.lock(AccessMode::ReadWrite);
    guard.as_mut_slice().unwrap()[..4].copy_from_slice(&value.to_ne_bytes());
}

fn read_word(buffer: &BufferHandle) -> u32 {
    let guard = buffer.lock(AccessMode::ReadOnly);
    let mut word = [0u8; 4];
    word.copy_from_slice(&guard.as_slice()[..4]);
    u32::from_ne_bytes(word)
}

#[test]
fn test_acquire_beyond_max_acquired_count_fails() {
    let (producer, consumer) = connected_queue(false);
    producer.set_buffer_count(4).unwrap();

    let first = producer
        .dequeue_buffer(1, 1, None, Usage::SW_READ_OFTEN, false)
        .unwrap();
    assert!(first.flags.needs_reallocation);
    producer.request_buffer(first.slot).unwrap();
    producer.queue_buffer(first.slot, first.generation, queue_input()).unwrap();
    let held = acquire(&consumer);

    let second = producer
        .dequeue_buffer(1, 1, None, Usage::SW_READ_OFTEN, false)
        .unwrap();
    assert!(second.flags.needs_reallocation);
    producer.request_buffer(second.slot).unwrap();
    producer.queue_buffer(second.slot, second.generation, queue_input()).unwrap();

    // one buffer is already acquired and the limit is one
    assert!(matches!(
        consumer.acquire_buffer(0, 0),
        Err(Error::InvalidOperation(_))
    ));

    consumer
        .release_buffer(held.slot, held.frame_number, Fence::NO_FENCE)
        .unwrap();
    let next = acquire(&consumer);
    assert_eq!(next.slot, second.slot);
}

#[test]
fn test_set_max_acquired_buffer_count_with_illegal_values() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();

    let min = producer.query(QueryKind::MinUndequeuedBuffers).unwrap() as usize;
    assert!(matches!(
        consumer.set_max_acquired_buffer_count(min - 1),
        Err(Error::InvalidArgument(_))
    ));
    assert!(consumer.set_max_acquired_buffer_count(0).is_err());
    assert!(consumer
        .set_max_acquired_buffer_count(MAX_MAX_ACQUIRED_BUFFERS + 1)
        .is_err());
    assert!(consumer.set_max_acquired_buffer_count(100).is_err());
}

#[test]
fn test_set_max_acquired_buffer_count_with_legal_values() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();

    let min = producer.query(QueryKind::MinUndequeuedBuffers).unwrap() as usize;
    consumer.set_max_acquired_buffer_count(1).unwrap();
    consumer.set_max_acquired_buffer_count(2).unwrap();
    consumer.set_max_acquired_buffer_count(min).unwrap();
    consumer
        .set_max_acquired_buffer_count(MAX_MAX_ACQUIRED_BUFFERS)
        .unwrap();
}

#[test]
fn test_set_max_acquired_buffer_count_while_connected() {
    let (_producer, consumer) = connected_queue(false);
    assert!(matches!(
        consumer.set_max_acquired_buffer_count(2),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_detach_and_reattach_on_producer_side() {
    let (producer, consumer) = connected_queue(false);

    assert!(matches!(
        producer.detach_buffer(NUM_BUFFER_SLOTS),
        Err(Error::InvalidArgument(_))
    ));
    // not dequeued
    assert!(producer.detach_buffer(0).is_err());

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
        .unwrap();
    assert!(dequeued.flags.needs_reallocation);
    // not requested
    assert!(producer.detach_buffer(dequeued.slot).is_err());
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    let detached = producer.detach_buffer(dequeued.slot).unwrap();
    assert!(Arc::ptr_eq(&buffer, &detached));
    assert!(producer.detach_buffer(dequeued.slot).is_err());
    assert!(producer.request_buffer(dequeued.slot).is_err());

    write_word(&buffer, TEST_DATA);

    let attached = producer.attach_buffer(buffer).unwrap();
    producer.queue_buffer(attached.slot, attached.generation, queue_input()).unwrap();

    let item = acquire(&consumer);
    let received = item.graphic_buffer.expect("attached buffer is sent on acquire");
    assert_eq!(read_word(&received), TEST_DATA);
}

#[test]
fn test_detach_and_reattach_on_consumer_side() {
    let (producer, consumer) = connected_queue(false);

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
        .unwrap();
    producer.request_buffer(dequeued.slot).unwrap();
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();

    assert!(matches!(
        consumer.detach_buffer(NUM_BUFFER_SLOTS),
        Err(Error::InvalidArgument(_))
    ));
    // queued, not acquired
    assert!(consumer.detach_buffer(dequeued.slot).is_err());

    let item = acquire(&consumer);
    let buffer = consumer.detach_buffer(item.slot).unwrap();
    assert!(consumer.detach_buffer(item.slot).is_err());

    write_word(&buffer, TEST_DATA);

    let slot = consumer.attach_buffer(buffer.clone()).unwrap();
    consumer.release_buffer(slot, 0, Fence::NO_FENCE).unwrap();

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
        .unwrap();
    assert!(dequeued.flags.needs_reallocation);
    let reused = producer.request_buffer(dequeued.slot).unwrap();
    assert!(Arc::ptr_eq(&reused, &buffer));
    assert_eq!(read_word(&reused), TEST_DATA);
}

#[test]
fn test_move_from_consumer_to_producer() {
    let (producer, consumer) = connected_queue(false);

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
        .unwrap();
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    write_word(&buffer, TEST_DATA);
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();

    let item = acquire(&consumer);
    let moved = consumer.detach_buffer(item.slot).unwrap();

    let attached = producer.attach_buffer(moved).unwrap();
    producer.queue_buffer(attached.slot, attached.generation, queue_input()).unwrap();

    let item = acquire(&consumer);
    let received = item.graphic_buffer.expect("attached buffer is sent on acquire");
    assert_eq!(read_word(&received), TEST_DATA);
}

#[test]
fn test_disallowing_allocation() {
    let (producer, consumer) = connected_queue(true);
    consumer.set_default_buffer_size(320, 240).unwrap();

    producer.allow_allocation(false).unwrap();
    assert_eq!(
        producer
            .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
            .unwrap_err(),
        Error::WouldBlock
    );

    producer.allow_allocation(true).unwrap();
    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)
        .unwrap();
    assert!(dequeued.flags.needs_reallocation);
    producer.cancel_buffer(dequeued.slot, dequeued.generation, dequeued.fence).unwrap();

    // a different size would need a new buffer
    producer.allow_allocation(false).unwrap();
    assert_eq!(
        producer
            .dequeue_buffer(640, 480, None, Usage::SW_WRITE_OFTEN, false)
            .unwrap_err(),
        Error::WouldBlock
    );
}

#[test]
fn test_generation_numbers() {
    let (producer, consumer) = connected_queue(true);
    producer.set_generation_number(1).unwrap();

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::NONE, false)
        .unwrap();
    assert!(dequeued.flags.needs_reallocation);
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    assert_eq!(buffer.generation_number(), 1);

    producer.detach_buffer(dequeued.slot).unwrap();
    producer.set_generation_number(2).unwrap();

    assert!(matches!(
        producer.attach_buffer(buffer.clone()),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        consumer.attach_buffer(buffer.clone()),
        Err(Error::InvalidArgument(_))
    ));

    buffer.set_generation_number(2);
    let attached = producer.attach_buffer(buffer.clone()).unwrap();
    producer.detach_buffer(attached.slot).unwrap();
    consumer.attach_buffer(buffer).unwrap();
}

#[test]
fn test_generation_number_change_keeps_dequeued_slots() {
    let (producer, consumer) = connected_queue(false);

    let first = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.set_generation_number(7).unwrap();
    producer.request_buffer(first.slot).unwrap();
    producer
        .queue_buffer(first.slot, first.generation, queue_input())
        .unwrap();

    let second = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    let buffer = producer.request_buffer(second.slot).unwrap();
    assert_eq!(buffer.generation_number(), 7);
    producer.set_generation_number(8).unwrap();
    producer
        .cancel_buffer(second.slot, second.generation, Fence::NO_FENCE)
        .unwrap();

    let again = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert_eq!(again.slot, second.slot);
    assert!(!again.flags.needs_reallocation);
    assert_eq!(acquire(&consumer).slot, first.slot);
}

#[test]
fn test_round_trip_returns_slot_unchanged() {
    let (producer, consumer) = connected_queue(false);

    let dequeued = producer
        .dequeue_buffer(0, 0, None, Usage::NONE, false)
        .unwrap();
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();

    let item = acquire(&consumer);
    assert_eq!(item.slot, dequeued.slot);
    assert!(Arc::ptr_eq(item.graphic_buffer.as_ref().unwrap(), &buffer));
    let release_fence = Fence::signaled();
    consumer
        .release_buffer(item.slot, item.frame_number, release_fence.clone())
        .unwrap();

    let again = producer
        .dequeue_buffer(0, 0, None, Usage::NONE, false)
        .unwrap();
    assert_eq!(again.slot, dequeued.slot);
    assert!(!again.flags.needs_reallocation);
    assert_eq!(again.fence, release_fence);
    assert!(Arc::ptr_eq(&producer.request_buffer(again.slot).unwrap(), &buffer));

    // the consumer already caches this slot's buffer
    producer.queue_buffer(again.slot, again.generation, queue_input()).unwrap();
    let item = acquire(&consumer);
    assert!(item.graphic_buffer.is_none());
    assert!(item.acquire_called);
}

#[test]
fn test_frames_acquired_in_queue_order() {
    let (producer, consumer) = connected_queue(false);
    producer.set_buffer_count(5).unwrap();

    let mut queued = Vec::new();
    for ts in 0..3 {
        let dequeued = producer
            .dequeue_buffer(0, 0, None, Usage::NONE, false)
            .unwrap();
        producer.request_buffer(dequeued.slot).unwrap();
        let output = producer
            .queue_buffer(dequeued.slot, dequeued.generation, QueueBufferInput::new(ts * 10, Fence::NO_FENCE))
            .unwrap();
        assert_eq!(output.num_pending_buffers, queued.len() + 1);
        queued.push(dequeued.slot);
    }

    let mut last_frame = 0;
    for slot in queued {
        let item = acquire(&consumer);
        assert_eq!(item.slot, slot);
        assert!(item.frame_number > last_frame);
        last_frame = item.frame_number;
        consumer
            .release_buffer(item.slot, item.frame_number, Fence::NO_FENCE)
            .unwrap();
    }
    assert!(matches!(
        consumer.acquire_buffer(0, 0).unwrap(),
        AcquireOutcome::NoBufferAvailable
    ));
}

#[test]
fn test_queue_validation() {
    let (producer, _consumer) = connected_queue(false);

    let dequeued = producer
        .dequeue_buffer(4, 4, None, Usage::NONE, false)
        .unwrap();
    // requestBuffer was never called
    assert!(producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).is_err());
    producer.request_buffer(dequeued.slot).unwrap();

    let outside = QueueBufferInput::new(0, Fence::NO_FENCE).with_crop(Rect::new(0, 0, 5, 4));
    assert!(matches!(
        producer.queue_buffer(dequeued.slot, dequeued.generation, outside),
        Err(Error::InvalidArgument(_))
    ));

    producer
        .queue_buffer(dequeued.slot, dequeued.generation, QueueBufferInput::new(100, Fence::NO_FENCE))
        .unwrap();
    // not dequeued any more
    assert!(producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).is_err());
}

#[test]
fn test_timestamps_must_not_go_backwards() {
    let (producer, _consumer) = connected_queue(false);
    producer.set_buffer_count(4).unwrap();

    let first = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(first.slot).unwrap();
    producer
        .queue_buffer(first.slot, first.generation, QueueBufferInput::new(1_000, Fence::NO_FENCE))
        .unwrap();

    let second = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(second.slot).unwrap();
    assert!(matches!(
        producer.queue_buffer(second.slot, second.generation, QueueBufferInput::new(999, Fence::NO_FENCE)),
        Err(Error::InvalidArgument(_))
    ));
    let auto = QueueBufferInput::new(5, Fence::NO_FENCE).with_auto_timestamp(true);
    producer.queue_buffer(second.slot, second.generation, auto).unwrap();
}

#[test]
fn test_connect_rules() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    assert_eq!(
        producer.connect(None, Api::Cpu, false).unwrap_err(),
        Error::NotConnected("consumer")
    );
    assert_eq!(
        producer
            .dequeue_buffer(0, 0, None, Usage::NONE, false)
            .unwrap_err(),
        Error::NotConnected("producer")
    );

    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();
    producer.connect(None, Api::Cpu, false).unwrap();
    assert_eq!(
        producer.connect(None, Api::Egl, false).unwrap_err(),
        Error::WrongConnection {
            current: Some(Api::Cpu),
            requested: Api::Egl
        }
    );
    assert!(matches!(
        producer.disconnect(Api::Egl),
        Err(Error::WrongConnection { .. })
    ));
    producer.disconnect(Api::Cpu).unwrap();
    producer.connect(None, Api::Egl, false).unwrap();
}

#[test]
fn test_reconnect_invalidates_old_slots() {
    let (producer, consumer) = connected_queue(false);

    let stale = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(stale.slot).unwrap();
    producer.disconnect(Api::Cpu).unwrap();
    let output = producer.connect(None, Api::Cpu, false).unwrap();
    assert_ne!(output.generation, stale.generation);

    // the new connection owns the same slot index
    let fresh = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert_eq!(fresh.slot, stale.slot);
    assert_eq!(fresh.generation, output.generation);
    producer.request_buffer(fresh.slot).unwrap();

    assert_eq!(
        producer
            .queue_buffer(stale.slot, stale.generation, queue_input())
            .unwrap_err(),
        Error::StaleBufferSlot { slot: stale.slot }
    );
    assert_eq!(
        producer
            .cancel_buffer(stale.slot, stale.generation, Fence::NO_FENCE)
            .unwrap_err(),
        Error::StaleBufferSlot { slot: stale.slot }
    );
    assert!(matches!(
        consumer.acquire_buffer(0, 0).unwrap(),
        AcquireOutcome::NoBufferAvailable
    ));

    producer
        .queue_buffer(fresh.slot, fresh.generation, queue_input())
        .unwrap();
    let item = acquire(&consumer);
    assert_eq!(item.slot, fresh.slot);
    assert_eq!(item.frame_number, 1);
}

#[test]
fn test_acquired_buffer_survives_disconnect() {
    let (producer, consumer) = connected_queue(false);

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(dequeued.slot).unwrap();
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();
    let item = acquire(&consumer);

    producer.disconnect(Api::Cpu).unwrap();
    assert!(item.graphic_buffer.is_some());
    consumer
        .release_buffer(item.slot, item.frame_number, Fence::NO_FENCE)
        .unwrap();
    assert_eq!(
        consumer.release_buffer(item.slot, item.frame_number, Fence::NO_FENCE),
        Err(Error::StaleBufferSlot { slot: item.slot })
    );

    producer.connect(None, Api::Cpu, false).unwrap();
    let fresh = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert!(fresh.flags.needs_reallocation);
}

#[test]
fn test_stale_release_is_benign() {
    let (producer, consumer) = connected_queue(false);

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(dequeued.slot).unwrap();
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();
    let item = acquire(&consumer);

    let err = consumer
        .release_buffer(item.slot, item.frame_number + 1, Fence::NO_FENCE)
        .unwrap_err();
    assert!(err.is_benign());
    consumer
        .release_buffer(item.slot, item.frame_number, Fence::NO_FENCE)
        .unwrap();
}

#[test]
fn test_set_buffer_count_rules() {
    let (producer, _consumer) = connected_queue(false);
    let min = producer.query(QueryKind::MinUndequeuedBuffers).unwrap() as usize;

    assert!(producer.set_buffer_count(min).is_err());
    assert!(producer.set_buffer_count(NUM_BUFFER_SLOTS + 1).is_err());
    producer.set_buffer_count(min + 1).unwrap();
    assert_eq!(
        producer.query(QueryKind::MaxBufferCount).unwrap() as usize,
        min + 1
    );

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert!(matches!(
        producer.set_buffer_count(4),
        Err(Error::InvalidArgument(_))
    ));
    producer.cancel_buffer(dequeued.slot, dequeued.generation, Fence::NO_FENCE).unwrap();
    producer.set_buffer_count(4).unwrap();
    producer.set_buffer_count(0).unwrap();
}

#[test]
fn test_detach_next_buffer() {
    let (producer, _consumer) = connected_queue(false);
    assert!(matches!(
        producer.detach_next_buffer(),
        Err(Error::NoMemory(_))
    ));

    producer
        .allocate_buffers(false, 0, 0, None, Usage::NONE)
        .unwrap();
    let (buffer, fence) = producer.detach_next_buffer().unwrap();
    assert_eq!((buffer.width(), buffer.height()), (1, 1));
    assert!(!fence.is_valid());
    producer.detach_next_buffer().unwrap();
    assert!(producer.detach_next_buffer().is_err());
}

#[test]
fn test_allocate_buffers_fills_slots() {
    let (producer, consumer) = connected_queue(false);
    consumer.set_default_buffer_size(64, 32).unwrap();
    producer
        .allocate_buffers(false, 0, 0, None, Usage::NONE)
        .unwrap();

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert!(!dequeued.flags.needs_reallocation);
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (64, 32));

    producer.allow_allocation(false).unwrap();
    assert!(matches!(
        producer.allocate_buffers(false, 0, 0, None, Usage::NONE),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_query_reports_defaults() {
    let (producer, consumer) = connected_queue(false);
    consumer.set_default_buffer_size(640, 480).unwrap();
    consumer.set_consumer_usage_bits(Usage::HW_TEXTURE).unwrap();

    assert_eq!(producer.query(QueryKind::Width).unwrap(), 640);
    assert_eq!(producer.query(QueryKind::Height).unwrap(), 480);
    assert_eq!(producer.query(QueryKind::Format).unwrap(), 1);
    assert_eq!(
        producer.query(QueryKind::ConsumerUsageBits).unwrap(),
        Usage::HW_TEXTURE.bits()
    );
    assert_eq!(producer.query(QueryKind::ConsumerRunningBehind).unwrap(), 0);

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    let buffer = producer.request_buffer(dequeued.slot).unwrap();
    assert!(buffer.usage().contains(Usage::HW_TEXTURE));
    assert_eq!(buffer.width(), 640);
}

#[test]
fn test_dequeue_rejects_bad_dimensions() {
    let (producer, _consumer) = connected_queue(false);
    assert!(matches!(
        producer.dequeue_buffer(0, 16, None, Usage::NONE, false),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        producer.dequeue_buffer(100_000, 16, None, Usage::NONE, false),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_droppable_frame_is_replaced() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    let log = Arc::new(FrameLog::default());
    consumer.consumer_connect(log.clone(), true).unwrap();
    producer.connect(None, Api::Cpu, true).unwrap();

    let first = producer.dequeue_buffer(0, 0, None, Usage::NONE, true).unwrap();
    producer.request_buffer(first.slot).unwrap();
    producer
        .queue_buffer(first.slot, first.generation, QueueBufferInput::new(1, Fence::NO_FENCE).with_async(true))
        .unwrap();

    let second = producer.dequeue_buffer(0, 0, None, Usage::NONE, true).unwrap();
    producer.request_buffer(second.slot).unwrap();
    let output = producer
        .queue_buffer(second.slot, second.generation, QueueBufferInput::new(2, Fence::NO_FENCE).with_async(true))
        .unwrap();
    assert_eq!(output.num_pending_buffers, 1);

    assert_eq!(
        *log.events.lock(),
        vec![("available", 1), ("replaced", 2)]
    );

    let item = acquire(&consumer);
    assert_eq!(item.slot, second.slot);
    assert_eq!(item.frame_number, 2);
    assert!(item.is_droppable);
    assert!(matches!(
        consumer.acquire_buffer(0, 0).unwrap(),
        AcquireOutcome::NoBufferAvailable
    ));
}

#[test]
fn test_released_buffers_mask() {
    let (producer, consumer) = connected_queue(false);
    assert_eq!(consumer.get_released_buffers().unwrap(), u64::MAX);

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    producer.request_buffer(dequeued.slot).unwrap();
    producer.queue_buffer(dequeued.slot, dequeued.generation, queue_input()).unwrap();
    let item = acquire(&consumer);

    let mask = consumer.get_released_buffers().unwrap();
    assert_eq!(mask & (1 << item.slot), 0);
    assert_eq!(mask | (1 << item.slot), u64::MAX);
}

#[test]
fn test_consumer_disconnect_abandons_queue() {
    let (producer, consumer) = connected_queue(false);
    consumer.consumer_disconnect().unwrap();

    assert_eq!(
        producer
            .dequeue_buffer(0, 0, None, Usage::NONE, false)
            .unwrap_err(),
        Error::Abandoned
    );
    assert!(matches!(
        consumer.acquire_buffer(0, 0),
        Err(Error::Abandoned)
    ));
    // producer disconnect after abandonment is a no-op
    producer.disconnect(Api::Cpu).unwrap();
}

#[test]
fn test_consumer_settings() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    assert!(consumer.set_default_buffer_size(0, 10).is_err());
    assert!(consumer.set_default_max_buffer_count(1).is_err());

    consumer.disable_async_buffer().unwrap();
    consumer.set_default_max_buffer_count(1).unwrap();
    assert!(consumer.set_default_max_buffer_count(NUM_BUFFER_SLOTS + 1).is_err());

    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();
    assert!(matches!(
        consumer.disable_async_buffer(),
        Err(Error::InvalidOperation(_))
    ));

    consumer.set_transform_hint(0x04).unwrap();
    let output = producer.connect(None, Api::Media, false).unwrap();
    assert_eq!(output.transform_hint, 0x04);
    assert_eq!(output.next_frame_number, 1);
    assert!(consumer.dump("").contains("FIFO(0)"));
}

#[test]
fn test_sideband_stream_handoff() {
    let (producer, consumer) = connected_queue(false);
    assert!(consumer.get_sideband_stream().unwrap().is_none());

    let stream = Arc::new(NativeHandle {
        fds: vec![7],
        ints: vec![1, 2],
    });
    producer.set_sideband_stream(Some(stream.clone())).unwrap();
    let received = consumer.get_sideband_stream().unwrap().unwrap();
    assert!(Arc::ptr_eq(&received, &stream));

    // cleared with the connection
    producer.disconnect(Api::Cpu).unwrap();
    assert!(consumer.get_sideband_stream().unwrap().is_none());
}

#[test]
fn test_acquire_by_present_time() {
    let (producer, consumer) = BufferQueue::create_buffer_queue();
    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();
    let listener = Arc::new(ReleaseCounter::default());
    producer
        .connect(Some(listener.clone()), Api::Cpu, false)
        .unwrap();
    producer.set_buffer_count(3).unwrap();

    let mut slots = Vec::new();
    for ts in [100, 200, 300] {
        let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
        producer.request_buffer(dequeued.slot).unwrap();
        producer
            .queue_buffer(
                dequeued.slot,
                dequeued.generation,
                QueueBufferInput::new(ts, Fence::NO_FENCE),
            )
            .unwrap();
        slots.push(dequeued.slot);
    }

    assert!(matches!(
        consumer.acquire_buffer(50, 0).unwrap(),
        AcquireOutcome::PresentLater
    ));

    // frame 2 is due at 250, so frame 1 is dropped
    let item = match consumer.acquire_buffer(250, 0).unwrap() {
        AcquireOutcome::Acquired(item) => item,
        other => panic!("expected a frame, got {:?}", other),
    };
    assert_eq!((item.timestamp, item.frame_number), (200, 2));
    assert_eq!(listener.count(), 1);

    let reused = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert_eq!(reused.slot, slots[0]);
    assert!(!reused.flags.needs_reallocation);
    producer
        .cancel_buffer(reused.slot, reused.generation, Fence::NO_FENCE)
        .unwrap();

    consumer
        .release_buffer(item.slot, item.frame_number, Fence::NO_FENCE)
        .unwrap();
    assert_eq!(listener.count(), 2);

    // frame 3 is due but later than the frame number allowed
    assert!(matches!(
        consumer.acquire_buffer(400, 2).unwrap(),
        AcquireOutcome::PresentLater
    ));
    let last = consumer.acquire_buffer(400, 3).unwrap().into_item().unwrap();
    assert_eq!(last.frame_number, 3);
    assert_eq!(last.slot, slots[2]);
}

#[test]
fn test_failed_allocation_returns_slot() {
    let (producer, consumer) = BufferQueue::create_with_config(
        &QueueConfig::default(),
        DeviceCaps::default(),
        Arc::new(FlakyAllocator::default()),
    )
    .unwrap();
    consumer.consumer_connect(Arc::new(DummyConsumer), false).unwrap();
    producer.connect(None, Api::Cpu, false).unwrap();

    assert!(matches!(
        producer.dequeue_buffer(0, 0, None, Usage::NONE, false),
        Err(Error::NoMemory(_))
    ));

    let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
    assert_eq!(dequeued.slot, 0);
    assert!(dequeued.flags.needs_reallocation);
    producer.request_buffer(dequeued.slot).unwrap();
}

#[test]
fn test_attach_into_full_pool_fails() {
    let (producer, consumer) = connected_queue(false);
    producer.set_buffer_count(3).unwrap();

    let mut held = None;
    for _ in 0..3 {
        let dequeued = producer.dequeue_buffer(0, 0, None, Usage::NONE, false).unwrap();
        producer.request_buffer(dequeued.slot).unwrap();
        producer
            .queue_buffer(dequeued.slot, dequeued.generation, queue_input())
            .unwrap();
        if held.is_none() {
            held = Some(acquire(&consumer));
        }
    }
    let held = held.unwrap();

    // one slot acquired and two queued, none free
    let spare = HeapAllocator::new()
        .create_graphic_buffer(1, 1, PixelFormat::Rgba8888, Usage::NONE)
        .unwrap();
    assert!(matches!(
        producer.attach_buffer(spare.clone()),
        Err(Error::NoMemory(_))
    ));

    consumer
        .release_buffer(held.slot, held.frame_number, Fence::NO_FENCE)
        .unwrap();
    let attached = producer.attach_buffer(spare.clone()).unwrap();
    assert_eq!(attached.slot, held.slot);
    assert!(Arc::ptr_eq(
        &producer.request_buffer(attached.slot).unwrap(),
        &spare
    ));
}
