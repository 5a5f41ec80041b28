//! 帧循环演示 - producer 线程渲染，consumer 在回调通知后取帧
//!
//! 使用方法:
//! ```bash
//! RUST_LOG=bufqueue_core=debug cargo run --example frame_loop
//! ```

use bufqueue_core::{
    AccessMode, AcquireOutcome, Api, BufferQueue, ConsumerListener, Fence, FrameInfo,
    GraphicBufferConsumer, GraphicBufferProducer, QueueBufferInput, QueueConfig, Usage,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const FRAMES: u64 = 30;

/// 把帧通知转发到 channel
struct ChannelListener {
    tx: Sender<FrameInfo>,
}

impl ConsumerListener for ChannelListener {
    fn on_frame_available(&self, frame: &FrameInfo) {
        let _ = self.tx.send(*frame);
    }

    fn on_buffers_released(&self) {
        tracing::info!("consumer asked to drop cached buffers");
    }

    fn on_sideband_stream_changed(&self) {}
}

fn consume(consumer: impl GraphicBufferConsumer, frames: Receiver<FrameInfo>) {
    let mut received = 0;
    while let Ok(info) = frames.recv_timeout(Duration::from_secs(2)) {
        match consumer.acquire_buffer(0, 0) {
            Ok(AcquireOutcome::Acquired(item)) => {
                // 首次 acquire 某个 slot 时才会带上 buffer
                let first_byte = item
                    .graphic_buffer
                    .as_ref()
                    .map(|b| b.lock(AccessMode::ReadOnly).as_slice()[0]);
                println!(
                    "frame {} slot={} ts={} first_byte={:?}",
                    info.frame_number, item.slot, item.timestamp, first_byte
                );
                if let Err(e) = consumer.release_buffer(item.slot, item.frame_number, Fence::NO_FENCE) {
                    tracing::warn!(error = %e, "release failed");
                }
                received += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "acquire failed");
                break;
            }
        }
        if received == FRAMES {
            break;
        }
    }
    println!("consumed {} frames", received);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = QueueConfig {
        consumer_name: "frame-loop".to_string(),
        default_width: 320,
        default_height: 240,
        default_max_buffer_count: 3,
        max_dequeued_buffer_count: 2,
        ..QueueConfig::default()
    };
    let (producer, consumer) = BufferQueue::create_shared("/bufq_demo", &config)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    consumer.consumer_connect(Arc::new(ChannelListener { tx }), false)?;
    producer.connect(None, Api::Cpu, false)?;

    let render = thread::spawn(move || -> bufqueue_core::Result<()> {
        let start = Instant::now();
        for n in 0..FRAMES {
            let dequeued = producer.dequeue_buffer(0, 0, None, Usage::SW_WRITE_OFTEN, false)?;
            dequeued.fence.wait_forever("demo dequeue");
            let buffer = producer.request_buffer(dequeued.slot)?;
            {
                let mut guard = buffer.lock(AccessMode::ReadWrite);
                guard.as_mut_slice()?.fill(n as u8);
            }
            let ts = start.elapsed().as_nanos() as i64;
            producer.queue_buffer(dequeued.slot, dequeued.generation, QueueBufferInput::new(ts, Fence::NO_FENCE))?;
            thread::sleep(Duration::from_millis(5));
        }
        producer.disconnect(Api::Cpu)
    });

    consume(consumer.clone(), rx);
    render.join().map_err(|_| "render thread panicked")??;
    print!("{}", consumer.dump("demo"));
    Ok(())
}
