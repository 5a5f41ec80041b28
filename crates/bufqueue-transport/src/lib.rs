//! bufqueue-transport - Marshal producer calls over channels.
//!
//! `ProducerServer` owns a real producer and replays every `ProducerRequest`
//! against it on a pool of worker threads. `RemoteProducer` implements
//! `GraphicBufferProducer` by sending one request per call and waiting for its
//! reply, so a client sees exactly the semantics of the wrapped producer.

use bufqueue_core::{
    Api, AttachBufferOutput, BufferHandle, DequeueBufferOutput, Error, Fence,
    GraphicBufferProducer, PixelFormat, ProducerListener, QueryKind, QueueBufferInput,
    QueueBufferOutput, Result, SidebandStream, Usage,
};
use crossbeam_channel as channel;
use std::sync::Arc;
use std::thread::JoinHandle;

type Reply<T> = channel::Sender<Result<T>>;

/// One marshalled producer call and the channel its result goes back on
pub enum ProducerRequest {
    RequestBuffer {
        slot: usize,
        reply: Reply<BufferHandle>,
    },
    SetBufferCount {
        count: usize,
        reply: Reply<()>,
    },
    SetMaxDequeuedBufferCount {
        count: usize,
        reply: Reply<()>,
    },
    DequeueBuffer {
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
        async_mode: bool,
        reply: Reply<DequeueBufferOutput>,
    },
    DetachBuffer {
        slot: usize,
        reply: Reply<BufferHandle>,
    },
    DetachNextBuffer {
        reply: Reply<(BufferHandle, Fence)>,
    },
    AttachBuffer {
        buffer: BufferHandle,
        reply: Reply<AttachBufferOutput>,
    },
    QueueBuffer {
        slot: usize,
        generation: u64,
        input: QueueBufferInput,
        reply: Reply<QueueBufferOutput>,
    },
    CancelBuffer {
        slot: usize,
        generation: u64,
        fence: Fence,
        reply: Reply<()>,
    },
    Query {
        what: QueryKind,
        reply: Reply<u32>,
    },
    Connect {
        listener: Option<Arc<dyn ProducerListener>>,
        api: Api,
        producer_controlled_by_app: bool,
        reply: Reply<QueueBufferOutput>,
    },
    Disconnect {
        api: Api,
        reply: Reply<()>,
    },
    SetSidebandStream {
        stream: Option<SidebandStream>,
        reply: Reply<()>,
    },
    AllocateBuffers {
        async_mode: bool,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
        reply: Reply<()>,
    },
    AllowAllocation {
        allow: bool,
        reply: Reply<()>,
    },
    SetGenerationNumber {
        generation: u32,
        reply: Reply<()>,
    },
    ConsumerName {
        reply: Reply<String>,
    },
}

impl ProducerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ProducerRequest::RequestBuffer { .. } => "request_buffer",
            ProducerRequest::SetBufferCount { .. } => "set_buffer_count",
            ProducerRequest::SetMaxDequeuedBufferCount { .. } => "set_max_dequeued_buffer_count",
            ProducerRequest::DequeueBuffer { .. } => "dequeue_buffer",
            ProducerRequest::DetachBuffer { .. } => "detach_buffer",
            ProducerRequest::DetachNextBuffer { .. } => "detach_next_buffer",
            ProducerRequest::AttachBuffer { .. } => "attach_buffer",
            ProducerRequest::QueueBuffer { .. } => "queue_buffer",
            ProducerRequest::CancelBuffer { .. } => "cancel_buffer",
            ProducerRequest::Query { .. } => "query",
            ProducerRequest::Connect { .. } => "connect",
            ProducerRequest::Disconnect { .. } => "disconnect",
            ProducerRequest::SetSidebandStream { .. } => "set_sideband_stream",
            ProducerRequest::AllocateBuffers { .. } => "allocate_buffers",
            ProducerRequest::AllowAllocation { .. } => "allow_allocation",
            ProducerRequest::SetGenerationNumber { .. } => "set_generation_number",
            ProducerRequest::ConsumerName { .. } => "consumer_name",
        }
    }

    /// Run the call against `producer` and send back its result.
    ///
    /// A caller that gave up waiting has dropped its receiver; the result is
    /// discarded in that case.
    pub fn dispatch(self, producer: &dyn GraphicBufferProducer) {
        match self {
            ProducerRequest::RequestBuffer { slot, reply } => {
                let _ = reply.send(producer.request_buffer(slot));
            }
            ProducerRequest::SetBufferCount { count, reply } => {
                let _ = reply.send(producer.set_buffer_count(count));
            }
            ProducerRequest::SetMaxDequeuedBufferCount { count, reply } => {
                let _ = reply.send(producer.set_max_dequeued_buffer_count(count));
            }
            ProducerRequest::DequeueBuffer {
                width,
                height,
                format,
                usage,
                async_mode,
                reply,
            } => {
                let _ = reply.send(producer.dequeue_buffer(width, height, format, usage, async_mode));
            }
            ProducerRequest::DetachBuffer { slot, reply } => {
                let _ = reply.send(producer.detach_buffer(slot));
            }
            ProducerRequest::DetachNextBuffer { reply } => {
                let _ = reply.send(producer.detach_next_buffer());
            }
            ProducerRequest::AttachBuffer { buffer, reply } => {
                let _ = reply.send(producer.attach_buffer(buffer));
            }
            ProducerRequest::QueueBuffer {
                slot,
                generation,
                input,
                reply,
            } => {
                let _ = reply.send(producer.queue_buffer(slot, generation, input));
            }
            ProducerRequest::CancelBuffer {
                slot,
                generation,
                fence,
                reply,
            } => {
                let _ = reply.send(producer.cancel_buffer(slot, generation, fence));
            }
            ProducerRequest::Query { what, reply } => {
                let _ = reply.send(producer.query(what));
            }
            ProducerRequest::Connect {
                listener,
                api,
                producer_controlled_by_app,
                reply,
            } => {
                let _ = reply.send(producer.connect(listener, api, producer_controlled_by_app));
            }
            ProducerRequest::Disconnect { api, reply } => {
                let _ = reply.send(producer.disconnect(api));
            }
            ProducerRequest::SetSidebandStream { stream, reply } => {
                let _ = reply.send(producer.set_sideband_stream(stream));
            }
            ProducerRequest::AllocateBuffers {
                async_mode,
                width,
                height,
                format,
                usage,
                reply,
            } => {
                let _ = reply.send(producer.allocate_buffers(async_mode, width, height, format, usage));
            }
            ProducerRequest::AllowAllocation { allow, reply } => {
                let _ = reply.send(producer.allow_allocation(allow));
            }
            ProducerRequest::SetGenerationNumber { generation, reply } => {
                let _ = reply.send(producer.set_generation_number(generation));
            }
            ProducerRequest::ConsumerName { reply } => {
                let _ = reply.send(producer.consumer_name());
            }
        }
    }
}

/// Worker pool serving requests for one producer.
///
/// Workers exit once every `RemoteProducer` connected to the server has been
/// dropped and the request channel drains.
pub struct ProducerServer {
    workers: Vec<JoinHandle<()>>,
}

impl ProducerServer {
    /// Start `workers` threads (at least one) serving `producer`.
    ///
    /// Use more than one worker if a client may issue a call that unblocks
    /// another in-flight call, such as a cancel releasing a blocked dequeue.
    pub fn spawn<P>(producer: P, workers: usize) -> Result<(Self, RemoteProducer)>
    where
        P: GraphicBufferProducer + 'static,
    {
        let producer: Arc<dyn GraphicBufferProducer> = Arc::new(producer);
        let (tx, rx) = channel::unbounded::<ProducerRequest>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let rx = rx.clone();
            let producer = producer.clone();
            let handle = std::thread::Builder::new()
                .name(format!("bufq-producer-{}", index))
                .spawn(move || {
                    for request in rx.iter() {
                        tracing::trace!(worker = index, call = request.name(), "dispatching");
                        request.dispatch(producer.as_ref());
                    }
                    tracing::debug!(worker = index, "producer transport closed");
                })
                .map_err(|e| Error::NoMemory(format!("failed to spawn transport worker: {}", e)))?;
            handles.push(handle);
        }

        Ok((Self { workers: handles }, RemoteProducer { tx }))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit
    pub fn join(self) {
        for handle in self.workers {
            if handle.join().is_err() {
                tracing::error!("producer transport worker panicked");
            }
        }
    }
}

/// Client end of a `ProducerServer`
#[derive(Clone)]
pub struct RemoteProducer {
    tx: channel::Sender<ProducerRequest>,
}

impl RemoteProducer {
    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> ProducerRequest) -> Result<T> {
        let (reply, response) = channel::bounded(1);
        self.tx
            .send(request(reply))
            .map_err(|_| Error::TransportClosed)?;
        response.recv().map_err(|_| Error::TransportClosed)?
    }
}

impl GraphicBufferProducer for RemoteProducer {
    fn request_buffer(&self, slot: usize) -> Result<BufferHandle> {
        self.call(|reply| ProducerRequest::RequestBuffer { slot, reply })
    }

    fn set_buffer_count(&self, count: usize) -> Result<()> {
        self.call(|reply| ProducerRequest::SetBufferCount { count, reply })
    }

    fn set_max_dequeued_buffer_count(&self, count: usize) -> Result<()> {
        self.call(|reply| ProducerRequest::SetMaxDequeuedBufferCount { count, reply })
    }

    fn dequeue_buffer(
        &self,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
        async_mode: bool,
    ) -> Result<DequeueBufferOutput> {
        self.call(|reply| ProducerRequest::DequeueBuffer {
            width,
            height,
            format,
            usage,
            async_mode,
            reply,
        })
    }

    fn detach_buffer(&self, slot: usize) -> Result<BufferHandle> {
        self.call(|reply| ProducerRequest::DetachBuffer { slot, reply })
    }

    fn detach_next_buffer(&self) -> Result<(BufferHandle, Fence)> {
        self.call(|reply| ProducerRequest::DetachNextBuffer { reply })
    }

    fn attach_buffer(&self, buffer: BufferHandle) -> Result<AttachBufferOutput> {
        self.call(|reply| ProducerRequest::AttachBuffer { buffer, reply })
    }

    fn queue_buffer(
        &self,
        slot: usize,
        generation: u64,
        input: QueueBufferInput,
    ) -> Result<QueueBufferOutput> {
        self.call(|reply| ProducerRequest::QueueBuffer {
            slot,
            generation,
            input,
            reply,
        })
    }

    fn cancel_buffer(&self, slot: usize, generation: u64, fence: Fence) -> Result<()> {
        self.call(|reply| ProducerRequest::CancelBuffer {
            slot,
            generation,
            fence,
            reply,
        })
    }

    fn query(&self, what: QueryKind) -> Result<u32> {
        self.call(|reply| ProducerRequest::Query { what, reply })
    }

    fn connect(
        &self,
        listener: Option<Arc<dyn ProducerListener>>,
        api: Api,
        producer_controlled_by_app: bool,
    ) -> Result<QueueBufferOutput> {
        self.call(|reply| ProducerRequest::Connect {
            listener,
            api,
            producer_controlled_by_app,
            reply,
        })
    }

    fn disconnect(&self, api: Api) -> Result<()> {
        self.call(|reply| ProducerRequest::Disconnect { api, reply })
    }

    fn set_sideband_stream(&self, stream: Option<SidebandStream>) -> Result<()> {
        self.call(|reply| ProducerRequest::SetSidebandStream { stream, reply })
    }

    fn allocate_buffers(
        &self,
        async_mode: bool,
        width: u32,
        height: u32,
        format: Option<PixelFormat>,
        usage: Usage,
    ) -> Result<()> {
        self.call(|reply| ProducerRequest::AllocateBuffers {
            async_mode,
            width,
            height,
            format,
            usage,
            reply,
        })
    }

    fn allow_allocation(&self, allow: bool) -> Result<()> {
        self.call(|reply| ProducerRequest::AllowAllocation { allow, reply })
    }

    fn set_generation_number(&self, generation: u32) -> Result<()> {
        self.call(|reply| ProducerRequest::SetGenerationNumber { generation, reply })
    }

    fn consumer_name(&self) -> Result<String> {
        self.call(|reply| ProducerRequest::ConsumerName { reply })
    }
}
