//! UDP ingest driver: a socket receive loop feeding a bounded decode pool.
//!
//! The receive loop only reads datagrams, parses headers and enqueues work;
//! payload decoding and cache publication happen on worker threads so one
//! slow decode cannot stall the socket. Stream correctness does not depend on
//! worker completion order because the reassembler enforces chunk ids.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashSet;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use crate::buffers::{ChunkBuffer, END_SENTINEL};
use crate::cache::{ChunkWrite, StaticCache, StaticEntry, StreamCache, StreamEntry, StreamKind};
use crate::config::UdpConfig;
use crate::error::DriverError;
use crate::net::PortPool;
use crate::protocol::{
    decode_frame, Body, Decoded, DispatchKey, FlowClass, FrameHeader, FrameType, HEADER_LEN,
};
use crate::registry::UidRegistry;
use crate::types::Value;

/// Driver lifecycle. Receive errors on live sockets do not change state;
/// a fatal socket error or an explicit stop transitions forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl DriverState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DriverState::Starting,
            1 => DriverState::Running,
            2 => DriverState::Stopping,
            _ => DriverState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DriverState::Starting => 0,
            DriverState::Running => 1,
            DriverState::Stopping => 2,
            DriverState::Stopped => 3,
        }
    }
}

struct DecodeJob {
    ty: FrameType,
    flow: FlowClass,
    payload: Vec<u8>,
    addr: SocketAddr,
}

/// One bound socket plus its caches and decode pool.
pub struct UdpDriver {
    pub ip: String,
    pub port: u16,
    cfg: UdpConfig,
    running: AtomicBool,
    state: AtomicU8,
    static_cache: Arc<StaticCache>,
    stream_cache: Arc<StreamCache>,
    registry: Arc<UidRegistry>,
    ports: Arc<PortPool>,
    job_tx: Mutex<Option<Sender<DecodeJob>>>,
    warned_keys: DashSet<DispatchKey>,
}

impl UdpDriver {
    /// Allocate a port and set up the caches. The caller still has to `bind`
    /// and `run`; a pool with no free port fails here.
    pub fn new(
        cfg: UdpConfig,
        ports: Arc<PortPool>,
        registry: Arc<UidRegistry>,
    ) -> Result<Self, DriverError> {
        let port = ports.allocate().ok_or(DriverError::PortExhausted)?;
        let static_cache = Arc::new(StaticCache::new(
            cfg.static_cache_entries,
            cfg.static_cache_bytes,
        ));
        let stream_cache = Arc::new(StreamCache::new(
            cfg.stream_cache_entries,
            cfg.stream_cache_bytes,
        ));
        Ok(Self {
            ip: cfg.listen_ip.clone(),
            port,
            cfg,
            running: AtomicBool::new(true),
            state: AtomicU8::new(DriverState::Starting.as_u8()),
            static_cache,
            stream_cache,
            registry,
            ports,
            job_tx: Mutex::new(None),
            warned_keys: DashSet::new(),
        })
    }

    /// Bind the driver's socket. Kept separate from [`run`](Self::run) so
    /// bind failures propagate to the manager's caller instead of dying
    /// inside a spawned task.
    pub async fn bind(&self) -> Result<UdpSocket, DriverError> {
        let socket = UdpSocket::bind((self.ip.as_str(), self.port)).await?;
        Ok(socket)
    }

    /// Receive loop. Runs until stopped, the socket fails fatally, or the
    /// owning task is cancelled.
    pub async fn run(self: Arc<Self>, socket: UdpSocket) {
        let (tx, rx) = bounded(self.cfg.queue_size.max(1));
        *self.job_tx.lock() = Some(tx.clone());
        self.spawn_workers(rx);
        self.state
            .store(DriverState::Running.as_u8(), Ordering::SeqCst);
        info!("udp driver listening on {}:{}", self.ip, self.port);

        let mut buf = vec![0u8; self.cfg.buffer_size.max(HEADER_LEN)];
        while self.running.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf).await {
                Ok((n, addr)) => {
                    if n < HEADER_LEN {
                        debug!("dropping short datagram ({n} bytes) from {addr}");
                        continue;
                    }
                    let Some(header) = FrameHeader::parse(&buf[..n]) else {
                        continue;
                    };
                    let Some((ty, flow)) = FrameType::lookup(header.key()) else {
                        if self.warned_keys.insert(header.key()) {
                            warn!(
                                "no decoder registered for key {:02x}.{:02x}.{:02x}",
                                header.channel, header.port, header.decode
                            );
                        }
                        continue;
                    };
                    let job = DecodeJob {
                        ty,
                        flow,
                        payload: buf[HEADER_LEN..n].to_vec(),
                        addr,
                    };
                    match tx.try_send(job) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("decode queue full; dropping frame from {addr}");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(e) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    error!("socket receive failed on port {}: {e}", self.port);
                    break;
                }
            }
        }
        drop(socket);
        drop(tx);
        self.stop();
    }

    /// Flip to stopped: close the decode queue without draining it and
    /// release the port. Idempotent; safe to call from the manager while the
    /// receive task is being cancelled.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.state
            .store(DriverState::Stopping.as_u8(), Ordering::SeqCst);
        self.job_tx.lock().take();
        self.ports.release(self.port);
        self.state
            .store(DriverState::Stopped.as_u8(), Ordering::SeqCst);
        info!("udp driver on port {} stopped", self.port);
    }

    pub fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn static_cache(&self) -> Arc<StaticCache> {
        Arc::clone(&self.static_cache)
    }

    pub fn stream_cache(&self) -> Arc<StreamCache> {
        Arc::clone(&self.stream_cache)
    }

    fn spawn_workers(self: &Arc<Self>, rx: Receiver<DecodeJob>) {
        for worker in 0..self.cfg.max_workers.max(1) {
            let rx = rx.clone();
            let driver = Arc::clone(self);
            thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    driver.handle_job(job);
                }
                debug!("decode worker {worker} exited");
            });
        }
    }

    fn handle_job(&self, job: DecodeJob) {
        let decoded = match decode_frame(job.ty, &job.payload, &self.registry) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("dropping {:?} frame from {}: {e}", job.ty, job.addr);
                return;
            }
        };
        match job.flow {
            FlowClass::Static => self.handle_static(decoded, job.addr),
            FlowClass::Init => self.handle_init(decoded, job.addr),
            FlowClass::Stream => self.handle_stream(decoded),
        }
    }

    /// Static flow: cache the latest value under its uid. Control frames
    /// without a uid (FIN/HEA/STO) are decoded for their route but produce no
    /// cache write; SEN is cached with the sensor name as payload.
    fn handle_static(&self, decoded: Decoded, addr: SocketAddr) {
        let value = match &decoded.body {
            Body::Scalar(value) => Some(value.clone()),
            Body::Control => decoded.name.clone().map(Value::Text),
            _ => None,
        };
        let (Some(uid), Some(data)) = (decoded.uid, value) else {
            debug!("{} frame has no cacheable payload", decoded.route);
            return;
        };
        self.static_cache.put(StaticEntry {
            id: decoded.id,
            uid,
            name: decoded.name,
            addr,
            timestamp: decoded.timestamp,
            data,
            route: decoded.route,
        });
    }

    /// Init flow: install a fresh descriptor. Only FLT-init supplies an
    /// expected length; audio and image streams end on the sentinel.
    fn handle_init(&self, decoded: Decoded, addr: SocketAddr) {
        let Some(uid) = decoded.uid else { return };
        let (kind, last) = match decoded.body {
            Body::TextInit { stream_length } => {
                (StreamKind::Text { stream_length }, stream_length)
            }
            Body::AudioInit {
                format,
                sample_rate,
                bit_depth,
                channels,
            } => (
                StreamKind::Audio {
                    format,
                    sample_rate,
                    bit_depth,
                    channels,
                },
                END_SENTINEL,
            ),
            Body::ImageInit { format, width, height } => {
                (StreamKind::Image { format, width, height }, END_SENTINEL)
            }
            _ => return,
        };
        debug!("initializing {} stream {uid}", kind.label());
        self.stream_cache.init_stream(StreamEntry {
            id: decoded.id,
            uid,
            name: decoded.name,
            addr,
            timestamp: decoded.timestamp,
            route: decoded.route,
            kind,
            buffer: ChunkBuffer::new(last),
        });
    }

    /// Stream flow: feed the chunk to an existing descriptor.
    fn handle_stream(&self, decoded: Decoded) {
        let Some(uid) = decoded.uid else { return };
        let Body::Chunk { chunk_id, data } = decoded.body else {
            return;
        };
        match self.stream_cache.add_chunk(uid, chunk_id, data) {
            ChunkWrite::Accepted { done: true } => debug!("stream {uid} complete"),
            ChunkWrite::Accepted { done: false } => {}
            // out-of-order chunks are dropped without so much as a log line
            ChunkWrite::OutOfOrder => {}
            ChunkWrite::UnknownUid => debug!("chunk for unknown stream {uid} dropped"),
            ChunkWrite::Overflow => debug!("stream {uid} chunk exceeds cache budget; dropped"),
        }
    }
}
