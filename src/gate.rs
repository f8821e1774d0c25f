// src/gate.rs
//! Contracts for the external collaborators named in the spec: the owning
//! input gate, the connection manager, the partition request client, the
//! buffer pool, and the buffer/memory segment themselves. Only the surface
//! this channel actually calls is modeled as a trait; everything else about
//! those components is out of scope.
//!
//! Also provides small in-memory test doubles (`Fake*`) used by the
//! integration tests — there is no real network transport in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bytes::BytesMut;

use crate::ids::{ConnectionId, InputChannelId, PartitionId};

/// Receiver-side backing store for one buffer. Modeled on the teacher's
/// `pool::Pkt`/`PacketPool`, which hand out reusable `BytesMut` regions.
pub struct MemorySegment {
    pub bytes: BytesMut,
}

impl MemorySegment {
    pub fn new(capacity: usize) -> Self {
        Self { bytes: BytesMut::with_capacity(capacity) }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Receives a drained buffer's backing memory so it can be returned to
/// wherever it came from (this channel's exclusive pool, or the shared
/// floating-buffer pool).
pub trait Recycler: Send + Sync {
    fn recycle(&self, segment: MemorySegment);
}

/// Which pool a buffer's backing segment belongs to. Tracked so teardown
/// code (`release_all_resources`) can route a buffer back to the right
/// place without routing through its recycler, which would mean performing
/// gate I/O while still holding the received-buffers lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Belongs to this channel's exclusive allotment.
    Exclusive,
    /// Borrowed from the shared floating-buffer pool.
    Floating,
}

/// A single receive buffer. Buffers are move-only handles in this crate:
/// Rust ownership already guarantees the "exactly one owner at a time"
/// discipline that the original's reference-counted `retain`/`recycleBuffer`
/// pair exists to enforce at runtime, so there is no separate `retain` here
/// — see DESIGN.md for the reasoning.
pub struct Buffer {
    segment: Option<MemorySegment>,
    recycler: Arc<dyn Recycler>,
    origin: BufferOrigin,
}

impl Buffer {
    pub fn new(segment: MemorySegment, recycler: Arc<dyn Recycler>, origin: BufferOrigin) -> Self {
        Self { segment: Some(segment), recycler, origin }
    }

    pub fn recycler(&self) -> &Arc<dyn Recycler> {
        &self.recycler
    }

    pub fn origin(&self) -> BufferOrigin {
        self.origin
    }

    /// `getSizeUnsafe`: a best-effort size read that does not need the
    /// buffer's owning monitor.
    pub fn size_unsafe(&self) -> usize {
        self.segment.as_ref().map(MemorySegment::size).unwrap_or(0)
    }

    pub fn memory_segment(&self) -> Option<&MemorySegment> {
        self.segment.as_ref()
    }

    /// Consumes the buffer, handing its backing segment to the recycler.
    pub fn recycle_buffer(mut self) {
        if let Some(seg) = self.segment.take() {
            self.recycler.recycle(seg);
        }
    }

    /// Consumes the buffer, extracting its raw segment without invoking the
    /// recycler. Used only by `release_all_resources`'s batch teardown path,
    /// which returns every exclusive segment to the gate in one call instead
    /// of recycling them one at a time.
    pub fn into_memory_segment(mut self) -> Option<MemorySegment> {
        self.segment.take()
    }
}

/// Outcome of a buffer-pool listener callback.
pub enum NotificationResult {
    BufferUsed { needs_more_buffers: bool },
    BufferNotUsed,
}

/// Implemented by anything that wants to be told when the shared buffer
/// pool has a floating buffer free. `RemoteInputChannel` implements this.
pub trait BufferAvailableListener: Send + Sync {
    fn notify_buffer_available(&self, buffer: Buffer) -> NotificationResult;
}

/// The shared floating-buffer pool.
pub trait BufferPool: Send + Sync {
    fn request_buffer(&self) -> Option<Buffer>;
    /// Registers `listener` to be notified once a buffer frees up. Returns
    /// `false` if the pool is shutting down and will never call back.
    fn add_buffer_listener(&self, listener: Arc<dyn BufferAvailableListener>) -> bool;
    fn recycle(&self, segment: MemorySegment);
}

/// Task events sent upstream. The in-flight-log request variant is
/// distinguished from the rest because it alone may be sent before a normal
/// subscription exists (it is how a recovering task asks the producer for
/// historical buffers).
#[derive(Debug, Clone)]
pub enum TaskEvent {
    InFlightLogRequest,
    CheckpointCompleted { checkpoint_id: u64 },
    User(Vec<u8>),
}

impl TaskEvent {
    pub fn is_in_flight_log_request(&self) -> bool {
        matches!(self, TaskEvent::InFlightLogRequest)
    }
}

/// Per-connection client that talks to one producer: sends subpartition
/// requests, task events and credit announcements, and (out of band, not
/// modeled here) invokes the channel's `on_buffer`/`on_sender_backlog`/...
/// callbacks as frames arrive.
pub trait PartitionRequestClient: Send + Sync {
    fn request_subpartition(
        &self,
        partition_id: PartitionId,
        subpartition_index: usize,
        channel_id: InputChannelId,
        backoff: std::time::Duration,
    ) -> Result<()>;

    fn send_task_event(
        &self,
        partition_id: PartitionId,
        event: TaskEvent,
        channel_id: InputChannelId,
    ) -> Result<()>;

    fn notify_credit_available(&self, channel_id: InputChannelId, credit: u64) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Factory producing (possibly shared) clients bound to a producer address.
pub trait ConnectionManager: Send + Sync {
    fn create_partition_request_client(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Arc<dyn PartitionRequestClient>>;

    /// Closes any client connections associated with `connection_id` that
    /// this channel never got around to creating itself (the orphan-close
    /// path used by `release_all_resources` when no client was ever made).
    fn close_channel_connections(&self, connection_id: ConnectionId, channel_id: InputChannelId);
}

/// The owning task-level input gate.
pub trait InputGate: Send + Sync {
    fn buffer_pool(&self) -> Arc<dyn BufferPool>;
    fn return_exclusive_segments(&self, segments: Vec<MemorySegment>);
    fn notify_channel_non_empty(&self, channel_id: InputChannelId);
    fn trigger_partition_state_check(&self, partition_id: PartitionId);
    fn trigger_fail_producer(&self, partition_id: PartitionId, cause: anyhow::Error);
    fn is_credit_based(&self) -> bool;
    /// Assigns this channel its exclusive segments, e.g. after
    /// `to_new_remote_input_channel` constructs a reincarnated channel.
    fn assign_exclusive_segments(&self, channel: &crate::channel::RemoteInputChannel) -> Result<()>;
}

// -------------------------- in-memory test doubles --------------------------

struct PoolRecycler(std::sync::Weak<FakeBufferPoolInner>);

impl Recycler for PoolRecycler {
    fn recycle(&self, segment: MemorySegment) {
        if let Some(inner) = self.0.upgrade() {
            inner.put(segment);
        }
    }
}

struct FakeBufferPoolInner {
    free: Mutex<VecDeque<MemorySegment>>,
    segment_size: usize,
    listener: Mutex<Option<Arc<dyn BufferAvailableListener>>>,
    shut_down: AtomicBool,
}

impl FakeBufferPoolInner {
    fn put(&self, segment: MemorySegment) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.free.lock().unwrap().push_back(segment);
    }
}

/// A floating-buffer pool backed by a plain `VecDeque`, for tests. Mirrors
/// the teacher's `pool::PacketPool`, minus the lock-free `ArrayQueue` (the
/// pool here is tiny and test-only, so a `Mutex<VecDeque<_>>` is plenty).
pub struct FakeBufferPool {
    inner: Arc<FakeBufferPoolInner>,
}

impl FakeBufferPool {
    pub fn new(initial_segments: usize, segment_size: usize) -> Arc<Self> {
        let mut free = VecDeque::with_capacity(initial_segments);
        for _ in 0..initial_segments {
            free.push_back(MemorySegment::new(segment_size));
        }
        Arc::new(Self {
            inner: Arc::new(FakeBufferPoolInner {
                free: Mutex::new(free),
                segment_size,
                listener: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Test hook: deliver a buffer to whatever listener is currently
    /// registered, as the real pool would do from its own background
    /// thread once a buffer frees up.
    pub fn deliver_to_listener(&self) -> bool {
        let listener = self.inner.listener.lock().unwrap().clone();
        let Some(listener) = listener else { return false };
        let Some(segment) = self.inner.free.lock().unwrap().pop_front() else { return false };
        let buffer = Buffer::new(segment, Arc::new(PoolRecycler(Arc::downgrade(&self.inner))), BufferOrigin::Floating);
        match listener.notify_buffer_available(buffer) {
            NotificationResult::BufferUsed { needs_more_buffers } => {
                if !needs_more_buffers {
                    *self.inner.listener.lock().unwrap() = None;
                }
            }
            NotificationResult::BufferNotUsed => {
                *self.inner.listener.lock().unwrap() = None;
            }
        }
        true
    }

    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
    }
}

impl BufferPool for FakeBufferPool {
    fn request_buffer(&self) -> Option<Buffer> {
        let segment = self.inner.free.lock().unwrap().pop_front()?;
        Some(Buffer::new(segment, Arc::new(PoolRecycler(Arc::downgrade(&self.inner))), BufferOrigin::Floating))
    }

    fn add_buffer_listener(&self, listener: Arc<dyn BufferAvailableListener>) -> bool {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return false;
        }
        *self.inner.listener.lock().unwrap() = Some(listener);
        true
    }

    fn recycle(&self, segment: MemorySegment) {
        self.inner.put(segment);
    }
}

impl FakeBufferPool {
    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }
}

/// Records calls made against the gate, for assertions in tests.
#[derive(Default)]
pub struct FakeGateInner {
    pub returned_segments: Mutex<Vec<MemorySegment>>,
    pub non_empty_notifications: Mutex<Vec<InputChannelId>>,
    pub partition_state_checks: Mutex<Vec<PartitionId>>,
    pub failed_producers: Mutex<Vec<PartitionId>>,
}

pub struct FakeGate {
    pub pool: Arc<FakeBufferPool>,
    pub credit_based: bool,
    pub exclusive_per_channel: usize,
    pub exclusive_segment_size: usize,
    pub recorded: FakeGateInner,
}

impl FakeGate {
    pub fn new(pool: Arc<FakeBufferPool>, credit_based: bool) -> Arc<Self> {
        Self::with_exclusive_segments(pool, credit_based, 2, 4096)
    }

    pub fn with_exclusive_segments(
        pool: Arc<FakeBufferPool>,
        credit_based: bool,
        exclusive_per_channel: usize,
        exclusive_segment_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            credit_based,
            exclusive_per_channel,
            exclusive_segment_size,
            recorded: FakeGateInner::default(),
        })
    }
}

impl InputGate for FakeGate {
    fn buffer_pool(&self) -> Arc<dyn BufferPool> {
        self.pool.clone()
    }

    fn return_exclusive_segments(&self, segments: Vec<MemorySegment>) {
        self.recorded.returned_segments.lock().unwrap().extend(segments);
    }

    fn notify_channel_non_empty(&self, channel_id: InputChannelId) {
        self.recorded.non_empty_notifications.lock().unwrap().push(channel_id);
    }

    fn trigger_partition_state_check(&self, partition_id: PartitionId) {
        self.recorded.partition_state_checks.lock().unwrap().push(partition_id);
    }

    fn trigger_fail_producer(&self, partition_id: PartitionId, _cause: anyhow::Error) {
        self.recorded.failed_producers.lock().unwrap().push(partition_id);
    }

    fn is_credit_based(&self) -> bool {
        self.credit_based
    }

    fn assign_exclusive_segments(&self, channel: &crate::channel::RemoteInputChannel) -> Result<()> {
        let segments: Vec<MemorySegment> =
            (0..self.exclusive_per_channel).map(|_| MemorySegment::new(self.exclusive_segment_size)).collect();
        channel.assign_exclusive_segments(segments).map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Records every subpartition request / task event / credit announcement,
/// for assertions in tests. Never actually touches the network.
#[derive(Default)]
pub struct FakePartitionRequestClient {
    pub requests: Mutex<Vec<(PartitionId, usize, std::time::Duration)>>,
    pub events: Mutex<Vec<TaskEvent>>,
    pub credit_announcements: Mutex<Vec<u64>>,
    pub closed: AtomicBool,
}

impl FakePartitionRequestClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PartitionRequestClient for FakePartitionRequestClient {
    fn request_subpartition(
        &self,
        partition_id: PartitionId,
        subpartition_index: usize,
        _channel_id: InputChannelId,
        backoff: std::time::Duration,
    ) -> Result<()> {
        self.requests.lock().unwrap().push((partition_id, subpartition_index, backoff));
        Ok(())
    }

    fn send_task_event(
        &self,
        _partition_id: PartitionId,
        event: TaskEvent,
        _channel_id: InputChannelId,
    ) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn notify_credit_available(&self, _channel_id: InputChannelId, credit: u64) -> Result<()> {
        self.credit_announcements.lock().unwrap().push(credit);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Hands out the same `FakePartitionRequestClient` for every connection id,
/// which is enough for single-producer test scenarios.
pub struct FakeConnectionManager {
    pub client: Arc<FakePartitionRequestClient>,
    pub closed_connections: Mutex<Vec<ConnectionId>>,
}

impl FakeConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { client: FakePartitionRequestClient::new(), closed_connections: Mutex::new(Vec::new()) })
    }
}

impl ConnectionManager for FakeConnectionManager {
    fn create_partition_request_client(
        &self,
        _connection_id: ConnectionId,
    ) -> Result<Arc<dyn PartitionRequestClient>> {
        Ok(self.client.clone())
    }

    fn close_channel_connections(&self, connection_id: ConnectionId, _channel_id: InputChannelId) {
        self.closed_connections.lock().unwrap().push(connection_id);
    }
}
