// src/channel.rs
//! The remote input channel: the receiver-side endpoint of a credit-based
//! flow-controlled data channel between a consuming task and a remote
//! subpartition producer.
//!
//! Two monitors guard disjoint state and are never held at the same time:
//! `received` (the received-buffers queue plus dedup bookkeeping) and
//! `buffer_queue` (the Available Buffer Queue plus credit bookkeeping).
//! Everything else (`is_released`, `subpartition_requested`,
//! `unannounced_credit`, `expected_sequence_number`) is a bare atomic,
//! touched outside both monitors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::buffer_queue::AvailableBufferQueue;
use crate::config::BackoffConfig;
use crate::credit::UnannouncedCredit;
use crate::dedup::DedupCounters;
use crate::error::{ChannelError, ChannelResult, StoredError};
use crate::gate::{
    Buffer, BufferAvailableListener, BufferOrigin, BufferPool, ConnectionManager, InputGate, MemorySegment,
    NotificationResult, PartitionRequestClient, Recycler, TaskEvent,
};
use crate::ids::{ConnectionId, InputChannelId, PartitionId};
use crate::metrics::ChannelMetrics;
use crate::util::{BackoffBudget, LogRateLimiter};

/// Coalescing window for the `BufferReordering` warning, mirroring the
/// teacher's gap-log rate limit.
const REORDER_LOG_WINDOW_NS: u64 = 100_000_000;

struct ReceivedEntry {
    buffer: Buffer,
    backlog: u64,
}

struct ReceivedState {
    queue: VecDeque<ReceivedEntry>,
    dedup: DedupCounters,
}

struct BufferQueueState {
    queue: AvailableBufferQueue,
    num_required_buffers: usize,
    is_waiting_for_floating_buffers: bool,
}

/// A delivered buffer plus the flow-control context the task needs to
/// decide whether to keep polling.
pub struct BufferAndAvailability {
    pub buffer: Buffer,
    pub more_available: bool,
    pub sender_backlog: u64,
}

/// Placeholder for the in-process sibling channel variant. Only the
/// conversion boundary from a remote channel is modeled here; full local
/// channel behavior is out of scope.
pub struct LocalInputChannel {
    pub id: InputChannelId,
    pub partition_id: PartitionId,
}

struct ExclusiveRecycler(Weak<RemoteInputChannel>);

impl Recycler for ExclusiveRecycler {
    fn recycle(&self, segment: MemorySegment) {
        if let Some(channel) = self.0.upgrade() {
            if let Err(e) = channel.recycle(segment) {
                channel.set_error(StoredError::Transport(Arc::from(e.to_string())));
            }
        }
    }
}

pub struct RemoteInputChannel {
    id: InputChannelId,
    partition_id: PartitionId,
    connection_id: ConnectionId,
    channel_index: usize,

    gate: Arc<dyn InputGate>,
    connection_manager: Arc<dyn ConnectionManager>,
    metrics: Arc<ChannelMetrics>,

    client: Mutex<Option<Arc<dyn PartitionRequestClient>>>,
    backoff: Mutex<BackoffBudget>,

    initial_credit: AtomicU64,
    unannounced_credit: UnannouncedCredit,
    expected_sequence_number: AtomicU64,
    sender_backlog: AtomicU64,

    is_released: AtomicBool,
    subpartition_requested: AtomicBool,

    received: Mutex<ReceivedState>,
    buffer_queue: Mutex<BufferQueueState>,

    stored_error: Mutex<Option<StoredError>>,
    reorder_log_limiter: LogRateLimiter,

    self_weak: Weak<RemoteInputChannel>,
}

impl RemoteInputChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: Arc<dyn InputGate>,
        channel_index: usize,
        partition_id: PartitionId,
        connection_id: ConnectionId,
        connection_manager: Arc<dyn ConnectionManager>,
        backoff: BackoffConfig,
        metrics: Arc<ChannelMetrics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: InputChannelId::next(),
            partition_id,
            connection_id,
            channel_index,
            gate,
            connection_manager,
            metrics,
            client: Mutex::new(None),
            backoff: Mutex::new(BackoffBudget::new(backoff.initial_ms, backoff.max_ms)),
            initial_credit: AtomicU64::new(0),
            unannounced_credit: UnannouncedCredit::default(),
            expected_sequence_number: AtomicU64::new(0),
            sender_backlog: AtomicU64::new(0),
            is_released: AtomicBool::new(false),
            subpartition_requested: AtomicBool::new(false),
            received: Mutex::new(ReceivedState { queue: VecDeque::new(), dedup: DedupCounters::default() }),
            buffer_queue: Mutex::new(BufferQueueState {
                queue: AvailableBufferQueue::new(),
                num_required_buffers: 0,
                is_waiting_for_floating_buffers: false,
            }),
            stored_error: Mutex::new(None),
            reorder_log_limiter: LogRateLimiter::new(REORDER_LOG_WINDOW_NS),
            self_weak: weak.clone(),
        })
    }

    // ---------------------------- identity & observable counters ----------------------------

    pub fn id(&self) -> InputChannelId {
        self.id
    }

    pub fn channel_index(&self) -> usize {
        self.channel_index
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn is_released(&self) -> bool {
        self.is_released.load(Ordering::Acquire)
    }

    pub fn initial_credit(&self) -> u64 {
        self.initial_credit.load(Ordering::Acquire)
    }

    pub fn sender_backlog(&self) -> u64 {
        self.sender_backlog.load(Ordering::Acquire)
    }

    pub fn unannounced_credit(&self) -> u64 {
        self.unannounced_credit.get()
    }

    pub fn get_and_reset_unannounced_credit(&self) -> u64 {
        self.unannounced_credit.get_and_reset()
    }

    pub fn number_of_queued_buffers(&self) -> usize {
        self.received.lock().unwrap().queue.len()
    }

    /// Best-effort metric read that does not take the received-buffers
    /// lock. Acceptable only for reporting, never for a correctness
    /// decision (see the design notes on `unsynchronizedGetNumberOfQueuedBuffers`).
    pub fn unsynchronized_number_of_queued_buffers(&self) -> usize {
        self.received.try_lock().map(|g| g.queue.len()).unwrap_or(0)
    }

    pub fn number_of_available_buffers(&self) -> usize {
        self.buffer_queue.lock().unwrap().queue.available_size()
    }

    pub fn number_of_required_buffers(&self) -> usize {
        self.buffer_queue.lock().unwrap().num_required_buffers
    }

    // ---------------------------- in-flight replay counters ----------------------------

    pub fn get_and_reset_number_buffers_removed(&self) -> u64 {
        self.received.lock().unwrap().dedup.get_and_reset_number_buffers_removed()
    }

    pub fn reset_number_buffers_deduplicate(&self) -> u64 {
        self.received.lock().unwrap().dedup.reset_number_buffers_deduplicate()
    }

    pub fn number_buffers_deduplicate(&self) -> u64 {
        self.received.lock().unwrap().dedup.number_buffers_deduplicate()
    }

    pub fn set_number_buffers_deduplicate(&self, n: u64) {
        self.received.lock().unwrap().dedup.set_number_buffers_deduplicate(n);
    }

    pub fn set_deduplicating(&self) {
        self.received.lock().unwrap().dedup.set_deduplicating();
    }

    // ---------------------------- error handling ----------------------------

    fn check_error(&self) -> ChannelResult<()> {
        if let Some(e) = self.stored_error.lock().unwrap().clone() {
            return Err(e.into());
        }
        Ok(())
    }

    fn set_error(&self, e: StoredError) {
        *self.stored_error.lock().unwrap() = Some(e);
    }

    pub fn on_error(&self, cause: anyhow::Error) {
        self.set_error(StoredError::Transport(Arc::from(cause.to_string())));
    }

    // ---------------------------- construction & setup ----------------------------

    pub fn assign_exclusive_segments(&self, segments: Vec<MemorySegment>) -> ChannelResult<()> {
        if segments.is_empty() {
            return Err(ChannelError::EmptySegments);
        }
        let count = segments.len() as u64;
        if self.initial_credit.compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ChannelError::AlreadyAssigned);
        }

        let recycler: Arc<dyn Recycler> = Arc::new(ExclusiveRecycler(self.self_weak.clone()));
        let mut bq = self.buffer_queue.lock().unwrap();
        bq.num_required_buffers = segments.len();
        for segment in segments {
            let buffer = Buffer::new(segment, recycler.clone(), BufferOrigin::Exclusive);
            bq.queue.add_exclusive_buffer(buffer, bq.num_required_buffers);
        }
        self.metrics.set_available_buffers(bq.queue.available_size());
        self.metrics.set_required_buffers(bq.num_required_buffers);
        Ok(())
    }

    // ---------------------------- subpartition request ----------------------------

    fn ensure_client(&self) -> ChannelResult<Arc<dyn PartitionRequestClient>> {
        let mut guard = self.client.lock().unwrap();
        if guard.is_none() {
            let c = self
                .connection_manager
                .create_partition_request_client(self.connection_id)
                .map_err(ChannelError::Transport)?;
            *guard = Some(c);
        }
        Ok(guard.clone().unwrap())
    }

    pub fn request_subpartition(&self, subpartition_index: usize) -> ChannelResult<()> {
        self.check_error()?;
        if self.is_released() {
            return Err(ChannelError::Released);
        }
        if self.subpartition_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let client = self.ensure_client()?;
        client
            .request_subpartition(self.partition_id, subpartition_index, self.id, Duration::ZERO)
            .map_err(ChannelError::Transport)?;
        if self.unannounced_credit.get() > 0 {
            self.announce_credit()?;
        }
        Ok(())
    }

    pub fn retrigger_subpartition_request(&self, subpartition_index: usize) -> ChannelResult<()> {
        self.check_error()?;
        if self.is_released() {
            return Err(ChannelError::Released);
        }
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return Err(ChannelError::NotRequested);
        }
        let wait = self.backoff.lock().unwrap().next();
        let Some(wait) = wait else {
            self.gate.trigger_partition_state_check(self.partition_id);
            return Err(ChannelError::PartitionNotFound);
        };
        let client = self.ensure_client()?;
        client
            .request_subpartition(self.partition_id, subpartition_index, self.id, wait)
            .map_err(ChannelError::Transport)
    }

    // ---------------------------- consumption ----------------------------

    pub fn get_next_buffer(&self) -> ChannelResult<Option<BufferAndAvailability>> {
        self.check_error()?;
        if self.is_released() {
            return Err(ChannelError::Released);
        }
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return Err(ChannelError::NotRequested);
        }

        let mut r = self.received.lock().unwrap();
        let Some(entry) = r.queue.pop_front() else {
            return Ok(None);
        };
        if r.dedup.on_buffer_polled() {
            entry.buffer.recycle_buffer();
            self.metrics.set_queued_buffers(r.queue.len());
            return Ok(None);
        }
        let more_available = !r.queue.is_empty();
        self.metrics.set_queued_buffers(r.queue.len());
        drop(r);
        Ok(Some(BufferAndAvailability { buffer: entry.buffer, more_available, sender_backlog: entry.backlog }))
    }

    // ---------------------------- task events ----------------------------

    pub fn send_task_event(&self, event: TaskEvent) -> ChannelResult<()> {
        self.check_error()?;
        if self.is_released() {
            return Err(ChannelError::Released);
        }
        let is_in_flight_request = event.is_in_flight_log_request();
        if !self.subpartition_requested.load(Ordering::Acquire) && !is_in_flight_request {
            return Err(ChannelError::NotRequested);
        }

        let existing = self.client.lock().unwrap().clone();
        let client = match existing {
            Some(c) => c,
            None if is_in_flight_request => self.ensure_client()?,
            None => return Err(ChannelError::NoClient),
        };
        client.send_task_event(self.partition_id, event, self.id).map_err(ChannelError::Transport)
    }

    // ---------------------------- credit accounting ----------------------------

    fn announce_credit(&self) -> ChannelResult<()> {
        if !self.subpartition_requested.load(Ordering::Acquire) {
            return Ok(());
        }
        let credit = self.unannounced_credit.get_and_reset();
        if credit == 0 {
            return Ok(());
        }
        self.metrics.credit_announcements_total();
        if let Some(client) = self.client.lock().unwrap().clone() {
            client.notify_credit_available(self.id, credit).map_err(ChannelError::Transport)?;
        }
        Ok(())
    }

    /// Called by a consumer returning an exclusive buffer.
    pub fn recycle(&self, segment: MemorySegment) -> ChannelResult<()> {
        let announce = {
            let mut bq = self.buffer_queue.lock().unwrap();
            if self.is_released() {
                drop(bq);
                self.gate.return_exclusive_segments(vec![segment]);
                return Ok(());
            }
            let recycler: Arc<dyn Recycler> = Arc::new(ExclusiveRecycler(self.self_weak.clone()));
            let buffer = Buffer::new(segment, recycler, BufferOrigin::Exclusive);
            let added = bq.queue.add_exclusive_buffer(buffer, bq.num_required_buffers);
            self.metrics.set_available_buffers(bq.queue.available_size());
            added > 0
        };
        if announce && self.unannounced_credit.add(1) {
            self.announce_credit()?;
        }
        Ok(())
    }

    /// Called by the I/O side after each producer buffer with a fresh
    /// backlog value.
    pub fn on_sender_backlog(&self, backlog: u64) -> ChannelResult<()> {
        self.sender_backlog.store(backlog, Ordering::Release);
        let mut requested = 0u64;
        {
            let mut bq = self.buffer_queue.lock().unwrap();
            if self.is_released() {
                return Ok(());
            }
            bq.num_required_buffers = (backlog + self.initial_credit.load(Ordering::Acquire)) as usize;
            while bq.queue.available_size() < bq.num_required_buffers && !bq.is_waiting_for_floating_buffers {
                match self.gate.buffer_pool().request_buffer() {
                    Some(buffer) => {
                        bq.queue.add_floating_buffer(buffer);
                        requested += 1;
                    }
                    None => {
                        let listener: Arc<dyn BufferAvailableListener> =
                            self.self_weak.upgrade().expect("channel outlives its own on_sender_backlog call");
                        if self.gate.buffer_pool().add_buffer_listener(listener) {
                            bq.is_waiting_for_floating_buffers = true;
                            log::debug!("{} waiting for floating buffers", self.id);
                        }
                        break;
                    }
                }
            }
            self.metrics.set_available_buffers(bq.queue.available_size());
            self.metrics.set_required_buffers(bq.num_required_buffers);
        }
        if requested > 0 && self.unannounced_credit.add(requested) {
            self.announce_credit()?;
        }
        Ok(())
    }

    /// Called by the network layer to obtain a destination buffer for an
    /// incoming frame.
    pub fn request_buffer(&self) -> Option<Buffer> {
        self.buffer_queue.lock().unwrap().queue.take_buffer()
    }

    // ---------------------------- arrival path ----------------------------

    pub fn on_buffer(&self, buffer: Buffer, sequence_number: u64, backlog: Option<u64>) -> ChannelResult<()> {
        enum Outcome {
            Released(Buffer),
            Reordered { expected: u64, buffer: Buffer },
            Accepted { became_non_empty: bool, queued_len: usize },
        }

        let outcome = {
            let mut r = self.received.lock().unwrap();
            if self.is_released() {
                Outcome::Released(buffer)
            } else {
                let expected = self.expected_sequence_number.load(Ordering::Acquire);
                if sequence_number != expected {
                    Outcome::Reordered { expected, buffer }
                } else {
                    let was_empty = r.queue.is_empty();
                    r.queue.push_back(ReceivedEntry { buffer, backlog: backlog.unwrap_or(0) });
                    Outcome::Accepted { became_non_empty: was_empty, queued_len: r.queue.len() }
                }
            }
        };

        match outcome {
            Outcome::Released(buffer) => {
                buffer.recycle_buffer();
                Ok(())
            }
            Outcome::Reordered { expected, buffer } => {
                buffer.recycle_buffer();
                let err = StoredError::BufferReordering { expected, actual: sequence_number };
                self.set_error(err.clone());
                self.metrics.buffer_reordering_total();
                if self.reorder_log_limiter.allow() {
                    log::warn!("{}: buffer reordering, expected {} got {}", self.id, expected, sequence_number);
                }
                Err(err.into())
            }
            Outcome::Accepted { became_non_empty, queued_len } => {
                self.expected_sequence_number.fetch_add(1, Ordering::AcqRel);
                self.metrics.set_queued_buffers(queued_len);
                if became_non_empty {
                    self.gate.notify_channel_non_empty(self.id);
                }
                if let Some(backlog) = backlog {
                    self.on_sender_backlog(backlog)?;
                }
                Ok(())
            }
        }
    }

    /// Advances `expectedSequenceNumber` without a payload.
    pub fn on_empty_buffer(&self, sequence_number: u64, backlog: Option<u64>) -> ChannelResult<()> {
        enum Outcome {
            Released,
            Reordered(u64),
            Accepted,
        }

        let outcome = {
            let _r = self.received.lock().unwrap();
            if self.is_released() {
                Outcome::Released
            } else {
                let expected = self.expected_sequence_number.load(Ordering::Acquire);
                if sequence_number != expected {
                    Outcome::Reordered(expected)
                } else {
                    Outcome::Accepted
                }
            }
        };

        match outcome {
            Outcome::Released => Ok(()),
            Outcome::Reordered(expected) => {
                let err = StoredError::BufferReordering { expected, actual: sequence_number };
                self.set_error(err.clone());
                self.metrics.buffer_reordering_total();
                if self.reorder_log_limiter.allow() {
                    log::warn!("{}: buffer reordering (empty frame), expected {} got {}", self.id, expected, sequence_number);
                }
                Err(err.into())
            }
            Outcome::Accepted => {
                self.expected_sequence_number.fetch_add(1, Ordering::AcqRel);
                if let Some(backlog) = backlog {
                    self.on_sender_backlog(backlog)?;
                }
                Ok(())
            }
        }
    }

    pub fn on_failed_partition_request(&self) {
        self.gate.trigger_partition_state_check(self.partition_id);
    }

    // ---------------------------- lifecycle ----------------------------

    pub fn release_all_resources(&self) -> ChannelResult<()> {
        if self.is_released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Collected here, not returned to the gate until both monitors are
        // released below, so the whole exclusive allotment goes back in a
        // single batch call instead of one per buffer.
        let mut exclusive_segments = Vec::new();

        {
            let mut r = self.received.lock().unwrap();
            for entry in r.queue.drain(..) {
                match entry.buffer.origin() {
                    BufferOrigin::Exclusive => {
                        if let Some(segment) = entry.buffer.into_memory_segment() {
                            exclusive_segments.push(segment);
                        }
                    }
                    BufferOrigin::Floating => entry.buffer.recycle_buffer(),
                }
            }
            self.metrics.set_queued_buffers(0);
        }

        {
            let mut bq = self.buffer_queue.lock().unwrap();
            bq.queue.release_all(&mut exclusive_segments);
            self.metrics.set_available_buffers(0);
        }
        if !exclusive_segments.is_empty() {
            self.gate.return_exclusive_segments(exclusive_segments);
        }

        let client = self.client.lock().unwrap().take();
        match client {
            Some(client) => {
                let _ = client.close();
            }
            None => self.connection_manager.close_channel_connections(self.connection_id, self.id),
        }

        crate::metrics::record_channel_released();
        log::info!("{} released", self.id);
        Ok(())
    }

    // ---------------------------- channel transformation ----------------------------

    /// Poll-waits (coarse sleep, not a spin loop) until `receivedBuffers` is
    /// drained, guaranteeing every already-delivered buffer has been
    /// consumed, then releases this channel and constructs a new one toward
    /// the given producer.
    #[allow(clippy::too_many_arguments)]
    pub fn to_new_remote_input_channel(
        &self,
        new_partition_id: PartitionId,
        new_connection_id: ConnectionId,
        channel_index: usize,
        connection_manager: Arc<dyn ConnectionManager>,
        backoff: BackoffConfig,
        metrics: Arc<ChannelMetrics>,
    ) -> ChannelResult<Arc<RemoteInputChannel>> {
        loop {
            let empty = self.received.lock().unwrap().queue.is_empty();
            if empty {
                break;
            }
            crate::util::coarse_sleep();
        }

        self.release_all_resources()?;

        let new_channel = RemoteInputChannel::new(
            self.gate.clone(),
            channel_index,
            new_partition_id,
            new_connection_id,
            connection_manager,
            backoff,
            metrics,
        );

        if self.gate.is_credit_based() {
            self.gate.assign_exclusive_segments(&new_channel).map_err(ChannelError::Transport)?;
        }

        Ok(new_channel)
    }

    pub fn to_new_local_input_channel(&self, new_partition_id: PartitionId) -> ChannelResult<LocalInputChannel> {
        self.release_all_resources()?;
        Ok(LocalInputChannel { id: InputChannelId::next(), partition_id: new_partition_id })
    }
}

impl BufferAvailableListener for RemoteInputChannel {
    fn notify_buffer_available(&self, buffer: Buffer) -> NotificationResult {
        let mut bq = self.buffer_queue.lock().unwrap();
        if !bq.is_waiting_for_floating_buffers {
            drop(bq);
            buffer.recycle_buffer();
            self.set_error(StoredError::Transport(Arc::from(
                "notifyBufferAvailable invoked while not waiting for floating buffers",
            )));
            return NotificationResult::BufferNotUsed;
        }

        if self.is_released() || bq.queue.available_size() >= bq.num_required_buffers {
            bq.is_waiting_for_floating_buffers = false;
            drop(bq);
            buffer.recycle_buffer();
            return NotificationResult::BufferNotUsed;
        }

        bq.queue.add_floating_buffer(buffer);
        let still_needed = bq.queue.available_size() < bq.num_required_buffers;
        if !still_needed {
            bq.is_waiting_for_floating_buffers = false;
        }
        self.metrics.set_available_buffers(bq.queue.available_size());
        drop(bq);

        if self.unannounced_credit.add(1) {
            let _ = self.announce_credit();
        }
        NotificationResult::BufferUsed { needs_more_buffers: still_needed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{FakeBufferPool, FakeConnectionManager, FakeGate};

    fn new_channel(credit_based: bool) -> (Arc<RemoteInputChannel>, Arc<FakeGate>, Arc<FakeConnectionManager>) {
        let pool = FakeBufferPool::new(8, 4096);
        let gate = FakeGate::new(pool, credit_based);
        let cm = FakeConnectionManager::new();
        let metrics = ChannelMetrics::for_channel("test");
        let channel = RemoteInputChannel::new(
            gate.clone(),
            0,
            PartitionId(1),
            ConnectionId(1),
            cm.clone(),
            BackoffConfig { initial_ms: 10, max_ms: 20 },
            metrics,
        );
        (channel, gate, cm)
    }

    #[test]
    fn empty_assign_exclusive_segments_is_rejected() {
        let (channel, _gate, _cm) = new_channel(true);
        assert!(matches!(channel.assign_exclusive_segments(vec![]), Err(ChannelError::EmptySegments)));
    }

    #[test]
    fn double_assign_exclusive_segments_is_rejected() {
        let (channel, _gate, _cm) = new_channel(true);
        channel.assign_exclusive_segments(vec![MemorySegment::new(16)]).unwrap();
        assert!(matches!(
            channel.assign_exclusive_segments(vec![MemorySegment::new(16)]),
            Err(ChannelError::AlreadyAssigned)
        ));
    }

    #[test]
    fn get_next_buffer_before_request_is_rejected() {
        let (channel, _gate, _cm) = new_channel(true);
        assert!(matches!(channel.get_next_buffer(), Err(ChannelError::NotRequested)));
    }

    #[test]
    fn get_next_buffer_after_release_is_rejected() {
        let (channel, _gate, _cm) = new_channel(true);
        channel.request_subpartition(0).unwrap();
        channel.release_all_resources().unwrap();
        assert!(matches!(channel.get_next_buffer(), Err(ChannelError::Released)));
    }

    #[test]
    fn send_task_event_in_flight_log_request_before_request_is_accepted() {
        let (channel, _gate, cm) = new_channel(true);
        channel.send_task_event(TaskEvent::InFlightLogRequest).unwrap();
        assert_eq!(cm.client.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn send_task_event_user_event_before_request_is_rejected() {
        let (channel, _gate, _cm) = new_channel(true);
        assert!(matches!(
            channel.send_task_event(TaskEvent::User(vec![1])),
            Err(ChannelError::NotRequested)
        ));
    }

    #[test]
    fn request_subpartition_is_idempotent() {
        let (channel, _gate, cm) = new_channel(true);
        channel.request_subpartition(0).unwrap();
        channel.request_subpartition(0).unwrap();
        channel.request_subpartition(0).unwrap();
        assert_eq!(cm.client.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn release_all_resources_is_idempotent() {
        let (channel, _gate, _cm) = new_channel(true);
        channel.request_subpartition(0).unwrap();
        channel.release_all_resources().unwrap();
        channel.release_all_resources().unwrap();
        assert!(channel.is_released());
    }

    #[test]
    fn clean_delivery_scenario() {
        let (channel, _gate, cm) = new_channel(true);
        channel.assign_exclusive_segments(vec![MemorySegment::new(16), MemorySegment::new(16)]).unwrap();
        channel.request_subpartition(0).unwrap();

        let buffer = channel.request_buffer().expect("exclusive buffer available");
        channel.on_buffer(buffer, 0, Some(3)).unwrap();

        // 3 floating buffers requested to satisfy required = initial(2) + backlog(3),
        // announced once and then drained back to zero.
        assert_eq!(*cm.client.credit_announcements.lock().unwrap(), vec![3]);
        assert_eq!(channel.unannounced_credit(), 0);

        let delivered = channel.get_next_buffer().unwrap().expect("buffer delivered");
        assert!(!delivered.more_available);
        assert_eq!(delivered.sender_backlog, 3);
    }

    #[test]
    fn reordering_scenario_stores_error_and_recycles_buffer() {
        let (channel, _gate, _cm) = new_channel(true);
        channel.assign_exclusive_segments(vec![MemorySegment::new(16)]).unwrap();
        channel.request_subpartition(0).unwrap();

        let buffer = channel.request_buffer().expect("exclusive buffer available");
        let err = channel.on_buffer(buffer, 1, Some(0)).unwrap_err();
        assert!(matches!(err, ChannelError::BufferReordering { expected: 0, actual: 1 }));

        let err = channel.get_next_buffer().unwrap_err();
        assert!(matches!(err, ChannelError::BufferReordering { expected: 0, actual: 1 }));
    }

    #[test]
    fn floating_starvation_then_recovery_scenario() {
        // Pool starts with exactly one free segment: onSenderBacklog grants
        // that one, then comes up empty and must register as a listener.
        let pool = FakeBufferPool::new(1, 16);
        let gate = FakeGate::new(pool.clone(), true);
        let cm = FakeConnectionManager::new();
        let metrics = ChannelMetrics::for_channel("starve");
        let channel = RemoteInputChannel::new(
            gate,
            0,
            PartitionId(2),
            ConnectionId(2),
            cm.clone(),
            BackoffConfig { initial_ms: 10, max_ms: 20 },
            metrics,
        );
        channel.assign_exclusive_segments(vec![MemorySegment::new(16)]).unwrap();
        channel.request_subpartition(0).unwrap();

        channel.on_sender_backlog(2).unwrap(); // required = initial(1) + backlog(2) = 3
        assert_eq!(channel.number_of_available_buffers(), 2); // exclusive + the one granted floating buffer
        assert_eq!(channel.unannounced_credit(), 0); // already announced once

        // The pool frees a buffer and delivers it to the now-waiting channel.
        pool.recycle(MemorySegment::new(16));
        assert!(pool.deliver_to_listener());

        assert_eq!(channel.number_of_available_buffers(), 3);
        assert_eq!(cm.client.credit_announcements.lock().unwrap().len(), 2);
    }

    #[test]
    fn deduplication_cycle_scenario() {
        let (channel, _gate, _cm) = new_channel(true);
        channel
            .assign_exclusive_segments(vec![MemorySegment::new(16), MemorySegment::new(16), MemorySegment::new(16)])
            .unwrap();
        channel.request_subpartition(0).unwrap();

        for seq in 0..3u64 {
            let buffer = channel.request_buffer().expect("buffer available");
            channel.on_buffer(buffer, seq, None).unwrap();
        }

        channel.set_number_buffers_deduplicate(2);
        channel.set_deduplicating();

        assert!(channel.get_next_buffer().unwrap().is_none());
        assert!(channel.get_next_buffer().unwrap().is_none());
        let delivered = channel.get_next_buffer().unwrap();
        assert!(delivered.is_some());
        assert_eq!(channel.get_and_reset_number_buffers_removed(), 1);
    }
}
