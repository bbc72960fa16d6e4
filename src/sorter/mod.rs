//! Global time-ordering merge across fan-out streams and singleton units.
//!
//! Every sortable unit is compacted into the token buffer at push time; the
//! sorter only keeps (timestamp, field id, token id) triples, one queue per
//! fan-out stream plus a singleton queue. Each queue preserves push order
//! and is locally near-ordered, so extraction is a cheap stable per-queue
//! sort followed by a merge. Flushing before end of file is governed by a
//! configured out-of-order window, not re-derived from the data.

use crate::streams::StreamSet;
use crate::token_buffer::{TokenBufferId, TraceTokenBuffer, TrackedPacket};
use crate::utils::config::DEFAULT_SORTER_WINDOW_NS;
use log::debug;

/// Merge policy parameters.
#[derive(Debug, Clone)]
pub struct SorterConfig {
    /// Maximum out-of-order window. Events older than the newest seen
    /// timestamp minus this window may be flushed before end of file.
    pub window_ns: i64,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            window_ns: DEFAULT_SORTER_WINDOW_NS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SortedEntry {
    timestamp: i64,
    field_id: u32,
    id: TokenBufferId,
}

/// One locally-ordered run of pending entries.
#[derive(Debug, Default)]
struct SorterQueue {
    entries: Vec<SortedEntry>,
}

/// Queue index 0 holds singleton units; track `t` maps to queue `t + 1`.
const SINGLETON_QUEUE: usize = 0;

pub struct TraceSorter {
    token_buffer: TraceTokenBuffer,
    queues: StreamSet<SorterQueue>,
    config: SorterConfig,
    max_timestamp: i64,
}

impl TraceSorter {
    pub fn new(config: SorterConfig) -> Self {
        Self {
            token_buffer: TraceTokenBuffer::new(),
            queues: StreamSet::new(),
            config,
            max_timestamp: i64::MIN,
        }
    }

    /// Push a singleton unit (not bound to a fan-out track).
    pub fn push_sortable(&mut self, timestamp: i64, field_id: u32, packet: TrackedPacket) {
        self.push_to_queue(SINGLETON_QUEUE, timestamp, field_id, packet);
    }

    /// Push a unit onto a per-track fan-out stream.
    pub fn push_to_track(
        &mut self,
        track: usize,
        timestamp: i64,
        field_id: u32,
        packet: TrackedPacket,
    ) {
        self.push_to_queue(track + 1, timestamp, field_id, packet);
    }

    fn push_to_queue(&mut self, queue: usize, timestamp: i64, field_id: u32, packet: TrackedPacket) {
        let id = self.token_buffer.append(packet);
        self.queues
            .for_track(queue, |_| SorterQueue::default())
            .entries
            .push(SortedEntry {
                timestamp,
                field_id,
                id,
            });
        if timestamp > self.max_timestamp {
            self.max_timestamp = timestamp;
        }
    }

    /// Number of pending, unextracted units.
    pub fn pending_count(&self) -> usize {
        self.token_buffer.live_entries()
    }

    /// Flush units that have fallen out of the configured window.
    pub fn maybe_flush(&mut self, mut f: impl FnMut(i64, u32, TrackedPacket)) {
        if self.max_timestamp == i64::MIN {
            return;
        }
        let limit = self.max_timestamp.saturating_sub(self.config.window_ns);
        self.extract_events_until(limit, &mut f);
    }

    /// Flush every pending unit in global timestamp order.
    pub fn extract_all(&mut self, mut f: impl FnMut(i64, u32, TrackedPacket)) {
        self.extract_events_until(i64::MAX, &mut f);
    }

    /// Flush units with `timestamp <= limit` in global timestamp order.
    /// Within one timestamp, queue order then push order is preserved.
    fn extract_events_until(&mut self, limit: i64, f: &mut impl FnMut(i64, u32, TrackedPacket)) {
        let mut flushable: Vec<SortedEntry> = Vec::new();
        for (_, queue) in self.queues.iter_mut() {
            // Queues are locally near-ordered; a stable sort keeps push
            // order for equal timestamps.
            queue.entries.sort_by_key(|e| e.timestamp);
            let keep_from = queue.entries.partition_point(|e| e.timestamp <= limit);
            flushable.extend(queue.entries.drain(..keep_from));
        }
        if flushable.is_empty() {
            return;
        }
        flushable.sort_by_key(|e| e.timestamp);
        debug!("sorter flushing {} units up to ts {}", flushable.len(), limit);
        for entry in flushable {
            let packet = self.token_buffer.extract(entry.id);
            f(entry.timestamp, entry.field_id, packet);
        }
        self.token_buffer.free_memory();
    }
}
