//! Compacting arena for tokenized-but-not-yet-parsed packets.
//!
//! While millions of units wait in the sorter, each one is packed into a
//! bump-allocated chunk: a one-byte descriptor with presence bits, interned
//! references to the backing buffer and the generation snapshot, and varint
//! payload fields. Two forms of interning amortize per-entry overhead:
//!
//! - backing-buffer interning: a unit whose backing buffer is the same
//!   object as the previous entry's stores only a bounded-width offset
//!   delta against the interned base, borrowing the buffer reference the
//!   side table already owns;
//! - generation interning: a bounded lookback window over recently interned
//!   generation handles is scanned before a new owned handle is appended.
//!
//! Entries are write-once, read-once: `extract` consumes an entry exactly
//! once, and the extracted unit becomes the sole owner of the references
//! that were borrowed at append time (the side table keeps its own copy
//! until the chunk is freed). Double extraction is a fatal programming
//! error, not malformed input.

use crate::sequence::PacketSequenceStateGeneration;
use crate::utils::config::{
    GENERATION_LOOKBACK, MAX_EXTRA_COUNTERS, MAX_INTERNED_OFFSET_DELTA, TOKEN_BUFFER_CHUNK_SIZE,
    TOKEN_BUFFER_MAX_ENTRY_SIZE,
};
use crate::wire::{self, same_bytes_object, TraceBlob};
use bitflags::bitflags;
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::rc::Rc;

bitflags! {
    /// Presence bits of an entry descriptor. The extra-counter count lives
    /// in bits 3..=5 of the same byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Descriptor: u8 {
        const HAS_THREAD_TIMESTAMP = 1 << 0;
        const HAS_THREAD_INSTRUCTION_COUNT = 1 << 1;
        const SAME_BACKING_BUFFER = 1 << 2;
    }
}

/// Header byte written over a consumed entry. Unreachable as a live header:
/// the counter count never exceeds `MAX_EXTRA_COUNTERS` and bits 6..=7 are
/// always zero.
const TOMBSTONE: u8 = 0xff;

/// The packet view and the generation snapshot captured at tokenize time.
#[derive(Debug, Clone)]
pub struct TracePacketData {
    pub packet: TraceBlob,
    pub generation: Rc<PacketSequenceStateGeneration>,
}

/// One sortable unit: the packet data plus optional pre-extracted scalars.
#[derive(Debug, Clone)]
pub struct TrackedPacket {
    pub data: TracePacketData,
    pub thread_timestamp: Option<i64>,
    pub thread_instruction_count: Option<i64>,
    pub extra_counter_values: SmallVec<[i64; MAX_EXTRA_COUNTERS]>,
}

impl TrackedPacket {
    pub fn new(packet: TraceBlob, generation: Rc<PacketSequenceStateGeneration>) -> Self {
        Self {
            data: TracePacketData { packet, generation },
            thread_timestamp: None,
            thread_instruction_count: None,
            extra_counter_values: SmallVec::new(),
        }
    }
}

/// Opaque handle to a packed entry. Valid for exactly one `extract`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBufferId {
    chunk: u32,
    offset: u32,
}

struct BufferEntry {
    bytes: Bytes,
    base_offset: usize,
}

struct Chunk {
    data: Vec<u8>,
    buffers: Vec<BufferEntry>,
    generations: Vec<Rc<PacketSequenceStateGeneration>>,
    live_entries: usize,
}

impl Chunk {
    fn new() -> Self {
        Self {
            data: Vec::with_capacity(TOKEN_BUFFER_CHUNK_SIZE),
            buffers: Vec::new(),
            generations: Vec::new(),
            live_entries: 0,
        }
    }
}

/// The arena. Single-writer append, strictly-once extraction.
pub struct TraceTokenBuffer {
    chunks: VecDeque<Chunk>,
    /// Absolute index of `chunks[0]`; grows as freed prefix chunks are
    /// reclaimed.
    first_chunk_index: u32,
}

impl Default for TraceTokenBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceTokenBuffer {
    pub fn new() -> Self {
        let mut chunks = VecDeque::new();
        chunks.push_back(Chunk::new());
        Self {
            chunks,
            first_chunk_index: 0,
        }
    }

    /// Pack a unit into the arena and return its handle.
    ///
    /// Panics if the unit exceeds the extra-counter cap; that is a producer
    /// bug, not representable input.
    pub fn append(&mut self, packet: TrackedPacket) -> TokenBufferId {
        assert!(
            packet.extra_counter_values.len() <= MAX_EXTRA_COUNTERS,
            "extra counter count {} exceeds cap {}",
            packet.extra_counter_values.len(),
            MAX_EXTRA_COUNTERS
        );

        if self.current_chunk().data.len() + TOKEN_BUFFER_MAX_ENTRY_SIZE
            > TOKEN_BUFFER_CHUNK_SIZE
        {
            self.chunks.push_back(Chunk::new());
        }
        let chunk_index = self.first_chunk_index + (self.chunks.len() as u32 - 1);
        let chunk = self.current_chunk();
        let entry_offset = chunk.data.len() as u32;

        let blob = &packet.data.packet;
        let mut flags = Descriptor::empty();

        // Backing-buffer interning: reuse the most recently interned buffer
        // of this chunk when the object matches and the delta is bounded.
        let (buffer_index, offset_delta) = match chunk.buffers.last() {
            Some(last)
                if same_bytes_object(&last.bytes, blob.backing())
                    && blob.offset() >= last.base_offset
                    && (blob.offset() - last.base_offset) as u64 <= MAX_INTERNED_OFFSET_DELTA =>
            {
                flags |= Descriptor::SAME_BACKING_BUFFER;
                (chunk.buffers.len() - 1, blob.offset() - last.base_offset)
            }
            _ => {
                chunk.buffers.push(BufferEntry {
                    bytes: blob.backing().clone(),
                    base_offset: blob.offset(),
                });
                (chunk.buffers.len() - 1, 0)
            }
        };

        // Generation interning: bounded lookback over recently interned
        // handles before appending a new owned one.
        let generation_index = {
            let window_start = chunk.generations.len().saturating_sub(GENERATION_LOOKBACK);
            match chunk.generations[window_start..]
                .iter()
                .rposition(|g| Rc::ptr_eq(g, &packet.data.generation))
            {
                Some(pos) => window_start + pos,
                None => {
                    chunk.generations.push(Rc::clone(&packet.data.generation));
                    chunk.generations.len() - 1
                }
            }
        };

        if packet.thread_timestamp.is_some() {
            flags |= Descriptor::HAS_THREAD_TIMESTAMP;
        }
        if packet.thread_instruction_count.is_some() {
            flags |= Descriptor::HAS_THREAD_INSTRUCTION_COUNT;
        }
        let counter_count = packet.extra_counter_values.len() as u8;

        chunk.data.push(flags.bits() | (counter_count << 3));
        wire::write_varint(&mut chunk.data, buffer_index as u64);
        if flags.contains(Descriptor::SAME_BACKING_BUFFER) {
            wire::write_varint(&mut chunk.data, offset_delta as u64);
        }
        wire::write_varint(&mut chunk.data, blob.len() as u64);
        wire::write_varint(&mut chunk.data, generation_index as u64);
        if let Some(ts) = packet.thread_timestamp {
            wire::write_varint(&mut chunk.data, wire::zigzag_encode(ts));
        }
        if let Some(ic) = packet.thread_instruction_count {
            wire::write_varint(&mut chunk.data, wire::zigzag_encode(ic));
        }
        for counter in &packet.extra_counter_values {
            wire::write_varint(&mut chunk.data, wire::zigzag_encode(*counter));
        }

        chunk.live_entries += 1;
        TokenBufferId {
            chunk: chunk_index,
            offset: entry_offset,
        }
    }

    /// Unpack an entry, releasing its arena slot. Must be called exactly
    /// once per id; a second call, or a call against a freed chunk, panics.
    pub fn extract(&mut self, id: TokenBufferId) -> TrackedPacket {
        let relative = id
            .chunk
            .checked_sub(self.first_chunk_index)
            .expect("token buffer entry extracted from an already-freed chunk");
        let chunk = self
            .chunks
            .get_mut(relative as usize)
            .expect("token buffer id out of range");

        let start = id.offset as usize;
        let header = chunk.data[start];
        assert!(header != TOMBSTONE, "token buffer entry extracted twice");
        let flags = Descriptor::from_bits_truncate(header);
        let counter_count = ((header >> 3) & 0x7) as usize;

        let mut pos = start + 1;
        let data = &chunk.data;
        let buffer_index = read_packed_varint(data, &mut pos) as usize;
        let offset = if flags.contains(Descriptor::SAME_BACKING_BUFFER) {
            let delta = read_packed_varint(data, &mut pos) as usize;
            chunk.buffers[buffer_index].base_offset + delta
        } else {
            chunk.buffers[buffer_index].base_offset
        };
        let len = read_packed_varint(data, &mut pos) as usize;
        let generation_index = read_packed_varint(data, &mut pos) as usize;

        let thread_timestamp = flags
            .contains(Descriptor::HAS_THREAD_TIMESTAMP)
            .then(|| wire::zigzag_decode(read_packed_varint(data, &mut pos)));
        let thread_instruction_count = flags
            .contains(Descriptor::HAS_THREAD_INSTRUCTION_COUNT)
            .then(|| wire::zigzag_decode(read_packed_varint(data, &mut pos)));
        let mut extra_counter_values = SmallVec::new();
        for _ in 0..counter_count {
            extra_counter_values.push(wire::zigzag_decode(read_packed_varint(data, &mut pos)));
        }

        let packet = TraceBlob::from_parts(chunk.buffers[buffer_index].bytes.clone(), offset, len);
        let generation = Rc::clone(&chunk.generations[generation_index]);

        chunk.data[start] = TOMBSTONE;
        chunk.live_entries -= 1;

        TrackedPacket {
            data: TracePacketData { packet, generation },
            thread_timestamp,
            thread_instruction_count,
            extra_counter_values,
        }
    }

    /// Reclaim fully-extracted prefix chunks and their interning side
    /// tables. The current write chunk is never reclaimed.
    pub fn free_memory(&mut self) {
        while self.chunks.len() > 1 && self.chunks[0].live_entries == 0 {
            self.chunks.pop_front();
            self.first_chunk_index += 1;
        }
    }

    /// Arena footprint across all live chunks, in bytes.
    pub fn allocated_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.capacity()).sum()
    }

    /// Number of entries appended but not yet extracted.
    pub fn live_entries(&self) -> usize {
        self.chunks.iter().map(|c| c.live_entries).sum()
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        self.chunks.back_mut().expect("token buffer has no chunks")
    }
}

/// Varints written by `append` are always well-formed; a decode failure
/// here means arena corruption, which is fatal by design.
fn read_packed_varint(data: &[u8], pos: &mut usize) -> u64 {
    wire::read_varint(data, pos).expect("corrupt token buffer entry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::PacketSequenceState;
    use crate::stats::shared_stats;

    fn generation() -> Rc<PacketSequenceStateGeneration> {
        PacketSequenceState::new(1, shared_stats()).current_generation()
    }

    fn assert_round_trip(buffer: &mut TraceTokenBuffer, packet: &TrackedPacket) {
        let id = buffer.append(packet.clone());
        let out = buffer.extract(id);
        assert!(out.data.packet.same_backing(&packet.data.packet));
        assert_eq!(out.data.packet.offset(), packet.data.packet.offset());
        assert_eq!(out.data.packet.len(), packet.data.packet.len());
        assert!(Rc::ptr_eq(&out.data.generation, &packet.data.generation));
        assert_eq!(out.thread_timestamp, packet.thread_timestamp);
        assert_eq!(
            out.thread_instruction_count,
            packet.thread_instruction_count
        );
        assert_eq!(out.extra_counter_values, packet.extra_counter_values);
    }

    #[test]
    fn test_round_trip_owned_buffer() {
        let mut buffer = TraceTokenBuffer::new();
        let blob = TraceBlob::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let packet = TrackedPacket::new(blob.slice(2, 4), generation());
        assert_round_trip(&mut buffer, &packet);
    }

    #[test]
    fn test_round_trip_delta_offset_path() {
        let mut buffer = TraceTokenBuffer::new();
        let gen = generation();
        let blob = TraceBlob::from_vec((0..64).collect());

        let first = TrackedPacket::new(blob.slice(0, 8), Rc::clone(&gen));
        let id0 = buffer.append(first.clone());
        // Same backing object, small offset delta: interned path.
        let second = TrackedPacket::new(blob.slice(8, 16), Rc::clone(&gen));
        let id1 = buffer.append(second.clone());

        let out1 = buffer.extract(id1);
        assert_eq!(out1.data.packet.offset(), 8);
        assert_eq!(out1.data.packet.len(), 16);
        assert!(out1.data.packet.same_backing(&blob));

        let out0 = buffer.extract(id0);
        assert_eq!(out0.data.packet.offset(), 0);
        assert_eq!(out0.data.packet.len(), 8);
    }

    #[test]
    fn test_round_trip_optional_scalars() {
        let mut buffer = TraceTokenBuffer::new();
        let blob = TraceBlob::from_vec(vec![9; 16]);

        for counters in [0, 1, MAX_EXTRA_COUNTERS] {
            let mut packet = TrackedPacket::new(blob.clone(), generation());
            packet.thread_timestamp = Some(-12345);
            packet.thread_instruction_count = Some(678);
            packet.extra_counter_values =
                (0..counters as i64).map(|i| i * 1000 - 500).collect();
            assert_round_trip(&mut buffer, &packet);
        }
    }

    #[test]
    #[should_panic(expected = "extracted twice")]
    fn test_double_extract_panics() {
        let mut buffer = TraceTokenBuffer::new();
        let packet = TrackedPacket::new(TraceBlob::from_vec(vec![1, 2, 3]), generation());
        let id = buffer.append(packet);
        let _ = buffer.extract(id);
        let _ = buffer.extract(id);
    }

    #[test]
    #[should_panic(expected = "exceeds cap")]
    fn test_counter_cap_overflow_panics() {
        let mut buffer = TraceTokenBuffer::new();
        let mut packet = TrackedPacket::new(TraceBlob::from_vec(vec![1]), generation());
        packet.extra_counter_values = (0..(MAX_EXTRA_COUNTERS as i64 + 1)).collect();
        let _ = buffer.append(packet);
    }

    #[test]
    fn test_generation_interning_reuses_window_entry() {
        let mut buffer = TraceTokenBuffer::new();
        let gen = generation();
        let blob = TraceBlob::from_vec(vec![0; 32]);

        let ids: Vec<TokenBufferId> = (0..10)
            .map(|i| buffer.append(TrackedPacket::new(blob.slice(i, 1), Rc::clone(&gen))))
            .collect();
        // All ten entries resolve to the same generation handle.
        for id in ids {
            let out = buffer.extract(id);
            assert!(Rc::ptr_eq(&out.data.generation, &gen));
        }
    }

    #[test]
    fn test_free_memory_reclaims_extracted_prefix() {
        let mut buffer = TraceTokenBuffer::new();
        let gen = generation();

        // Enough entries to span several chunks. Distinct backing buffers
        // defeat interning so entries stay large.
        let mut ids = Vec::new();
        for i in 0..20000u32 {
            let blob = TraceBlob::from_vec(i.to_le_bytes().to_vec());
            ids.push(buffer.append(TrackedPacket::new(blob, Rc::clone(&gen))));
        }
        assert!(buffer.allocated_bytes() > TOKEN_BUFFER_CHUNK_SIZE);

        for id in ids {
            let _ = buffer.extract(id);
        }
        let before = buffer.allocated_bytes();
        buffer.free_memory();
        assert!(buffer.allocated_bytes() < before);
        assert_eq!(buffer.live_entries(), 0);
    }

    #[test]
    #[should_panic(expected = "already-freed chunk")]
    fn test_extract_from_freed_chunk_panics() {
        let mut buffer = TraceTokenBuffer::new();
        let gen = generation();
        let mut ids = Vec::new();
        for i in 0..20000u32 {
            let blob = TraceBlob::from_vec(i.to_le_bytes().to_vec());
            ids.push(buffer.append(TrackedPacket::new(blob, Rc::clone(&gen))));
        }
        let stale = ids[0];
        for id in ids {
            let _ = buffer.extract(id);
        }
        buffer.free_memory();
        let _ = buffer.extract(stale);
    }
}
