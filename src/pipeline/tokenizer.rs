//! Tokenize phase: arrival-order envelope decoding, sequence lifecycle
//! handling, and stop-on-first module dispatch.

use super::{IngestPipeline, TokenizeContext};
use crate::modules::ModuleResult;
use crate::sequence::PacketSequenceState;
use crate::stats::Stat;
use crate::token_buffer::TrackedPacket;
use crate::utils::config::MIN_DYNAMIC_FIELD_ID;
use crate::utils::error::WireError;
use crate::wire::fields::{self, SequenceFlags};
use crate::wire::{Field, FieldIter, TraceBlob};
use log::{debug, warn};
use smallvec::SmallVec;
use std::rc::Rc;

/// Decoded packet envelope. Envelope fields are pulled out; everything else
/// stays in `payload` as the dispatch keys.
#[derive(Debug)]
pub struct PacketDecoder {
    raw: TraceBlob,
    sequence_id: Option<u64>,
    timestamp: Option<i64>,
    timestamp_delta: Option<i64>,
    flags: SequenceFlags,
    interned_data: Option<TraceBlob>,
    trace_packet_defaults: Option<TraceBlob>,
    payload: SmallVec<[Field; 4]>,
}

impl PacketDecoder {
    pub fn decode(raw: TraceBlob) -> Result<Self, WireError> {
        let mut decoder = Self {
            raw: raw.clone(),
            sequence_id: None,
            timestamp: None,
            timestamp_delta: None,
            flags: SequenceFlags::empty(),
            interned_data: None,
            trace_packet_defaults: None,
            payload: SmallVec::new(),
        };
        for field in FieldIter::new(&raw) {
            let field = field?;
            match (field.id, &field.value) {
                (fields::SEQUENCE_ID, v) => decoder.sequence_id = v.as_varint(),
                (fields::TIMESTAMP, v) => decoder.timestamp = v.as_varint().map(|t| t as i64),
                (fields::TIMESTAMP_DELTA, v) => {
                    decoder.timestamp_delta = v.as_varint().map(|t| t as i64)
                }
                (fields::SEQUENCE_FLAGS, v) => {
                    decoder.flags =
                        SequenceFlags::from_bits_truncate(v.as_varint().unwrap_or(0));
                }
                (fields::INTERNED_DATA, v) => {
                    decoder.interned_data = v.as_blob().cloned();
                }
                (fields::TRACE_PACKET_DEFAULTS, v) => {
                    decoder.trace_packet_defaults = v.as_blob().cloned();
                }
                _ => decoder.payload.push(field),
            }
        }
        Ok(decoder)
    }

    /// The whole packet, for re-wrapping or deferred decoding.
    pub fn raw(&self) -> &TraceBlob {
        &self.raw
    }

    pub fn sequence_id(&self) -> Option<u64> {
        self.sequence_id
    }

    pub fn flags(&self) -> SequenceFlags {
        self.flags
    }

    /// Payload fields in wire order.
    pub fn payload(&self) -> &[Field] {
        &self.payload
    }

    /// First payload occurrence of a field.
    pub fn payload_field(&self, field_id: u32) -> Option<&Field> {
        self.payload.iter().find(|f| f.id == field_id)
    }
}

impl IngestPipeline {
    /// Ingest one chunk: a top-level message of repeated packet fields.
    /// Malformed content degrades to diagnostic counters; it never aborts
    /// the run.
    pub fn push_chunk(&mut self, chunk: TraceBlob) {
        debug!("tokenizing chunk of {} bytes", chunk.len());
        for field in FieldIter::new(&chunk) {
            match field {
                Ok(f) if f.id == fields::PACKET => {
                    if let Some(packet) = f.value.as_blob() {
                        self.push_packet(packet.clone());
                    } else {
                        self.stats
                            .borrow_mut()
                            .increment(Stat::MalformedPacketErrors);
                    }
                }
                Ok(f) => {
                    debug!("unexpected top-level field {}", f.id);
                    self.stats
                        .borrow_mut()
                        .increment(Stat::MalformedPacketErrors);
                }
                Err(e) => {
                    warn!("chunk framing error: {e}");
                    self.stats
                        .borrow_mut()
                        .increment(Stat::MalformedPacketErrors);
                    break;
                }
            }
        }
        self.flush_sorter_window();
    }

    /// Ingest one packet, then any synthetic packets modules re-submitted
    /// while tokenizing it, in submission order.
    pub fn push_packet(&mut self, raw: TraceBlob) {
        self.tokenize_one(raw);
        while let Some(next) = self.synthetic.pop_front() {
            self.tokenize_one(next);
        }
    }

    fn tokenize_one(&mut self, raw: TraceBlob) {
        let decoder = match PacketDecoder::decode(raw) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("dropping undecodable packet: {e}");
                self.stats
                    .borrow_mut()
                    .increment(Stat::MalformedPacketErrors);
                return;
            }
        };

        let Some(sequence_id) = decoder.sequence_id() else {
            debug!("dropping packet without sequence id");
            self.stats
                .borrow_mut()
                .increment(Stat::UnresolvedSequenceErrors);
            return;
        };

        if !self.sequences.contains_key(&sequence_id) {
            self.sequences.insert(
                sequence_id,
                PacketSequenceState::new(sequence_id, Rc::clone(&self.stats)),
            );
            for module in self.registry.all_modules() {
                module.borrow_mut().on_first_packet_on_sequence(sequence_id);
            }
        }

        let flags = decoder.flags();
        if flags.contains(SequenceFlags::PREVIOUS_PACKET_DROPPED) {
            if let Some(sequence) = self.sequences.get_mut(&sequence_id) {
                sequence.on_packet_loss();
            }
        }
        if flags.contains(SequenceFlags::INCREMENTAL_STATE_CLEARED) {
            if let Some(sequence) = self.sequences.get_mut(&sequence_id) {
                sequence.on_incremental_state_cleared();
            }
            for module in self.registry.all_modules() {
                module
                    .borrow_mut()
                    .on_incremental_state_cleared(sequence_id);
            }
        }

        let Some(sequence) = self.sequences.get_mut(&sequence_id) else {
            return;
        };

        if flags.contains(SequenceFlags::NEEDS_INCREMENTAL_STATE)
            && !sequence.current_generation().is_incremental_state_valid()
        {
            debug!("sequence {sequence_id}: dropping packet that needs invalid incremental state");
            self.stats
                .borrow_mut()
                .increment(Stat::IncrementalStateInvalidPacketsDropped);
            return;
        }

        if let Some(defaults) = decoder.trace_packet_defaults.clone() {
            sequence.on_new_trace_packet_defaults(defaults);
        }
        let generation = sequence.current_generation();

        if let Some(interned) = &decoder.interned_data {
            for field in FieldIter::new(interned) {
                match field {
                    Ok(f) => match f.value.as_blob() {
                        Some(entry) => generation.intern_message(f.id, entry.clone()),
                        None => {
                            self.stats
                                .borrow_mut()
                                .increment(Stat::InternedDataTokenizerErrors);
                        }
                    },
                    Err(e) => {
                        debug!("sequence {sequence_id}: malformed interned data: {e}");
                        self.stats
                            .borrow_mut()
                            .increment(Stat::InternedDataTokenizerErrors);
                        break;
                    }
                }
            }
        }

        let timestamp = if let Some(ts) = decoder.timestamp {
            Some(ts)
        } else if let Some(delta) = decoder.timestamp_delta {
            if !generation.is_incremental_state_valid() {
                self.stats
                    .borrow_mut()
                    .increment(Stat::IncrementalStateInvalidPacketsDropped);
                return;
            }
            match generation.increment_timestamp(delta) {
                Some(resolved) => Some(resolved),
                None => {
                    debug!("sequence {sequence_id}: delta timestamp before any reference");
                    self.stats
                        .borrow_mut()
                        .increment(Stat::MissingTimestampReference);
                    return;
                }
            }
        } else {
            None
        };

        let mut ctx = TokenizeContext {
            stats: Rc::clone(&self.stats),
            sorter: &mut self.sorter,
            sequence_id,
            generation: Rc::clone(&generation),
            timestamp,
            synthetic: &mut self.synthetic,
        };

        for field in decoder.payload() {
            let interested = self.registry.modules_for_field(field.id);
            if interested.is_empty() {
                if field.id >= MIN_DYNAMIC_FIELD_ID {
                    ctx.stats
                        .borrow_mut()
                        .increment(Stat::UnknownExtensionFields);
                } else {
                    ctx.stats
                        .borrow_mut()
                        .increment(Stat::TokenizerSkippedPackets);
                }
                continue;
            }

            let mut outcome = ModuleResult::Ignored;
            for &index in interested {
                let module = self.registry.module(index);
                let result = module
                    .borrow_mut()
                    .tokenize_packet(&mut ctx, &decoder, field.id);
                if !result.is_ignored() {
                    outcome = result;
                    break;
                }
            }

            match outcome {
                ModuleResult::Handled => {}
                ModuleResult::Error(message) => {
                    warn!("sequence {sequence_id}: module error tokenizing field {}: {message}", field.id);
                    ctx.stats.borrow_mut().increment(Stat::ModuleErrors);
                    return;
                }
                ModuleResult::Ignored => {
                    // Default behavior: forward the unit to the sorter with
                    // the generation snapshot captured at tokenize time.
                    match ctx.timestamp {
                        Some(ts) => {
                            let packet = TrackedPacket::new(
                                decoder.raw().clone(),
                                Rc::clone(&ctx.generation),
                            );
                            ctx.sorter.push_sortable(ts, field.id, packet);
                        }
                        None => {
                            ctx.stats
                                .borrow_mut()
                                .increment(Stat::MissingTimestampPackets);
                        }
                    }
                }
            }
        }
    }
}
