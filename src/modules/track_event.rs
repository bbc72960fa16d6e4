//! Track events: the high-level instrumentation payload. Tokenization
//! pre-extracts the optional per-thread scalars so the sorter can pack
//! them; parsing resolves the interned event name against the generation
//! snapshot and emits a slice row.

use super::{ModuleResult, TraceModule};
use crate::pipeline::{PacketDecoder, ParseContext, TokenizeContext};
use crate::stats::Stat;
use crate::token_buffer::TrackedPacket;
use crate::trackers::{SliceRow, SliceTracker};
use crate::utils::config::MAX_EXTRA_COUNTERS;
use crate::wire::fields::{self, interned, track_event};
use crate::wire::{self, FieldIter, TraceBlob};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

const REGISTERED_FIELDS: &[u32] = &[fields::TRACK_EVENT];

pub struct TrackEventModule {
    slices: Rc<RefCell<SliceTracker>>,
}

impl TrackEventModule {
    pub fn new(slices: Rc<RefCell<SliceTracker>>) -> Self {
        Self { slices }
    }

    fn event_body(packet: &TraceBlob) -> Option<TraceBlob> {
        wire::find_field(packet, fields::TRACK_EVENT)?.as_blob().cloned()
    }
}

impl TraceModule for TrackEventModule {
    fn registered_fields(&self) -> &'static [u32] {
        REGISTERED_FIELDS
    }

    fn tokenize_packet(
        &mut self,
        ctx: &mut TokenizeContext<'_>,
        decoder: &PacketDecoder,
        field_id: u32,
    ) -> ModuleResult {
        let Some(timestamp) = ctx.timestamp else {
            ctx.stats
                .borrow_mut()
                .increment(Stat::MissingTimestampPackets);
            return ModuleResult::Handled;
        };
        let Some(body) = decoder
            .payload_field(field_id)
            .and_then(|f| f.value.as_blob())
        else {
            ctx.stats
                .borrow_mut()
                .increment(Stat::MalformedPacketErrors);
            return ModuleResult::Handled;
        };

        let mut packet =
            TrackedPacket::new(decoder.raw().clone(), Rc::clone(&ctx.generation));
        for field in FieldIter::new(body).flatten() {
            match (field.id, field.value.as_varint()) {
                (track_event::THREAD_TIME_NS, Some(v)) => {
                    packet.thread_timestamp = Some(v as i64);
                }
                (track_event::THREAD_INSTRUCTION_COUNT, Some(v)) => {
                    packet.thread_instruction_count = Some(v as i64);
                }
                (track_event::EXTRA_COUNTER_VALUES, Some(v)) => {
                    if packet.extra_counter_values.len() == MAX_EXTRA_COUNTERS {
                        // Producer violated the counter cap; skip the unit
                        // rather than silently truncate it.
                        debug!(
                            "sequence {}: track event exceeds extra counter cap",
                            ctx.sequence_id
                        );
                        ctx.stats
                            .borrow_mut()
                            .increment(Stat::MalformedPacketErrors);
                        return ModuleResult::Handled;
                    }
                    packet
                        .extra_counter_values
                        .push(wire::zigzag_decode(v));
                }
                _ => {}
            }
        }

        ctx.sorter.push_sortable(timestamp, field_id, packet);
        ModuleResult::Handled
    }

    fn parse_packet(
        &mut self,
        _ctx: &mut ParseContext,
        timestamp: i64,
        data: &TrackedPacket,
        _field_id: u32,
    ) -> ModuleResult {
        let Some(body) = Self::event_body(&data.data.packet) else {
            return ModuleResult::error("track event payload disappeared between phases");
        };
        let generation = &data.data.generation;

        let name = match wire::find_field(&body, track_event::NAME_IID).and_then(|v| v.as_varint())
        {
            Some(iid) => {
                // Resolved against the snapshot captured at tokenize time;
                // a miss has already been counted by the generation.
                let Some(entry) = generation.interned_message(interned::EVENT_NAMES, iid) else {
                    debug!("unresolvable event name iid {iid}");
                    return ModuleResult::Handled;
                };
                match wire::find_field(&entry, interned::ENTRY_STR).and_then(|v| {
                    v.as_blob()
                        .map(|b| String::from_utf8_lossy(b.bytes()).into_owned())
                }) {
                    Some(name) => name,
                    None => return ModuleResult::Handled,
                }
            }
            None => String::from("[unnamed]"),
        };

        self.slices.borrow_mut().insert(SliceRow {
            timestamp,
            name,
            pid: generation.pid(),
            tid: generation.tid(),
            thread_timestamp: data.thread_timestamp,
        });
        ModuleResult::Handled
    }
}
