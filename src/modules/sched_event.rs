//! Scheduler context switches: a high-frequency per-CPU source. Events are
//! fanned out to a per-track sorter stream keyed by CPU index so arrival
//! locality is preserved until the global merge.

use super::{ModuleResult, TraceModule};
use crate::pipeline::{PacketDecoder, ParseContext, TokenizeContext};
use crate::stats::Stat;
use crate::token_buffer::TrackedPacket;
use crate::trackers::{SchedRow, SchedTracker};
use crate::wire::fields::{self, sched_event};
use crate::wire::{self, FieldIter, TraceBlob};
use std::cell::RefCell;
use std::rc::Rc;

const REGISTERED_FIELDS: &[u32] = &[fields::SCHED_EVENT];

pub struct SchedEventModule {
    sched: Rc<RefCell<SchedTracker>>,
}

impl SchedEventModule {
    pub fn new(sched: Rc<RefCell<SchedTracker>>) -> Self {
        Self { sched }
    }

    fn event_body(packet: &TraceBlob) -> Option<TraceBlob> {
        wire::find_field(packet, fields::SCHED_EVENT)?.as_blob().cloned()
    }
}

impl TraceModule for SchedEventModule {
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
        let cpu = decoder
            .payload_field(field_id)
            .and_then(|f| f.value.as_blob())
            .and_then(|body| wire::find_field(body, sched_event::CPU))
            .and_then(|v| v.as_varint());
        let Some(cpu) = cpu else {
            ctx.stats
                .borrow_mut()
                .increment(Stat::MalformedPacketErrors);
            return ModuleResult::Handled;
        };

        let packet = TrackedPacket::new(decoder.raw().clone(), Rc::clone(&ctx.generation));
        ctx.sorter
            .push_to_track(cpu as usize, timestamp, field_id, packet);
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
            return ModuleResult::error("sched event payload disappeared between phases");
        };

        let mut cpu = 0u32;
        let mut prev_pid = 0i64;
        let mut next_pid = 0i64;
        let mut next_comm = None;
        for field in FieldIter::new(&body).flatten() {
            match (field.id, &field.value) {
                (sched_event::CPU, v) => cpu = v.as_varint().unwrap_or(0) as u32,
                (sched_event::PREV_PID, v) => prev_pid = v.as_varint().unwrap_or(0) as i64,
                (sched_event::NEXT_PID, v) => next_pid = v.as_varint().unwrap_or(0) as i64,
                (sched_event::NEXT_COMM, v) => {
                    next_comm = v
                        .as_blob()
                        .map(|b| String::from_utf8_lossy(b.bytes()).into_owned());
                }
                _ => {}
            }
        }

        self.sched.borrow_mut().insert(SchedRow {
            timestamp,
            cpu,
            prev_pid,
            next_pid,
            next_comm,
        });
        ModuleResult::Handled
    }
}
