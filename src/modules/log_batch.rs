//! Batched log packets. A producer bundles many log entries, each with its
//! own timestamp, into one wire packet; sorting the bundle by its envelope
//! timestamp would misplace every entry but the first. Tokenization splits
//! the batch: each entry is re-wrapped as a synthetic single-event packet
//! with its own resolved timestamp and re-submitted to the pipeline, then
//! the outer unit is consumed.

use super::{ModuleResult, TraceModule};
use crate::pipeline::{PacketDecoder, ParseContext, TokenizeContext};
use crate::stats::Stat;
use crate::token_buffer::TrackedPacket;
use crate::trackers::{LogRow, LogTracker};
use crate::wire::fields::{self, log_event};
use crate::wire::{self, FieldIter, MessageWriter, TraceBlob};
use std::cell::RefCell;
use std::rc::Rc;

const REGISTERED_FIELDS: &[u32] = &[fields::LOG_BATCH, fields::LOG_EVENT];

pub struct LogModule {
    logs: Rc<RefCell<LogTracker>>,
}

impl LogModule {
    pub fn new(logs: Rc<RefCell<LogTracker>>) -> Self {
        Self { logs }
    }

    fn split_batch(ctx: &mut TokenizeContext<'_>, batch: &TraceBlob) {
        for entry in wire::collect_fields(batch, log_event::BATCH_ENTRY) {
            let Some(entry) = entry.as_blob() else {
                ctx.stats
                    .borrow_mut()
                    .increment(Stat::MalformedPacketErrors);
                continue;
            };
            let Some(timestamp) =
                wire::find_field(entry, log_event::TIMESTAMP).and_then(|v| v.as_varint())
            else {
                ctx.stats
                    .borrow_mut()
                    .increment(Stat::MalformedPacketErrors);
                continue;
            };

            let mut event = MessageWriter::new();
            if let Some(severity) =
                wire::find_field(entry, log_event::SEVERITY).and_then(|v| v.as_varint())
            {
                event.append_varint(log_event::SEVERITY, severity);
            }
            if let Some(message) =
                wire::find_field(entry, log_event::MESSAGE).and_then(|v| v.as_blob().cloned())
            {
                event.append_bytes(log_event::MESSAGE, message.bytes());
            }

            let mut synthetic = MessageWriter::new();
            synthetic.append_varint(fields::SEQUENCE_ID, ctx.sequence_id);
            synthetic.append_varint(fields::TIMESTAMP, timestamp);
            synthetic.append_message(fields::LOG_EVENT, &event);
            ctx.push_synthetic_packet(synthetic.into_blob());
        }
    }
}

impl TraceModule for LogModule {
    fn registered_fields(&self) -> &'static [u32] {
        REGISTERED_FIELDS
    }

    fn tokenize_packet(
        &mut self,
        ctx: &mut TokenizeContext<'_>,
        decoder: &PacketDecoder,
        field_id: u32,
    ) -> ModuleResult {
        if field_id != fields::LOG_BATCH {
            // Synthetic single events take the default path to the sorter.
            return ModuleResult::Ignored;
        }
        let Some(batch) = decoder
            .payload_field(field_id)
            .and_then(|f| f.value.as_blob())
        else {
            ctx.stats
                .borrow_mut()
                .increment(Stat::MalformedPacketErrors);
            return ModuleResult::Handled;
        };
        Self::split_batch(ctx, batch);
        ModuleResult::Handled
    }

    fn parse_packet(
        &mut self,
        _ctx: &mut ParseContext,
        timestamp: i64,
        data: &TrackedPacket,
        field_id: u32,
    ) -> ModuleResult {
        if field_id != fields::LOG_EVENT {
            return ModuleResult::Ignored;
        }
        let Some(body) =
            wire::find_field(&data.data.packet, fields::LOG_EVENT).and_then(|v| v.as_blob().cloned())
        else {
            return ModuleResult::error("log event payload disappeared between phases");
        };

        let mut severity = 0u32;
        let mut message = String::new();
        for field in FieldIter::new(&body).flatten() {
            match (field.id, &field.value) {
                (log_event::SEVERITY, v) => severity = v.as_varint().unwrap_or(0) as u32,
                (log_event::MESSAGE, v) => {
                    if let Some(b) = v.as_blob() {
                        message = String::from_utf8_lossy(b.bytes()).into_owned();
                    }
                }
                _ => {}
            }
        }

        self.logs.borrow_mut().insert(LogRow {
            timestamp,
            severity,
            message,
        });
        ModuleResult::Handled
    }
}
