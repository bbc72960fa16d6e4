//! Thread descriptor packets: persistent thread identity and the reference
//! values later delta-encoded packets resolve against.

use super::{ModuleResult, TraceModule};
use crate::pipeline::{PacketDecoder, TokenizeContext};
use crate::stats::Stat;
use crate::wire::fields::{self, thread_descriptor};
use crate::wire::FieldIter;
use log::debug;

const REGISTERED_FIELDS: &[u32] = &[fields::THREAD_DESCRIPTOR];

/// Tokenize-only module. Descriptor packets mutate the sequence's current
/// generation in place and carry no sortable payload themselves.
#[derive(Debug, Default)]
pub struct ThreadDescriptorModule;

impl ThreadDescriptorModule {
    pub fn new() -> Self {
        Self
    }
}

impl TraceModule for ThreadDescriptorModule {
    fn registered_fields(&self) -> &'static [u32] {
        REGISTERED_FIELDS
    }

    fn tokenize_packet(
        &mut self,
        ctx: &mut TokenizeContext<'_>,
        decoder: &PacketDecoder,
        field_id: u32,
    ) -> ModuleResult {
        let Some(body) = decoder
            .payload_field(field_id)
            .and_then(|f| f.value.as_blob())
        else {
            ctx.stats
                .borrow_mut()
                .increment(Stat::MalformedPacketErrors);
            return ModuleResult::Handled;
        };

        let mut pid = None;
        let mut tid = None;
        for field in FieldIter::new(body) {
            let Ok(field) = field else {
                debug!(
                    "sequence {}: malformed thread descriptor",
                    ctx.sequence_id
                );
                ctx.stats
                    .borrow_mut()
                    .increment(Stat::MalformedPacketErrors);
                return ModuleResult::Handled;
            };
            match (field.id, field.value.as_varint()) {
                (thread_descriptor::PID, Some(v)) => pid = Some(v as i64),
                (thread_descriptor::TID, Some(v)) => tid = Some(v as i64),
                (thread_descriptor::REFERENCE_TIMESTAMP_NS, Some(v)) => {
                    ctx.generation.set_reference_timestamp(v as i64);
                }
                (thread_descriptor::REFERENCE_THREAD_TIME_NS, Some(v)) => {
                    ctx.generation.set_reference_thread_time(v as i64);
                }
                _ => {}
            }
        }
        if let (Some(pid), Some(tid)) = (pid, tid) {
            ctx.generation.set_thread_identity(pid, tid);
        }
        ModuleResult::Handled
    }
}
