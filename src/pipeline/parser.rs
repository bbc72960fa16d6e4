//! Parse phase: post-sort fan-out dispatch in global timestamp order.

use super::{IngestPipeline, ParseContext};
use crate::modules::{ModuleRegistry, ModuleResult};
use crate::stats::Stat;
use crate::token_buffer::TrackedPacket;
use log::{debug, warn};
use std::rc::Rc;

impl IngestPipeline {
    /// Drain every pending unit through the parse phase, then broadcast
    /// end-of-file to all modules exactly once.
    pub fn finalize(&mut self) {
        debug!("finalizing: {} pending units", self.sorter.pending_count());
        let registry = &self.registry;
        let mut ctx = ParseContext {
            stats: Rc::clone(&self.stats),
        };
        self.sorter
            .extract_all(|ts, field_id, packet| parse_unit(registry, &mut ctx, ts, field_id, packet));
        if !self.eof_notified {
            self.eof_notified = true;
            for module in registry.all_modules() {
                module.borrow_mut().notify_end_of_file(&mut ctx);
            }
        }
    }

    /// Flush units that have fallen out of the sorter's bounded window,
    /// parsing them early. Called after every chunk.
    pub(crate) fn flush_sorter_window(&mut self) {
        let registry = &self.registry;
        let mut ctx = ParseContext {
            stats: Rc::clone(&self.stats),
        };
        self.sorter
            .maybe_flush(|ts, field_id, packet| parse_unit(registry, &mut ctx, ts, field_id, packet));
    }
}

/// Fan-out dispatch: every module registered for the field is invoked once,
/// using the generation snapshot the unit captured at tokenize time. An
/// error aborts dispatch for this one unit only.
fn parse_unit(
    registry: &ModuleRegistry,
    ctx: &mut ParseContext,
    timestamp: i64,
    field_id: u32,
    packet: TrackedPacket,
) {
    for &index in registry.modules_for_field(field_id) {
        let module = registry.module(index);
        let result = module
            .borrow_mut()
            .parse_packet(ctx, timestamp, &packet, field_id);
        if let ModuleResult::Error(message) = result {
            warn!("module error parsing field {field_id} at ts {timestamp}: {message}");
            ctx.stats.borrow_mut().increment(Stat::ModuleErrors);
            return;
        }
    }
}
