use std::cell::RefCell;
use std::rc::Rc;

use trace_ingest::modules::{ModuleResult, TraceModule};
use trace_ingest::pipeline::{IngestPipeline, PacketDecoder, ParseContext, PipelineConfig, TokenizeContext};
use trace_ingest::stats::Stat;
use trace_ingest::token_buffer::TrackedPacket;
use trace_ingest::wire::{fields, MessageWriter, TraceBlob};

/// A payload field id no bundled module claims.
const PROBE_FIELD: u32 = 40;

/// Records every dispatch call it receives and answers with canned results.
struct ProbeModule {
    name: &'static str,
    tokenize_result: ModuleResult,
    parse_result: ModuleResult,
    calls: Rc<RefCell<Vec<String>>>,
}

impl ProbeModule {
    fn new(
        name: &'static str,
        tokenize_result: ModuleResult,
        parse_result: ModuleResult,
        calls: Rc<RefCell<Vec<String>>>,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name,
            tokenize_result,
            parse_result,
            calls,
        }))
    }
}

impl TraceModule for ProbeModule {
    fn registered_fields(&self) -> &'static [u32] {
        &[PROBE_FIELD]
    }

    fn tokenize_packet(
        &mut self,
        _ctx: &mut TokenizeContext<'_>,
        _decoder: &PacketDecoder,
        _field_id: u32,
    ) -> ModuleResult {
        self.calls.borrow_mut().push(format!("{}:tokenize", self.name));
        self.tokenize_result.clone()
    }

    fn parse_packet(
        &mut self,
        _ctx: &mut ParseContext,
        _timestamp: i64,
        _data: &TrackedPacket,
        _field_id: u32,
    ) -> ModuleResult {
        self.calls.borrow_mut().push(format!("{}:parse", self.name));
        self.parse_result.clone()
    }

    fn on_first_packet_on_sequence(&mut self, sequence_id: u64) {
        self.calls
            .borrow_mut()
            .push(format!("{}:first_packet:{sequence_id}", self.name));
    }

    fn on_incremental_state_cleared(&mut self, sequence_id: u64) {
        self.calls
            .borrow_mut()
            .push(format!("{}:cleared:{sequence_id}", self.name));
    }

    fn notify_end_of_file(&mut self, _ctx: &mut ParseContext) {
        self.calls.borrow_mut().push(format!("{}:eof", self.name));
    }
}

fn probe_packet(sequence_id: u64, timestamp: u64) -> TraceBlob {
    let mut packet = MessageWriter::new();
    packet.append_varint(fields::SEQUENCE_ID, sequence_id);
    packet.append_varint(fields::TIMESTAMP, timestamp);
    packet.append_bytes(PROBE_FIELD, b"payload");
    packet.into_blob()
}

fn calls_of(calls: &Rc<RefCell<Vec<String>>>, suffix: &str) -> Vec<String> {
    calls
        .borrow()
        .iter()
        .filter(|c| c.ends_with(suffix))
        .cloned()
        .collect()
}

#[test]
fn test_tokenize_stops_on_first_non_ignored() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());
    pipeline.register_module(ProbeModule::new(
        "a",
        ModuleResult::Ignored,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));
    pipeline.register_module(ProbeModule::new(
        "b",
        ModuleResult::Handled,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));
    pipeline.register_module(ProbeModule::new(
        "c",
        ModuleResult::Handled,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));

    pipeline.push_packet(probe_packet(1, 100));

    assert_eq!(
        calls_of(&calls, ":tokenize"),
        vec!["a:tokenize", "b:tokenize"]
    );
}

#[test]
fn test_parse_fans_out_to_every_module() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());
    for name in ["a", "b", "c"] {
        pipeline.register_module(ProbeModule::new(
            name,
            ModuleResult::Ignored,
            // Mixed return values must not stop parse fan-out.
            if name == "b" {
                ModuleResult::Handled
            } else {
                ModuleResult::Ignored
            },
            Rc::clone(&calls),
        ));
    }

    // All modules ignore at tokenize, so the driver default-pushes the
    // unit to the sorter once.
    pipeline.push_packet(probe_packet(1, 100));
    pipeline.finalize();

    assert_eq!(
        calls_of(&calls, ":parse"),
        vec!["a:parse", "b:parse", "c:parse"]
    );
}

#[test]
fn test_module_error_aborts_unit_only() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());
    pipeline.register_module(ProbeModule::new(
        "bad",
        ModuleResult::error("boom"),
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));
    pipeline.register_module(ProbeModule::new(
        "next",
        ModuleResult::Handled,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));

    pipeline.push_packet(probe_packet(1, 100));
    // The error consumed the first unit; a later packet still dispatches
    // and its error is counted independently.
    pipeline.push_packet(probe_packet(1, 200));
    pipeline.finalize();

    let stats = pipeline.stats();
    assert_eq!(stats.borrow().get(Stat::ModuleErrors), 2);
    assert_eq!(
        calls_of(&calls, ":tokenize"),
        vec!["bad:tokenize", "bad:tokenize"]
    );
    // The second module never ran: the error stopped dispatch each time.
    assert!(calls_of(&calls, ":tokenize")
        .iter()
        .all(|c| c.starts_with("bad")));
}

#[test]
fn test_parse_error_stops_fanout_for_that_unit() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());
    pipeline.register_module(ProbeModule::new(
        "bad",
        ModuleResult::Ignored,
        ModuleResult::error("parse boom"),
        Rc::clone(&calls),
    ));
    pipeline.register_module(ProbeModule::new(
        "after",
        ModuleResult::Ignored,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));

    pipeline.push_packet(probe_packet(1, 100));
    pipeline.push_packet(probe_packet(1, 200));
    pipeline.finalize();

    assert_eq!(pipeline.stats().borrow().get(Stat::ModuleErrors), 2);
    assert_eq!(calls_of(&calls, ":parse"), vec!["bad:parse", "bad:parse"]);
}

#[test]
fn test_lifecycle_broadcasts() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());
    pipeline.register_module(ProbeModule::new(
        "m",
        ModuleResult::Handled,
        ModuleResult::Ignored,
        Rc::clone(&calls),
    ));

    pipeline.push_packet(probe_packet(7, 100));

    let mut cleared = MessageWriter::new();
    cleared.append_varint(fields::SEQUENCE_ID, 7);
    cleared.append_varint(fields::SEQUENCE_FLAGS, 1); // incremental state cleared
    pipeline.push_packet(cleared.into_blob());

    pipeline.finalize();
    pipeline.finalize(); // end of file is broadcast exactly once

    assert_eq!(calls_of(&calls, ":first_packet:7"), vec!["m:first_packet:7"]);
    assert_eq!(calls_of(&calls, ":cleared:7"), vec!["m:cleared:7"]);
    assert_eq!(calls_of(&calls, ":eof"), vec!["m:eof"]);
}

#[test]
fn test_unregistered_fields_are_counted_not_fatal() {
    let mut pipeline = IngestPipeline::empty(PipelineConfig::default());

    // Statically known range, nobody registered.
    pipeline.push_packet(probe_packet(1, 100));
    // Dynamic extension range, nobody registered.
    let mut packet = MessageWriter::new();
    packet.append_varint(fields::SEQUENCE_ID, 1);
    packet.append_varint(fields::TIMESTAMP, 200);
    packet.append_bytes(70, b"ext");
    pipeline.push_packet(packet.into_blob());

    let stats = pipeline.stats();
    assert_eq!(stats.borrow().get(Stat::TokenizerSkippedPackets), 1);
    assert_eq!(stats.borrow().get(Stat::UnknownExtensionFields), 1);
}
