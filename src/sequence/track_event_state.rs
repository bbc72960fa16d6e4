//! Reference timestamps and persistent thread identity for one sequence.

/// Incremental track-event state: the reference values delta-encoded fields
/// resolve against, plus pid/tid identity.
///
/// The references are cleared when incremental state is cleared; pid/tid
/// identity is persistent and survives clears.
#[derive(Debug, Clone, Default)]
pub struct TrackEventSequenceState {
    pid: Option<i64>,
    tid: Option<i64>,
    reference_timestamp_ns: Option<i64>,
    reference_thread_time_ns: Option<i64>,
    reference_thread_instruction_count: Option<i64>,
}

impl TrackEventSequenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state carried into a generation forked by an incremental-state
    /// clear: identity survives, references do not.
    pub fn cleared(&self) -> Self {
        Self {
            pid: self.pid,
            tid: self.tid,
            ..Self::default()
        }
    }

    pub fn pid(&self) -> Option<i64> {
        self.pid
    }

    pub fn tid(&self) -> Option<i64> {
        self.tid
    }

    pub fn set_thread_identity(&mut self, pid: i64, tid: i64) {
        self.pid = Some(pid);
        self.tid = Some(tid);
    }

    pub fn reference_timestamp(&self) -> Option<i64> {
        self.reference_timestamp_ns
    }

    pub fn set_reference_timestamp(&mut self, timestamp_ns: i64) {
        self.reference_timestamp_ns = Some(timestamp_ns);
    }

    pub fn set_reference_thread_time(&mut self, thread_time_ns: i64) {
        self.reference_thread_time_ns = Some(thread_time_ns);
    }

    pub fn reference_thread_time(&self) -> Option<i64> {
        self.reference_thread_time_ns
    }

    /// Resolve a delta-encoded timestamp against the current reference and
    /// advance the reference. `None` if no reference has been seen yet.
    pub fn increment_timestamp(&mut self, delta_ns: i64) -> Option<i64> {
        let resolved = self.reference_timestamp_ns? + delta_ns;
        self.reference_timestamp_ns = Some(resolved);
        Some(resolved)
    }

    /// Same contract as `increment_timestamp`, for thread time.
    pub fn increment_thread_time(&mut self, delta_ns: i64) -> Option<i64> {
        let resolved = self.reference_thread_time_ns? + delta_ns;
        self.reference_thread_time_ns = Some(resolved);
        Some(resolved)
    }

    /// Same contract, for the instruction counter.
    pub fn increment_thread_instruction_count(&mut self, delta: i64) -> Option<i64> {
        let resolved = self.reference_thread_instruction_count? + delta;
        self.reference_thread_instruction_count = Some(resolved);
        Some(resolved)
    }

    pub fn set_reference_thread_instruction_count(&mut self, count: i64) {
        self.reference_thread_instruction_count = Some(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_requires_reference() {
        let mut state = TrackEventSequenceState::new();
        assert_eq!(state.increment_timestamp(50), None);
        state.set_reference_timestamp(1000);
        assert_eq!(state.increment_timestamp(50), Some(1050));
        assert_eq!(state.increment_timestamp(10), Some(1060));
    }

    #[test]
    fn test_thread_counters_increment_independently() {
        let mut state = TrackEventSequenceState::new();
        state.set_reference_thread_time(500);
        assert_eq!(state.increment_thread_time(20), Some(520));
        assert_eq!(state.increment_thread_instruction_count(5), None);
        state.set_reference_thread_instruction_count(100);
        assert_eq!(state.increment_thread_instruction_count(5), Some(105));
        // Timestamp reference remains untouched.
        assert_eq!(state.increment_timestamp(1), None);
    }

    #[test]
    fn test_cleared_keeps_identity_drops_references() {
        let mut state = TrackEventSequenceState::new();
        state.set_thread_identity(10, 20);
        state.set_reference_timestamp(1000);
        state.set_reference_thread_time(500);

        let cleared = state.cleared();
        assert_eq!(cleared.pid(), Some(10));
        assert_eq!(cleared.tid(), Some(20));
        assert_eq!(cleared.reference_timestamp(), None);
        assert_eq!(cleared.reference_thread_time(), None);
    }
}
