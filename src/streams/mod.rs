//! Per-track fan-out streams.
//!
//! High-frequency sources arrive physically grouped by track (for example
//! per CPU) and must not force a global insort per event. Each track gets
//! its own push-order-preserving slot; global ordering is deferred to the
//! merge stage, which only interleaves each track's locally-ordered run.

/// A dense-integer-indexed set of lazily constructed stream slots.
///
/// The vector grows to accommodate the highest index seen; a slot is only
/// constructed when its index is actually pushed to, so an empty trace
/// never creates slots.
#[derive(Debug)]
pub struct StreamSet<S> {
    streams: Vec<Option<S>>,
}

impl<S> Default for StreamSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StreamSet<S> {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// The slot for a track index, growing the vector and constructing the
    /// slot via the factory on first use.
    pub fn for_track(&mut self, index: usize, factory: impl FnOnce(usize) -> S) -> &mut S {
        if index >= self.streams.len() {
            self.streams.resize_with(index + 1, || None);
        }
        self.streams[index].get_or_insert_with(|| factory(index))
    }

    /// The slot for a track index, if it was ever pushed to.
    pub fn get(&self, index: usize) -> Option<&S> {
        self.streams.get(index).and_then(|s| s.as_ref())
    }

    /// Number of constructed slots.
    pub fn constructed_count(&self) -> usize {
        self.streams.iter().filter(|s| s.is_some()).count()
    }

    /// Iterate constructed slots in track order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut S)> {
        self.streams
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|s| (i, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_on_demand_and_preserves_push_order() {
        let mut set: StreamSet<Vec<u32>> = StreamSet::new();
        set.for_track(3, |_| Vec::new()).push(1);
        set.for_track(3, |_| Vec::new()).push(2);
        set.for_track(0, |_| Vec::new()).push(9);

        assert_eq!(set.get(3).unwrap(), &[1, 2]);
        assert_eq!(set.get(0).unwrap(), &[9]);
    }

    #[test]
    fn test_intermediate_slots_not_constructed() {
        let mut set: StreamSet<Vec<u32>> = StreamSet::new();
        let mut built = Vec::new();
        set.for_track(5, |i| {
            built.push(i);
            Vec::new()
        });
        assert_eq!(built, vec![5]);
        assert_eq!(set.constructed_count(), 1);
        assert!(set.get(2).is_none());
        assert!(set.get(4).is_none());
    }

    #[test]
    fn test_factory_runs_once_per_slot() {
        let mut set: StreamSet<u32> = StreamSet::new();
        let mut calls = 0;
        for _ in 0..3 {
            set.for_track(1, |_| {
                calls += 1;
                0
            });
        }
        assert_eq!(calls, 1);
    }
}
