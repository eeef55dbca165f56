use crate::utils::Key;

/// Carts due on the next drain pass, in insertion order.
#[derive(Default)]
pub(crate) struct ImmediateTrack {
    keys: Vec<Key>,
}

impl ImmediateTrack {
    pub(crate) fn push(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Swaps the track out for an empty one.
    ///
    /// Carts pushed while the returned batch is being processed land in the
    /// next pass.
    pub(crate) fn take(&mut self) -> Vec<Key> {
        std::mem::take(&mut self.keys)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys.iter().copied()
    }
}

/// Carts due at an absolute time.
///
/// Entries are kept sorted by wake time in **descending** order so that the
/// earliest cart sits at the tail and is popped in O(1). Among equal wake
/// times, the earliest insertion is closest to the tail.
pub(crate) struct DeferredTrack {
    entries: Vec<(f64, Key)>,

    /// Below this length, insertion scans linearly instead of bisecting.
    linear_scan_threshold: usize,
}

impl DeferredTrack {
    pub(crate) fn new(linear_scan_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            linear_scan_threshold,
        }
    }

    /// Inserts a cart due at `at`, after every cart due at or before `at`.
    pub(crate) fn insert(&mut self, at: f64, key: Key) {
        let index = if self.entries.len() < self.linear_scan_threshold {
            self.entries
                .iter()
                .position(|&(t, _)| t <= at)
                .unwrap_or(self.entries.len())
        } else {
            self.entries.partition_point(|&(t, _)| t > at)
        };

        self.entries.insert(index, (at, key));
    }

    /// The earliest entry.
    pub(crate) fn peek(&self) -> Option<(f64, Key)> {
        self.entries.last().copied()
    }

    pub(crate) fn pop(&mut self) -> Option<(f64, Key)> {
        self.entries.pop()
    }

    /// Pops every entry due at or before `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: f64) -> Vec<Key> {
        let split = self.entries.partition_point(|&(t, _)| t > now);

        self.entries.drain(split..).rev().map(|(_, key)| key).collect()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().map(|&(_, key)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Slab;

    use rstest::rstest;

    fn keys(n: usize) -> (Slab<usize>, Vec<Key>) {
        let mut slab = Slab::new(n);
        let keys = (0..n).map(|i| slab.insert(i)).collect();
        (slab, keys)
    }

    #[rstest]
    #[case::linear(64)]
    #[case::bisect(0)]
    fn pops_in_time_order(#[case] threshold: usize) {
        let (_slab, k) = keys(4);
        let mut track = DeferredTrack::new(threshold);

        track.insert(3.0, k[0]);
        track.insert(1.0, k[1]);
        track.insert(2.0, k[2]);
        track.insert(0.5, k[3]);

        assert_eq!(track.pop_due(2.5), vec![k[3], k[1], k[2]]);
        assert_eq!(track.len(), 1);
        assert_eq!(track.peek(), Some((3.0, k[0])));
    }

    #[rstest]
    #[case::linear(64)]
    #[case::bisect(0)]
    fn equal_times_keep_insertion_order(#[case] threshold: usize) {
        let (_slab, k) = keys(5);
        let mut track = DeferredTrack::new(threshold);

        track.insert(1.0, k[0]);
        track.insert(2.0, k[1]);
        track.insert(1.0, k[2]);
        track.insert(1.0, k[3]);
        track.insert(0.0, k[4]);

        assert_eq!(track.pop_due(10.0), vec![k[4], k[0], k[2], k[3], k[1]]);
        assert!(track.is_empty());
    }

    #[test]
    fn nothing_due_yet() {
        let (_slab, k) = keys(1);
        let mut track = DeferredTrack::new(8);

        track.insert(5.0, k[0]);

        assert!(track.pop_due(4.999).is_empty());
        assert_eq!(track.pop(), Some((5.0, k[0])));
    }

    #[test]
    fn immediate_take_swaps_out() {
        let (_slab, k) = keys(3);
        let mut track = ImmediateTrack::default();

        track.push(k[0]);
        track.push(k[1]);

        let batch = track.take();
        track.push(k[2]);

        assert_eq!(batch, vec![k[0], k[1]]);
        assert_eq!(track.iter().collect::<Vec<_>>(), vec![k[2]]);
    }
}
