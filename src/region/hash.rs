//! Spatial hash over the base boxes of a region set.
//!
//! Each non-empty box is filed under the bucket containing its low corner,
//! where buckets are `bucket`-sized blocks of index space and `bucket` is the
//! largest per-axis box extent. A box therefore spans at most two buckets per
//! axis, so a query only has to look one bucket below its own low corner.

use crate::geometry::{IndexBox, IntVect, SPACEDIM};
use hashbrown::HashMap;
use std::ops::ControlFlow;

#[derive(Debug, Clone)]
pub(crate) struct BoxHash {
    bucket: IntVect,
    bbox: IndexBox,
    bins: HashMap<IntVect, Vec<usize>>,
}

impl BoxHash {
    pub(crate) fn build(boxes: &[IndexBox]) -> Self {
        let mut bucket = IntVect::unit();
        let mut bbox = IndexBox::empty();
        for b in boxes.iter().filter(|b| !b.is_empty()) {
            bucket = bucket.max(b.size());
            bbox = bbox.bounding(b);
        }
        let mut bins: HashMap<IntVect, Vec<usize>> = HashMap::new();
        for (i, b) in boxes.iter().enumerate() {
            if b.is_empty() {
                continue;
            }
            bins.entry(b.lo().coarsen(bucket)).or_default().push(i);
        }
        log::trace!(
            "built box hash: {} boxes in {} bins, bucket {:?}",
            boxes.len(),
            bins.len(),
            bucket
        );
        Self { bucket, bbox, bins }
    }

    #[inline]
    pub(crate) fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// Visit every box index whose box may intersect `search`. Each index is
    /// visited at most once; order is unspecified.
    pub(crate) fn for_each_candidate<F>(&self, search: &IndexBox, mut f: F)
    where
        F: FnMut(usize) -> ControlFlow<()>,
    {
        let clipped = search.intersect(&self.bbox);
        if clipped.is_empty() || self.bins.is_empty() {
            return;
        }
        let kmin = (clipped.lo() - self.bucket + IntVect::unit()).coarsen(self.bucket);
        let kmax = clipped.hi().coarsen(self.bucket);
        let keys = IndexBox::cell(kmin, kmax);

        if keys.num_pts() > self.bins.len() as u64 {
            for (key, ids) in &self.bins {
                if keys.contains_point(*key) {
                    for &i in ids {
                        if f(i).is_break() {
                            return;
                        }
                    }
                }
            }
        } else {
            for key in keys.iter() {
                if let Some(ids) = self.bins.get(&key) {
                    for &i in ids {
                        if f(i).is_break() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Every non-empty box appears in exactly one bin, under its own low corner.
    pub(crate) fn is_consistent_with(&self, boxes: &[IndexBox]) -> bool {
        let mut seen = vec![false; boxes.len()];
        for (key, ids) in &self.bins {
            for &i in ids {
                if i >= boxes.len() || seen[i] || boxes[i].lo().coarsen(self.bucket) != *key {
                    return false;
                }
                if (0..SPACEDIM).any(|d| boxes[i].length(d) > self.bucket[d]) {
                    return false;
                }
                seen[i] = true;
            }
        }
        boxes
            .iter()
            .zip(seen)
            .all(|(b, s)| s == !b.is_empty())
    }
}
