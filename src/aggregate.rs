//! Reduction of per-frame detections into session statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::detect::FrameResult;

/// Session-level statistics. Computed once, never mutated.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub object_count: usize,
    pub distinct_class_count: usize,
    /// Mean over every detected object; 0 when nothing was detected.
    pub mean_confidence: f64,
    pub frame_count: usize,
    pub class_counts: BTreeMap<u32, usize>,
}

/// Fold frames into statistics.
///
/// Every object weighs the same regardless of which frame it came from, so
/// this is not a mean of per-frame means. Records are counted as given: the
/// adapter already applied the confidence threshold.
pub fn aggregate(frames: &[FrameResult]) -> SessionStatistics {
    let mut object_count = 0usize;
    let mut confidence_sum = 0f64;
    let mut classes = BTreeSet::new();
    let mut class_counts: BTreeMap<u32, usize> = BTreeMap::new();

    for det in frames.iter().flat_map(FrameResult::iter) {
        object_count += 1;
        confidence_sum += f64::from(det.confidence);
        classes.insert(det.class_id);
        *class_counts.entry(det.class_id).or_default() += 1;
    }

    let mean_confidence = if object_count == 0 {
        0.0
    } else {
        confidence_sum / object_count as f64
    };

    SessionStatistics {
        object_count,
        distinct_class_count: classes.len(),
        mean_confidence,
        frame_count: frames.len(),
        class_counts,
    }
}
