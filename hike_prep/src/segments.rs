//! Segment-level transforms: distance decimation, length-bounded splitting,
//! moving-average smoothing and elevation sanity filtering.

use std::collections::VecDeque;

use tracing::debug;

use crate::geometry::{distance_2d, TrackPoint, TrackSegment};
use crate::PrepError;

/// Drop points that lie within `min_distance_m` of the last kept point.
///
/// The first point is always kept and order is preserved. An empty segment
/// stays empty.
pub fn decimate_segment(segment: TrackSegment, min_distance_m: f64) -> TrackSegment {
    let mut kept: Vec<TrackPoint> = Vec::with_capacity(segment.len());
    for point in segment.points {
        match kept.last() {
            Some(last) if distance_2d(last, &point) <= min_distance_m => {}
            _ => kept.push(point),
        }
    }
    TrackSegment::new(kept)
}

pub fn filter_segments(segments: Vec<TrackSegment>, min_distance_m: f64) -> Vec<TrackSegment> {
    segments
        .into_iter()
        .map(|segment| decimate_segment(segment, min_distance_m))
        .collect()
}

/// Bisect segments by point count until each is shorter than `max_length_m`.
///
/// Work is breadth-first over a queue, so output order differs from input
/// order once anything is split. Points are moved into the halves, never
/// copied. A segment with fewer than two points cannot be shortened and is
/// emitted as-is.
pub fn split_segments_by_length(
    segments: Vec<TrackSegment>,
    max_length_m: f64,
) -> Vec<TrackSegment> {
    let mut out = Vec::with_capacity(segments.len());
    let mut queue: VecDeque<TrackSegment> = segments.into();

    while let Some(mut segment) = queue.pop_front() {
        if segment.len() < 2 || segment.length_2d() < max_length_m {
            out.push(segment);
            continue;
        }
        let mid = segment.len() / 2;
        let tail = TrackSegment::new(segment.points.split_off(mid));
        for half in [segment, tail] {
            if half.len() < 2 {
                out.push(half);
            } else {
                queue.push_back(half);
            }
        }
    }
    out
}

/// Replace interior coordinates by the centred moving average and trim the
/// `(window_size - 1) / 2` points at either end that cannot be centred.
///
/// Averages read from a snapshot of the original points. Elevation is averaged
/// only when every point in the window has one; otherwise the point keeps its
/// own. Timestamps stay with their index. Segments shorter than the window
/// are left alone.
pub fn smooth_coordinates(
    segments: &mut [TrackSegment],
    window_size: usize,
) -> Result<(), PrepError> {
    if window_size % 2 == 0 {
        return Err(PrepError::Configuration(format!(
            "window size should be an odd number, {} given",
            window_size
        )));
    }
    let half = (window_size - 1) / 2;
    let count = window_size as f64;

    for segment in segments.iter_mut() {
        let n = segment.len();
        if n < window_size {
            continue;
        }
        let original = std::mem::take(&mut segment.points);
        segment.points = (half..n - half)
            .map(|i| {
                let window = &original[i - half..=i + half];
                let longitude = window.iter().map(|p| p.longitude).sum::<f64>() / count;
                let latitude = window.iter().map(|p| p.latitude).sum::<f64>() / count;
                let elevation = window
                    .iter()
                    .map(|p| p.elevation)
                    .sum::<Option<f64>>()
                    .map(|total| total / count)
                    .or(original[i].elevation);
                TrackPoint {
                    longitude,
                    latitude,
                    elevation,
                    time: original[i].time,
                }
            })
            .collect();
    }
    Ok(())
}

/// Keep segments whose climb and descent both stay strictly below
/// `max_elevation_diff_m`. Anything else is treated as a measurement error
/// and dropped whole.
pub fn filter_bad_segments(
    segments: Vec<TrackSegment>,
    max_elevation_diff_m: f64,
) -> Vec<TrackSegment> {
    let before = segments.len();
    let kept: Vec<TrackSegment> = segments
        .into_iter()
        .filter(|segment| {
            let ud = segment.uphill_downhill();
            ud.uphill < max_elevation_diff_m && ud.downhill < max_elevation_diff_m
        })
        .collect();
    if kept.len() < before {
        debug!(
            "Dropped {} of {} segments exceeding {} m elevation change",
            before - kept.len(),
            before,
            max_elevation_diff_m
        );
    }
    kept
}
