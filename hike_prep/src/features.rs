//! Per-segment feature records and their columnar store.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::TrackSegment;
use crate::PrepError;

/// Field names of a feature record, in list order.
pub const HEADER: [&str; 8] = [
    "Length2d",
    "Length3d",
    "Duration",
    "MovingTime",
    "StoppedTime",
    "TotalUphill",
    "TotalDownhill",
    "Path",
];

/// Convert a segment into an `(num_points_path, 3)` array of
/// `(longitude, latitude, elevation)` rows, translated so the first point is
/// the origin and rotated so the centre of mass lies on the positive x-axis.
///
/// Rows past the segment's point count stay zero. Missing elevations take
/// the segment's first known elevation, so they read as zero after the
/// translation.
pub fn path_to_feature(
    segment: &TrackSegment,
    num_points_path: usize,
) -> Result<Array2<f64>, PrepError> {
    let n = segment.len();
    if n == 0 {
        return Err(PrepError::Validation(
            "path does not contain any points".into(),
        ));
    }
    if n > num_points_path {
        return Err(PrepError::Validation(format!(
            "path too long: {} points, at most {} allowed",
            n, num_points_path
        )));
    }

    let reference_elevation = segment
        .points
        .iter()
        .find_map(|p| p.elevation)
        .unwrap_or(0.0);
    let mut data = Array2::<f64>::zeros((num_points_path, 3));
    for (mut row, point) in data.rows_mut().into_iter().zip(&segment.points) {
        row[0] = point.longitude;
        row[1] = point.latitude;
        row[2] = point.elevation.unwrap_or(reference_elevation);
    }

    let mut filled = data.slice_mut(s![..n, ..]);
    let origin = filled.row(0).to_owned();
    filled -= &origin;

    let center = filled.sum_axis(Axis(0)) / n as f64;
    let phi = center[1].atan2(center[0]);
    let (sin_phi, cos_phi) = phi.sin_cos();
    for mut row in filled.rows_mut() {
        let (x, y) = (row[0], row[1]);
        row[0] = cos_phi * x + sin_phi * y;
        row[1] = -sin_phi * x + cos_phi * y;
    }

    Ok(data)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeatureValue<'a> {
    Scalar(f64),
    Path(ArrayView2<'a, f64>),
}

impl FeatureValue<'_> {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FeatureValue::Scalar(v) => Some(*v),
            FeatureValue::Path(_) => None,
        }
    }
}

/// Statistical summary of one processed segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub length2d: f64,
    pub length3d: f64,
    /// Seconds, or -1 when the segment carries no timestamps.
    pub duration: f64,
    pub moving_time: f64,
    pub stopped_time: f64,
    pub total_uphill: f64,
    pub total_downhill: f64,
    pub path: Array2<f64>,
}

impl SegmentStats {
    pub fn from_segment(
        segment: &TrackSegment,
        num_points_path: usize,
    ) -> Result<Self, PrepError> {
        let moving = segment.moving_data();
        let elevation = segment.uphill_downhill();
        Ok(Self {
            length2d: segment.length_2d(),
            length3d: segment.length_3d(),
            duration: segment.duration().unwrap_or(-1.0),
            moving_time: moving.moving_time,
            stopped_time: moving.stopped_time,
            total_uphill: elevation.uphill,
            total_downhill: elevation.downhill,
            path: path_to_feature(segment, num_points_path)?,
        })
    }

    pub fn header() -> [&'static str; 8] {
        HEADER
    }

    /// Values in [`HEADER`] order.
    pub fn to_list(&self) -> Vec<FeatureValue<'_>> {
        vec![
            FeatureValue::Scalar(self.length2d),
            FeatureValue::Scalar(self.length3d),
            FeatureValue::Scalar(self.duration),
            FeatureValue::Scalar(self.moving_time),
            FeatureValue::Scalar(self.stopped_time),
            FeatureValue::Scalar(self.total_uphill),
            FeatureValue::Scalar(self.total_downhill),
            FeatureValue::Path(self.path.view()),
        ]
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, FeatureValue<'_>> {
        HEADER.into_iter().zip(self.to_list()).collect()
    }
}

/// Build feature records for every segment, keeping only those that spent
/// at least as long moving as stopped.
pub fn extract_stats(
    segments: &[TrackSegment],
    num_points_path: usize,
) -> Result<Vec<SegmentStats>, PrepError> {
    let mut stats = Vec::with_capacity(segments.len());
    for segment in segments {
        let record = SegmentStats::from_segment(segment, num_points_path)?;
        if record.moving_time >= record.stopped_time {
            stats.push(record);
        }
    }
    if stats.len() < segments.len() {
        debug!(
            "Dropped {} of {} segments dominated by stopped time",
            segments.len() - stats.len(),
            segments.len()
        );
    }
    Ok(stats)
}

/// Column-oriented view of a record list, keyed by [`HEADER`] names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    #[serde(rename = "Length2d")]
    pub length2d: Array1<f64>,
    #[serde(rename = "Length3d")]
    pub length3d: Array1<f64>,
    #[serde(rename = "Duration")]
    pub duration: Array1<f64>,
    #[serde(rename = "MovingTime")]
    pub moving_time: Array1<f64>,
    #[serde(rename = "StoppedTime")]
    pub stopped_time: Array1<f64>,
    #[serde(rename = "TotalUphill")]
    pub total_uphill: Array1<f64>,
    #[serde(rename = "TotalDownhill")]
    pub total_downhill: Array1<f64>,
    #[serde(rename = "Path")]
    pub path: Array3<f64>,
}

impl FeatureTable {
    pub fn from_stats(stats: &[SegmentStats], num_points_path: usize) -> Result<Self, PrepError> {
        let column = |f: fn(&SegmentStats) -> f64| stats.iter().map(f).collect::<Array1<f64>>();
        let mut path = Array3::<f64>::zeros((stats.len(), num_points_path, 3));
        for (i, record) in stats.iter().enumerate() {
            if record.path.dim() != (num_points_path, 3) {
                return Err(PrepError::Validation(format!(
                    "record {} has path shape {:?}, expected ({}, 3)",
                    i,
                    record.path.dim(),
                    num_points_path
                )));
            }
            path.index_axis_mut(Axis(0), i).assign(&record.path);
        }
        Ok(Self {
            length2d: column(|r| r.length2d),
            length3d: column(|r| r.length3d),
            duration: column(|r| r.duration),
            moving_time: column(|r| r.moving_time),
            stopped_time: column(|r| r.stopped_time),
            total_uphill: column(|r| r.total_uphill),
            total_downhill: column(|r| r.total_downhill),
            path,
        })
    }

    pub fn len(&self) -> usize {
        self.length2d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_points_path(&self) -> usize {
        self.path.shape()[1]
    }

    /// Scalar column by header name. `Path` is not a scalar column.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let col = match name {
            "Length2d" => &self.length2d,
            "Length3d" => &self.length3d,
            "Duration" => &self.duration,
            "MovingTime" => &self.moving_time,
            "StoppedTime" => &self.stopped_time,
            "TotalUphill" => &self.total_uphill,
            "TotalDownhill" => &self.total_downhill,
            _ => return None,
        };
        Some(col.view())
    }

    pub fn write_json(&self, path: &Path) -> Result<(), PrepError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self, PrepError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
