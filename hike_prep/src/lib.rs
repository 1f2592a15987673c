//! Feature preparation for hiking-time estimation from GPS tracks.
//!
//! Raw track segments are decimated, split into short pieces, optionally
//! smoothed and sanity-filtered, then summarised into fixed-shape records
//! whose `Path` feature is a translation- and rotation-normalized array.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod features;
pub mod geometry;
pub mod segments;
pub mod split;

pub use features::{
    extract_stats, path_to_feature, FeatureTable, FeatureValue, SegmentStats, HEADER,
};
pub use geometry::{MovingData, Track, TrackPoint, TrackSegment, UphillDownhill};
pub use segments::{
    decimate_segment, filter_bad_segments, filter_segments, smooth_coordinates,
    split_segments_by_length,
};
pub use split::{pseudo_probability, pseudo_probability_for_path, split_train_test, DatasetSplit};

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("invalid path: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Where coordinate smoothing runs in the pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingStage {
    Disabled,
    BeforeFilter,
    AfterSplit,
}

impl Default for SmoothingStage {
    fn default() -> Self {
        SmoothingStage::BeforeFilter
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrepConfig {
    pub num_points_path: usize,
    pub min_distance_m: f64,
    pub max_length_m: f64,
    pub max_elevation_diff_m: f64,
    pub filter_bad_segments: bool,
    pub smoothing: SmoothingStage,
    pub smoothing_window: usize,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            num_points_path: 25,
            min_distance_m: 4.0,
            max_length_m: 100.0,
            max_elevation_diff_m: 100.0,
            filter_bad_segments: true,
            smoothing: SmoothingStage::BeforeFilter,
            smoothing_window: 3,
        }
    }
}

impl PrepConfig {
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.num_points_path == 0 {
            return Err(PrepError::Configuration(
                "num_points_path must be positive".into(),
            ));
        }
        if !(self.min_distance_m >= 0.0) {
            return Err(PrepError::Configuration(format!(
                "min_distance_m must be non-negative, got {}",
                self.min_distance_m
            )));
        }
        if !(self.max_length_m > 0.0) {
            return Err(PrepError::Configuration(format!(
                "max_length_m must be positive, got {}",
                self.max_length_m
            )));
        }
        if !(self.max_elevation_diff_m > 0.0) {
            return Err(PrepError::Configuration(format!(
                "max_elevation_diff_m must be positive, got {}",
                self.max_elevation_diff_m
            )));
        }
        if self.smoothing_window % 2 == 0 {
            return Err(PrepError::Configuration(format!(
                "smoothing_window should be an odd number, {} given",
                self.smoothing_window
            )));
        }
        Ok(())
    }

    /// Upper bound on points per split segment implied by the decimation
    /// spacing and the length bound. `None` when decimation is off.
    pub fn max_points_per_segment(&self) -> Option<usize> {
        if self.min_distance_m > 0.0 {
            Some((self.max_length_m / self.min_distance_m).ceil() as usize)
        } else {
            None
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, PrepError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Parse GPX bytes into tracks of segments.
pub fn parse_gpx(input: &[u8]) -> Result<Vec<Track>, PrepError> {
    let mut cursor = Cursor::new(input);
    let gpx = gpx::read(&mut cursor).map_err(|e| PrepError::GpxParse(e.to_string()))?;
    let mut tracks = Vec::with_capacity(gpx.tracks.len());

    for track in gpx.tracks {
        let mut segments = Vec::with_capacity(track.segments.len());
        for segment in track.segments {
            let mut points = Vec::with_capacity(segment.points.len());
            for waypoint in segment.points {
                let point_geo = waypoint.point();
                let mut point = TrackPoint::new(point_geo.x(), point_geo.y(), waypoint.elevation);
                if let Some(time) = waypoint.time {
                    let iso = time
                        .format()
                        .map_err(|e| PrepError::GpxParse(e.to_string()))?;
                    let utc = DateTime::parse_from_rfc3339(&iso)
                        .map_err(|e| PrepError::GpxParse(e.to_string()))?
                        .with_timezone(&Utc);
                    point.time = Some(utc);
                }
                points.push(point);
            }
            segments.push(TrackSegment::new(points));
        }
        tracks.push(Track {
            name: track.name,
            segments,
        });
    }
    Ok(tracks)
}

pub fn parse_gpx_file(path: &Path) -> Result<Vec<Track>, PrepError> {
    let data = fs::read(path)?;
    parse_gpx(&data)
}

pub fn segments_from_tracks(tracks: Vec<Track>) -> Vec<TrackSegment> {
    let segments: Vec<TrackSegment> = tracks.into_iter().flat_map(|t| t.segments).collect();
    info!("Finished reading {} segments", segments.len());
    segments
}

/// Run smoothing, decimation, splitting and the elevation sanity filter in
/// the order `config` asks for.
pub fn prepare_segments(
    segments: Vec<TrackSegment>,
    config: &PrepConfig,
) -> Result<Vec<TrackSegment>, PrepError> {
    config.validate()?;

    let before = segments.len();
    let mut segments: Vec<TrackSegment> = segments.into_iter().filter(|s| !s.is_empty()).collect();
    if segments.len() < before {
        debug!("Skipped {} empty segments", before - segments.len());
    }

    if config.smoothing == SmoothingStage::BeforeFilter {
        smooth_coordinates(&mut segments, config.smoothing_window)?;
    }
    let filtered = filter_segments(segments, config.min_distance_m);
    let mut split = split_segments_by_length(filtered, config.max_length_m);
    if config.smoothing == SmoothingStage::AfterSplit {
        smooth_coordinates(&mut split, config.smoothing_window)?;
    }
    if config.filter_bad_segments {
        split = filter_bad_segments(split, config.max_elevation_diff_m);
    }
    debug!("Prepared {} segments from {} inputs", split.len(), before);
    Ok(split)
}

/// Full pipeline from raw segments to feature records.
pub fn extract_segment_features(
    segments: Vec<TrackSegment>,
    config: &PrepConfig,
) -> Result<Vec<SegmentStats>, PrepError> {
    if let Some(bound) = config.max_points_per_segment() {
        if bound > config.num_points_path {
            warn!(
                "Segments may hold up to {} points but paths are limited to {}",
                bound, config.num_points_path
            );
        }
    }
    let prepared = prepare_segments(segments, config)?;
    extract_stats(&prepared, config.num_points_path)
}

/// Classical walking-time estimate in seconds: 4 km/h on the flat,
/// 300 m/h up, 500 m/h down; the larger of the horizontal and vertical
/// times plus half the smaller.
pub fn standard_walking_time_s(
    length_m: f64,
    elevation_gain_m: f64,
    elevation_loss_m: f64,
) -> f64 {
    let horizontal_s = 0.9 * length_m;
    let vertical_s = elevation_gain_m * 12.0 + elevation_loss_m * 7.2;
    horizontal_s.max(vertical_s) + 0.5 * horizontal_s.min(vertical_s)
}
