//! Track model and the distance, length, timing and elevation queries the
//! pipeline reads from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Earth radius used for long-range (haversine) distances.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Length of one degree of latitude in meters.
pub const ONE_DEGREE_M: f64 = 1000.0 * 10000.8 / 90.0;

/// Speeds at or below this value count as stopped time.
pub const STOPPED_SPEED_THRESHOLD_KMH: f64 = 1.0;

/// Above this separation in degrees the equirectangular approximation is
/// replaced by the haversine formula.
const SHORT_DISTANCE_LIMIT_DEG: f64 = 0.2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl TrackPoint {
    pub fn new(longitude: f64, latitude: f64, elevation: Option<f64>) -> Self {
        Self {
            longitude,
            latitude,
            elevation,
            time: None,
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Planar distance in meters, ignoring elevation.
///
/// Nearby points use an equirectangular approximation scaled by the cosine of
/// the first point's latitude; points further apart than a fifth of a degree
/// fall back to the haversine formula.
pub fn distance_2d(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let dlat = a.latitude - b.latitude;
    let dlon = a.longitude - b.longitude;
    if dlat.abs() > SHORT_DISTANCE_LIMIT_DEG || dlon.abs() > SHORT_DISTANCE_LIMIT_DEG {
        return haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude);
    }
    let coef = a.latitude.to_radians().cos();
    let x = dlat;
    let y = dlon * coef;
    (x * x + y * y).sqrt() * ONE_DEGREE_M
}

/// Distance in meters including the elevation difference when both points
/// carry elevation.
pub fn distance_3d(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let planar = distance_2d(a, b);
    match (a.elevation, b.elevation) {
        (Some(ea), Some(eb)) if ea != eb => (planar * planar + (ea - eb).powi(2)).sqrt(),
        _ => planar,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovingData {
    pub moving_time: f64,
    pub stopped_time: f64,
    pub moving_distance: f64,
    pub stopped_distance: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UphillDownhill {
    pub uphill: f64,
    pub downhill: f64,
}

/// Ordered run of track points. Order defines both path and time direction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSegment {
    pub points: Vec<TrackPoint>,
}

impl TrackSegment {
    pub fn new(points: Vec<TrackPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn length_2d(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| distance_2d(&w[0], &w[1]))
            .sum()
    }

    pub fn length_3d(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| distance_3d(&w[0], &w[1]))
            .sum()
    }

    /// Seconds between the first and last timestamped points.
    ///
    /// `None` when no point carries a timestamp, including the empty segment.
    /// A single timestamped point has zero duration.
    pub fn duration(&self) -> Option<f64> {
        let start = self.points.iter().find_map(|p| p.time)?;
        let end = self.points.iter().rev().find_map(|p| p.time)?;
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    /// Split elapsed time into moving and stopped parts by the speed between
    /// consecutive timestamped points.
    pub fn moving_data(&self) -> MovingData {
        let mut data = MovingData::default();
        for w in self.points.windows(2) {
            let (previous, point) = (&w[0], &w[1]);
            let (Some(t0), Some(t1)) = (previous.time, point.time) else {
                continue;
            };
            let seconds = (t1 - t0).num_milliseconds() as f64 / 1000.0;
            let distance = if point.elevation.is_some() && previous.elevation.is_some() {
                distance_3d(previous, point)
            } else {
                distance_2d(previous, point)
            };
            let speed_kmh = if seconds > 0.0 {
                (distance / 1000.0) / (seconds / 3600.0)
            } else {
                0.0
            };
            if speed_kmh <= STOPPED_SPEED_THRESHOLD_KMH {
                data.stopped_time += seconds;
                data.stopped_distance += distance;
            } else {
                data.moving_time += seconds;
                data.moving_distance += distance;
            }
        }
        data
    }

    /// Total climb and descent over lightly smoothed elevations.
    pub fn uphill_downhill(&self) -> UphillDownhill {
        let elevations: Vec<Option<f64>> = self.points.iter().map(|p| p.elevation).collect();
        let smoothed = smooth_elevations(&elevations);
        let mut out = UphillDownhill::default();
        for w in smoothed.windows(2) {
            if let (Some(prev), Some(cur)) = (w[0], w[1]) {
                let delta = cur - prev;
                if delta > 0.0 {
                    out.uphill += delta;
                } else {
                    out.downhill -= delta;
                }
            }
        }
        out
    }
}

// 0.3/0.4/0.3 kernel where both neighbours are known; edges and gaps pass through.
fn smooth_elevations(elevations: &[Option<f64>]) -> Vec<Option<f64>> {
    let n = elevations.len();
    (0..n)
        .map(|i| {
            let current = elevations[i]?;
            if i > 0 && i + 1 < n {
                if let (Some(prev), Some(next)) = (elevations[i - 1], elevations[i + 1]) {
                    return Some(prev * 0.3 + current * 0.4 + next * 0.3);
                }
            }
            Some(current)
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: Option<String>,
    pub segments: Vec<TrackSegment>,
}

impl Track {
    pub fn length_2d(&self) -> f64 {
        self.segments.iter().map(TrackSegment::length_2d).sum()
    }

    pub fn uphill_downhill(&self) -> UphillDownhill {
        self.segments
            .iter()
            .map(TrackSegment::uphill_downhill)
            .fold(UphillDownhill::default(), |acc, ud| UphillDownhill {
                uphill: acc.uphill + ud.uphill,
                downhill: acc.downhill + ud.downhill,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_319.0).abs() < 200.0);
    }

    #[test]
    fn short_distance_uses_degree_length() {
        let a = TrackPoint::new(8.0, 47.0, None);
        let b = TrackPoint::new(8.0, 47.0 + 0.001, None);
        assert_relative_eq!(distance_2d(&a, &b), 0.001 * ONE_DEGREE_M, epsilon = 1e-9);
    }

    #[test]
    fn long_distance_switches_to_haversine() {
        let a = TrackPoint::new(0.0, 0.0, None);
        let b = TrackPoint::new(1.0, 0.0, None);
        assert_relative_eq!(
            distance_2d(&a, &b),
            haversine_distance(0.0, 0.0, 0.0, 1.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn distance_3d_adds_elevation() {
        let a = TrackPoint::new(8.0, 47.0, Some(100.0));
        let b = TrackPoint::new(8.0, 47.0 + 30.0 / ONE_DEGREE_M, Some(140.0));
        assert_relative_eq!(distance_3d(&a, &b), 50.0, epsilon = 1e-6);
        let c = TrackPoint::new(8.0, 47.0 + 30.0 / ONE_DEGREE_M, None);
        assert_relative_eq!(distance_3d(&a, &c), 30.0, epsilon = 1e-6);
    }

    #[test]
    fn duration_requires_timestamps() {
        let mut segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, None),
            TrackPoint::new(8.0, 47.001, None),
        ]);
        assert_eq!(segment.duration(), None);

        segment.points[0].time = Some(at(0));
        segment.points[1].time = Some(at(90));
        assert_eq!(segment.duration(), Some(90.0));

        let mut single = TrackSegment::new(vec![TrackPoint::new(8.0, 47.0, None)]);
        assert_eq!(single.duration(), None);
        single.points[0].time = Some(at(0));
        assert_eq!(single.duration(), Some(0.0));

        assert_eq!(TrackSegment::default().duration(), None);
    }

    #[test]
    fn moving_data_separates_slow_pairs() {
        let step = 50.0 / ONE_DEGREE_M;
        let segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, None).with_time(at(0)),
            // 50 m in 60 s: 3 km/h
            TrackPoint::new(8.0, 47.0 + step, None).with_time(at(60)),
            // no movement for 120 s
            TrackPoint::new(8.0, 47.0 + step, None).with_time(at(180)),
        ]);
        let data = segment.moving_data();
        assert_relative_eq!(data.moving_time, 60.0);
        assert_relative_eq!(data.stopped_time, 120.0);
        assert_relative_eq!(data.moving_distance, 50.0, epsilon = 1e-6);
        assert_relative_eq!(data.stopped_distance, 0.0);
    }

    #[test]
    fn moving_data_without_timestamps_is_zero() {
        let segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, None),
            TrackPoint::new(8.0, 47.01, None),
        ]);
        assert_eq!(segment.moving_data(), MovingData::default());
    }

    #[test]
    fn uphill_downhill_smooths_interior() {
        let segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, Some(0.0)),
            TrackPoint::new(8.0, 47.0001, Some(10.0)),
            TrackPoint::new(8.0, 47.0002, Some(0.0)),
        ]);
        // interior smoothed to 4.0, edges unchanged
        let ud = segment.uphill_downhill();
        assert_relative_eq!(ud.uphill, 4.0, epsilon = 1e-12);
        assert_relative_eq!(ud.downhill, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn uphill_downhill_skips_missing_elevation() {
        let segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, Some(100.0)),
            TrackPoint::new(8.0, 47.0001, None),
            TrackPoint::new(8.0, 47.0002, Some(300.0)),
        ]);
        assert_eq!(segment.uphill_downhill(), UphillDownhill::default());
    }

    #[test]
    fn track_aggregates_segments() {
        let step = 10.0 / ONE_DEGREE_M;
        let segment = TrackSegment::new(vec![
            TrackPoint::new(8.0, 47.0, Some(0.0)),
            TrackPoint::new(8.0, 47.0 + step, Some(5.0)),
        ]);
        let track = Track {
            name: Some("loop".into()),
            segments: vec![segment.clone(), segment],
        };
        assert_relative_eq!(track.length_2d(), 20.0, epsilon = 1e-6);
        assert_relative_eq!(track.uphill_downhill().uphill, 10.0);
    }
}
