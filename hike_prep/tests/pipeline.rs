use hike_prep::geometry::ONE_DEGREE_M;
use hike_prep::{
    extract_segment_features, parse_gpx, segments_from_tracks, FeatureTable, PrepConfig,
    SmoothingStage, HEADER,
};

/// A 1.2 km climb sampled every 8 m, one point every 6 s, followed by an
/// empty segment.
fn climb_gpx() -> String {
    let mut body = String::new();
    let step = 8.0 / ONE_DEGREE_M;
    for i in 0..150 {
        let lat = 46.5 + step * i as f64;
        let ele = 1200.0 + 0.5 * i as f64;
        let seconds = 6 * i;
        body.push_str(&format!(
            "<trkpt lat=\"{:.9}\" lon=\"7.9\"><ele>{:.1}</ele><time>2021-07-04T{:02}:{:02}:{:02}Z</time></trkpt>\n",
            lat,
            ele,
            9 + seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
<trk><name>Climb</name><trkseg>
{}</trkseg><trkseg></trkseg></trk>
</gpx>"#,
        body
    )
}

#[test]
fn gpx_to_feature_table() {
    let tracks = parse_gpx(climb_gpx().as_bytes()).unwrap();
    let segments = segments_from_tracks(tracks);
    assert_eq!(segments.len(), 2);

    let config = PrepConfig::default();
    let records = extract_segment_features(segments, &config).unwrap();
    assert!(records.len() >= 12, "got {} records", records.len());

    for record in &records {
        assert!(record.length2d < config.max_length_m);
        assert!(record.duration > 0.0);
        assert!(record.moving_time >= record.stopped_time);
        assert_eq!(record.path.dim(), (config.num_points_path, 3));
        assert!(record.path.row(0).iter().all(|v| *v == 0.0));
        assert!(record.path.iter().all(|v| v.is_finite()));
    }

    let table = FeatureTable::from_stats(&records, config.num_points_path).unwrap();
    assert_eq!(table.len(), records.len());
    for name in HEADER.iter().filter(|n| **n != "Path") {
        assert_eq!(table.column(name).unwrap().len(), records.len());
    }

    let dir = std::env::temp_dir().join(format!("hike_prep_pipeline_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("hiking_data_training.json");
    table.write_json(&path).unwrap();
    let restored = FeatureTable::read_json(&path).unwrap();
    assert_eq!(restored.path.dim(), (records.len(), config.num_points_path, 3));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn after_split_smoothing_keeps_paths_within_bounds() {
    let tracks = parse_gpx(climb_gpx().as_bytes()).unwrap();
    let config = PrepConfig {
        smoothing: SmoothingStage::AfterSplit,
        max_elevation_diff_m: 500.0,
        ..PrepConfig::default()
    };
    let records = extract_segment_features(segments_from_tracks(tracks), &config).unwrap();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.length2d < config.max_length_m));
}

#[test]
fn elevation_outliers_are_filtered() {
    let gpx = climb_gpx().replacen("<ele>1220.0</ele>", "<ele>4000.0</ele>", 1);
    let tracks = parse_gpx(gpx.as_bytes()).unwrap();

    let mut config = PrepConfig::default();
    let filtered = extract_segment_features(segments_from_tracks(tracks.clone()), &config).unwrap();

    config.filter_bad_segments = false;
    let unfiltered = extract_segment_features(segments_from_tracks(tracks), &config).unwrap();
    assert!(filtered.len() < unfiltered.len());
}
