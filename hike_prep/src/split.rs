//! Reproducible train/test assignment of input files.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::PrepError;

pub const DEFAULT_MAX_INT: u64 = 4096;
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// Map an identifier to a value in `[0, 1]` derived from its SHA-256 digest.
///
/// The digest is read as a big-endian integer, reduced modulo `max_int` and
/// divided by `max_int - 1`. The result depends only on the identifier's
/// bytes, so every run and every platform agrees.
///
/// The range is closed: a remainder of `max_int - 1` yields exactly `1.0`,
/// which no train fraction below or equal to one admits into the train set.
pub fn pseudo_probability(identifier: &str, max_int: u64) -> Result<f64, PrepError> {
    if max_int < 2 {
        return Err(PrepError::InvalidParameter(format!(
            "max_int must be at least 2, got {}",
            max_int
        )));
    }
    Ok(scaled_digest(identifier, max_int))
}

/// [`pseudo_probability`] with the default modulus of 4096.
pub fn pseudo_probability_for_path(path: &str) -> f64 {
    scaled_digest(path, DEFAULT_MAX_INT)
}

// max_int >= 2
fn scaled_digest(identifier: &str, max_int: u64) -> f64 {
    let digest = Sha256::digest(identifier.as_bytes());
    let modulus = max_int as u128;
    let remainder = digest
        .iter()
        .fold(0u128, |acc, &b| (acc * 256 + b as u128) % modulus);
    remainder as f64 / (max_int - 1) as f64
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<String>,
    pub test: Vec<String>,
}

/// Partition files into train (`score < train_fraction`) and test sets.
/// Each file is scored once, so it lands on exactly one side.
pub fn split_train_test(files: &[String], train_fraction: f64) -> DatasetSplit {
    let mut split = DatasetSplit::default();
    for file in files {
        if pseudo_probability_for_path(file) < train_fraction {
            split.train.push(file.clone());
        } else {
            split.test.push(file.clone());
        }
    }
    info!(
        "Split {} files into {} training and {} test files",
        files.len(),
        split.train.len(),
        split.test.len()
    );
    split
}

/// Write one entry per line, each terminated by a newline.
pub fn write_file_list(path: &Path, files: &[String]) -> Result<(), PrepError> {
    let mut text = String::with_capacity(files.iter().map(|f| f.len() + 1).sum());
    for file in files {
        text.push_str(file);
        text.push('\n');
    }
    fs::write(path, text)?;
    Ok(())
}

pub fn read_file_list(path: &Path) -> Result<Vec<String>, PrepError> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pseudo_probability_reproducible() {
        let scores: Vec<f64> = (0..10)
            .map(|_| pseudo_probability_for_path("test_string.txt"))
            .collect();
        assert!(scores.iter().all(|s| *s == scores[0]));
    }

    #[test]
    fn pseudo_probability_different() {
        let a = pseudo_probability_for_path("test_string.txt");
        let b = pseudo_probability_for_path("test_string_.txt");
        assert!((a - b).abs() > 1e-9);
    }

    #[test]
    fn default_modulus_agrees_with_generic_path() {
        for name in ["a.gpx", "tracks/Hiking/2019/alps.gpx", ""] {
            assert_eq!(
                pseudo_probability(name, DEFAULT_MAX_INT).unwrap(),
                pseudo_probability_for_path(name)
            );
        }
    }

    #[test]
    fn pseudo_probability_matches_digest_tail() {
        // 4096 divides 2^256, so the reduction keeps the last 12 bits
        let digest = Sha256::digest(b"test_string.txt");
        let tail = ((digest[30] as u64 & 0x0f) << 8) | digest[31] as u64;
        assert_eq!(
            pseudo_probability_for_path("test_string.txt"),
            tail as f64 / 4095.0
        );
    }

    #[test]
    fn pseudo_probability_stays_in_unit_interval() {
        for i in 0..500 {
            let value = pseudo_probability(&format!("file_{}.gpx", i), 97).unwrap();
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn upper_bound_is_reachable() {
        // sha256("file_1.gpx") is odd
        assert_eq!(pseudo_probability("file_1.gpx", 2).unwrap(), 1.0);
        // sha256("track_11094.gpx") ends in twelve set bits
        assert_eq!(pseudo_probability_for_path("track_11094.gpx"), 1.0);
        let split = split_train_test(&["track_11094.gpx".to_string()], 1.0);
        assert!(split.train.is_empty());
        assert_eq!(split.test, vec!["track_11094.gpx".to_string()]);
    }

    #[test]
    fn small_modulus_is_rejected() {
        assert!(pseudo_probability("x", 1).is_err());
        assert!(pseudo_probability("x", 0).is_err());
    }

    #[test]
    fn split_partitions_exactly() {
        let files: Vec<String> = (0..200).map(|i| format!("hikes/track_{:03}.gpx", i)).collect();
        let split = split_train_test(&files, DEFAULT_TRAIN_FRACTION);
        assert_eq!(split.train.len() + split.test.len(), files.len());

        let train: HashSet<_> = split.train.iter().collect();
        let test: HashSet<_> = split.test.iter().collect();
        assert!(train.is_disjoint(&test));
        assert!(!split.train.is_empty() && !split.test.is_empty());

        let again = split_train_test(&files, DEFAULT_TRAIN_FRACTION);
        assert_eq!(split, again);

        let mut reversed = files.clone();
        reversed.reverse();
        let mut swapped = split_train_test(&reversed, DEFAULT_TRAIN_FRACTION);
        swapped.train.reverse();
        assert_eq!(swapped.train, split.train);
    }

    #[test]
    fn file_list_is_newline_terminated() {
        let dir = std::env::temp_dir().join(format!("hike_prep_split_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("train_file_list.txt");
        let files = vec!["a.gpx".to_string(), "b/c.gpx".to_string()];
        write_file_list(&path, &files).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a.gpx\nb/c.gpx\n");
        assert_eq!(read_file_list(&path).unwrap(), files);
        fs::remove_dir_all(&dir).unwrap();
    }
}
