//! Offline normalization of recorded sequences
//!
//! Rebuilds each sequence from the raw frame samples with pelvis-centered,
//! hip-width scaled keypoints, then smooths the keypoint columns with an
//! exponential moving average. Angle columns are left untouched.

use super::features::{centered_feature_names, feature_vector, KEYPOINT_COLUMNS};
use super::labels::Label;
use super::record::DatasetRecord;
use crate::models::{Keypoint, Keypoints, Point};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const DEFAULT_EMA_ALPHA: f32 = 0.15;

/// Hip distances below this are treated as this value
const MIN_HIP_DISTANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    /// Smoothing factor; `None` disables smoothing
    pub ema_alpha: Option<f32>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            ema_alpha: Some(DEFAULT_EMA_ALPHA),
        }
    }
}

/// Translate keypoints so the hip midpoint is the origin, scaled by hip width.
///
/// With a hip missing the origin is kept and the scale is 1.
pub fn center_and_scale(keypoints: &Keypoints) -> Keypoints {
    let (origin, scale) = match (keypoints.get(Keypoint::LeftHip), keypoints.get(Keypoint::RightHip)) {
        (Some(l), Some(r)) => {
            let pelvis = Point::new((l.x + r.x) / 2.0, (l.y + r.y) / 2.0);
            let width = (l.x - r.x).hypot(l.y - r.y).max(MIN_HIP_DISTANCE);
            (pelvis, width)
        }
        _ => (Point::new(0.0, 0.0), 1.0),
    };

    let mut out = Keypoints::default();
    for kp in Keypoint::ALL {
        out.set(
            kp,
            keypoints
                .get(kp)
                .map(|p| Point::new((p.x - origin.x) / scale, (p.y - origin.y) / scale)),
        );
    }
    out
}

/// Exponential moving average down each of the first `columns` columns
pub fn ema_smooth(sequence: &mut [Vec<f32>], columns: usize, alpha: f32) {
    let Some((first, rest)) = sequence.split_first_mut() else {
        return;
    };
    let mut prev: Vec<f32> = first.iter().take(columns).copied().collect();
    for row in rest {
        for (j, value) in row.iter_mut().take(columns).enumerate() {
            prev[j] = alpha * *value + (1.0 - alpha) * prev[j];
            *value = prev[j];
        }
    }
}

pub fn preprocess_record(record: &DatasetRecord, options: PreprocessOptions) -> DatasetRecord {
    let mut frames = record.frames.clone();
    frames.sort_by_key(|f| f.index);

    let mut sequence: Vec<Vec<f32>> = frames
        .iter()
        .map(|f| feature_vector(&center_and_scale(&f.keypoints_normalized), &f.angles))
        .collect();
    if let Some(alpha) = options.ema_alpha {
        ema_smooth(&mut sequence, KEYPOINT_COLUMNS, alpha);
    }

    DatasetRecord {
        seq_len: sequence.len(),
        feature_names: centered_feature_names(),
        sequence,
        frames,
        ..record.clone()
    }
}

pub fn load_records(path: &Path) -> Result<Vec<DatasetRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("Malformed record at {}:{}", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn save_records(path: &Path, records: &[DatasetRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Summary figures over a set of records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub records: usize,
    pub mean_seq_len: f64,
    pub positives: BTreeMap<String, usize>,
}

pub fn stats(records: &[DatasetRecord]) -> DatasetStats {
    let positives = Label::ALL
        .iter()
        .map(|label| {
            let count = records.iter().filter(|r| r.labels.contains(*label)).count();
            (label.name().to_string(), count)
        })
        .collect();

    let mean_seq_len = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.seq_len).sum::<usize>() as f64 / records.len() as f64
    };

    DatasetStats {
        records: records.len(),
        mean_seq_len,
        positives,
    }
}
