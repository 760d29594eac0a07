//! Persisted dataset record layout

use super::features::{feature_names, feature_vector, FEATURE_DIM};
use super::labels::LabelSet;
use crate::models::{JobSummary, JointAngles, Keypoint, Keypoints, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SCHEMA_VERSION: u32 = 1;

/// Raw per-frame values kept next to the vectorized sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub index: u32,
    #[serde(default)]
    pub keypoints_normalized: Keypoints,
    #[serde(default)]
    pub angles: JointAngles,
}

/// One labelled video, time-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub video_id: String,
    pub seq_len: usize,
    pub feature_dim: usize,
    pub feature_names: Vec<String>,
    pub sequence: Vec<Vec<f32>>,
    pub labels: LabelSet,
    pub label: Option<String>,
    #[serde(default)]
    pub frames: Vec<FrameSample>,
}

impl DatasetRecord {
    /// Vectorize a job summary. Frames are ordered by extraction index.
    pub fn from_summary(summary: &JobSummary, labels: LabelSet, raw_label: Option<&str>) -> Self {
        let mut frames: Vec<FrameSample> = summary
            .results
            .iter()
            .map(|r| FrameSample {
                index: r.frame.index,
                keypoints_normalized: clamp_unit(&r.keypoints_normalized),
                angles: r.angles.clone(),
            })
            .collect();
        frames.sort_by_key(|f| f.index);

        let sequence: Vec<Vec<f32>> = frames
            .iter()
            .map(|f| feature_vector(&f.keypoints_normalized, &f.angles))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            video_id: summary.video_id.clone(),
            seq_len: sequence.len(),
            feature_dim: FEATURE_DIM,
            feature_names: feature_names(),
            sequence,
            labels,
            label: raw_label.map(str::to_string),
            frames,
        }
    }
}

/// Normalized coordinates are kept inside [0, 1]
fn clamp_unit(keypoints: &Keypoints) -> Keypoints {
    let mut clamped = Keypoints::default();
    for kp in Keypoint::ALL {
        clamped.set(
            kp,
            keypoints
                .get(kp)
                .map(|p| Point::new(p.x.clamp(0.0, 1.0), p.y.clamp(0.0, 1.0))),
        );
    }
    clamped
}

/// Per-video line written to `videos.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoLine {
    pub created_at: DateTime<Utc>,
    pub video_id: String,
    pub video_path: PathBuf,
    pub frames_count: usize,
    pub processed_count: usize,
    pub min_angle: Option<f64>,
    pub min_angle_name: Option<String>,
    pub min_angle_frame: Option<PathBuf>,
    pub annotated_frame: Option<PathBuf>,
    pub labels: LabelSet,
}

impl VideoLine {
    pub fn from_summary(summary: &JobSummary, labels: LabelSet) -> Self {
        let extremal = summary.min_angle.as_ref();
        Self {
            created_at: Utc::now(),
            video_id: summary.video_id.clone(),
            video_path: summary.video_path.clone(),
            frames_count: summary.frames_count,
            processed_count: summary.processed_count,
            min_angle: extremal.map(|m| m.value),
            min_angle_name: extremal.map(|m| m.angle.clone()),
            min_angle_frame: extremal.map(|m| m.frame.path.clone()),
            annotated_frame: summary.annotated_frame.clone(),
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameRef, FrameResult};
    use uuid::Uuid;

    fn result(index: u32, nose_x: f64, knee: f64) -> FrameResult {
        let mut kp = Keypoints::default();
        kp.set(Keypoint::Nose, Some(Point::new(nose_x, 0.1)));
        FrameResult {
            frame: FrameRef {
                index,
                path: PathBuf::from(format!("frame_{index:04}.jpg")),
            },
            size: Some((640, 480)),
            keypoints_pixels: Keypoints::default(),
            keypoints_normalized: kp,
            angles: JointAngles {
                left_knee: Some(knee),
                ..Default::default()
            },
        }
    }

    fn summary(results: Vec<FrameResult>) -> JobSummary {
        JobSummary {
            job_id: Uuid::new_v4(),
            video_id: "video_7_1".to_string(),
            video_path: PathBuf::from("video_7_1.mp4"),
            frames_count: results.len(),
            processed_count: results.len(),
            min_angle: None,
            annotated_frame: None,
            results,
        }
    }

    #[test]
    fn test_sequence_ordered_by_extraction_index() {
        let s = summary(vec![result(2, 0.3, 80.0), result(0, 0.1, 120.0), result(1, 0.2, 100.0)]);
        let record = DatasetRecord::from_summary(&s, LabelSet::default(), Some("ok"));

        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.seq_len, 3);
        assert_eq!(record.feature_dim, 24);
        let knees: Vec<f32> = record.sequence.iter().map(|v| v[18]).collect();
        assert_eq!(knees, vec![120.0, 100.0, 80.0]);
        assert_eq!(record.frames.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(record.label.as_deref(), Some("ok"));
    }

    #[test]
    fn test_normalized_keypoints_clamped() {
        let s = summary(vec![result(0, 1.4, 90.0)]);
        let record = DatasetRecord::from_summary(&s, LabelSet::default(), None);
        assert_eq!(record.sequence[0][0], 1.0);
    }

    #[test]
    fn test_record_without_frames_still_parses() {
        let json = serde_json::json!({
            "schema_version": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "video_id": "v",
            "seq_len": 0,
            "feature_dim": 24,
            "feature_names": [],
            "sequence": [],
            "labels": {"knees_in": true, "shallow_depth": false, "heels_off": false, "forward_lean": false},
            "label": null
        });
        let record: DatasetRecord = serde_json::from_value(json).unwrap();
        assert!(record.frames.is_empty());
        assert!(record.labels.knees_in);
    }
}
