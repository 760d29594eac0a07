//! Core data models for the squat coach

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of the user submitting videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A 2D point, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Body landmarks tracked by the analysis collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keypoint {
    Nose,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Keypoint {
    /// All keypoints in their canonical order
    pub const ALL: [Keypoint; 9] = [
        Keypoint::Nose,
        Keypoint::LeftShoulder,
        Keypoint::RightShoulder,
        Keypoint::LeftHip,
        Keypoint::RightHip,
        Keypoint::LeftKnee,
        Keypoint::RightKnee,
        Keypoint::LeftAnkle,
        Keypoint::RightAnkle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Keypoint::Nose => "NOSE",
            Keypoint::LeftShoulder => "LEFT_SHOULDER",
            Keypoint::RightShoulder => "RIGHT_SHOULDER",
            Keypoint::LeftHip => "LEFT_HIP",
            Keypoint::RightHip => "RIGHT_HIP",
            Keypoint::LeftKnee => "LEFT_KNEE",
            Keypoint::RightKnee => "RIGHT_KNEE",
            Keypoint::LeftAnkle => "LEFT_ANKLE",
            Keypoint::RightAnkle => "RIGHT_ANKLE",
        }
    }
}

/// Keypoint positions for one frame. Any landmark may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    #[serde(rename = "NOSE", default, skip_serializing_if = "Option::is_none")]
    pub nose: Option<Point>,
    #[serde(rename = "LEFT_SHOULDER", default, skip_serializing_if = "Option::is_none")]
    pub left_shoulder: Option<Point>,
    #[serde(rename = "RIGHT_SHOULDER", default, skip_serializing_if = "Option::is_none")]
    pub right_shoulder: Option<Point>,
    #[serde(rename = "LEFT_HIP", default, skip_serializing_if = "Option::is_none")]
    pub left_hip: Option<Point>,
    #[serde(rename = "RIGHT_HIP", default, skip_serializing_if = "Option::is_none")]
    pub right_hip: Option<Point>,
    #[serde(rename = "LEFT_KNEE", default, skip_serializing_if = "Option::is_none")]
    pub left_knee: Option<Point>,
    #[serde(rename = "RIGHT_KNEE", default, skip_serializing_if = "Option::is_none")]
    pub right_knee: Option<Point>,
    #[serde(rename = "LEFT_ANKLE", default, skip_serializing_if = "Option::is_none")]
    pub left_ankle: Option<Point>,
    #[serde(rename = "RIGHT_ANKLE", default, skip_serializing_if = "Option::is_none")]
    pub right_ankle: Option<Point>,
}

impl Keypoints {
    pub fn get(&self, keypoint: Keypoint) -> Option<Point> {
        match keypoint {
            Keypoint::Nose => self.nose,
            Keypoint::LeftShoulder => self.left_shoulder,
            Keypoint::RightShoulder => self.right_shoulder,
            Keypoint::LeftHip => self.left_hip,
            Keypoint::RightHip => self.right_hip,
            Keypoint::LeftKnee => self.left_knee,
            Keypoint::RightKnee => self.right_knee,
            Keypoint::LeftAnkle => self.left_ankle,
            Keypoint::RightAnkle => self.right_ankle,
        }
    }

    pub fn set(&mut self, keypoint: Keypoint, point: Option<Point>) {
        let slot = match keypoint {
            Keypoint::Nose => &mut self.nose,
            Keypoint::LeftShoulder => &mut self.left_shoulder,
            Keypoint::RightShoulder => &mut self.right_shoulder,
            Keypoint::LeftHip => &mut self.left_hip,
            Keypoint::RightHip => &mut self.right_hip,
            Keypoint::LeftKnee => &mut self.left_knee,
            Keypoint::RightKnee => &mut self.right_knee,
            Keypoint::LeftAnkle => &mut self.left_ankle,
            Keypoint::RightAnkle => &mut self.right_ankle,
        };
        *slot = point;
    }

    /// Number of keypoints present
    pub fn len(&self) -> usize {
        Keypoint::ALL.iter().filter(|k| self.get(**k).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Joint angles derived from keypoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Angle {
    LeftKnee,
    RightKnee,
    LeftHip,
    RightHip,
    LeftTorso,
    RightTorso,
}

impl Angle {
    /// All angles in their canonical order
    pub const ALL: [Angle; 6] = [
        Angle::LeftKnee,
        Angle::RightKnee,
        Angle::LeftHip,
        Angle::RightHip,
        Angle::LeftTorso,
        Angle::RightTorso,
    ];

    /// Angle family used as the headline metric of a job
    pub const KNEES: [Angle; 2] = [Angle::LeftKnee, Angle::RightKnee];

    pub fn name(&self) -> &'static str {
        match self {
            Angle::LeftKnee => "LEFT_KNEE_ANGLE",
            Angle::RightKnee => "RIGHT_KNEE_ANGLE",
            Angle::LeftHip => "LEFT_HIP_ANGLE",
            Angle::RightHip => "RIGHT_HIP_ANGLE",
            Angle::LeftTorso => "LEFT_TORSO_ANGLE",
            Angle::RightTorso => "RIGHT_TORSO_ANGLE",
        }
    }

    /// The (a, vertex, c) keypoints the angle is measured over
    pub fn joints(&self) -> (Keypoint, Keypoint, Keypoint) {
        match self {
            Angle::LeftKnee => (Keypoint::LeftHip, Keypoint::LeftKnee, Keypoint::LeftAnkle),
            Angle::RightKnee => (Keypoint::RightHip, Keypoint::RightKnee, Keypoint::RightAnkle),
            Angle::LeftHip => (Keypoint::LeftShoulder, Keypoint::LeftHip, Keypoint::LeftKnee),
            Angle::RightHip => (Keypoint::RightShoulder, Keypoint::RightHip, Keypoint::RightKnee),
            Angle::LeftTorso => (Keypoint::Nose, Keypoint::LeftShoulder, Keypoint::LeftHip),
            Angle::RightTorso => (Keypoint::Nose, Keypoint::RightShoulder, Keypoint::RightHip),
        }
    }
}

/// Joint angles in degrees for one frame. Any angle may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    #[serde(rename = "LEFT_KNEE_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub left_knee: Option<f64>,
    #[serde(rename = "RIGHT_KNEE_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub right_knee: Option<f64>,
    #[serde(rename = "LEFT_HIP_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub left_hip: Option<f64>,
    #[serde(rename = "RIGHT_HIP_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub right_hip: Option<f64>,
    #[serde(rename = "LEFT_TORSO_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub left_torso: Option<f64>,
    #[serde(rename = "RIGHT_TORSO_ANGLE", default, skip_serializing_if = "Option::is_none")]
    pub right_torso: Option<f64>,
}

impl JointAngles {
    pub fn get(&self, angle: Angle) -> Option<f64> {
        match angle {
            Angle::LeftKnee => self.left_knee,
            Angle::RightKnee => self.right_knee,
            Angle::LeftHip => self.left_hip,
            Angle::RightHip => self.right_hip,
            Angle::LeftTorso => self.left_torso,
            Angle::RightTorso => self.right_torso,
        }
    }

    pub fn set(&mut self, angle: Angle, value: Option<f64>) {
        let slot = match angle {
            Angle::LeftKnee => &mut self.left_knee,
            Angle::RightKnee => &mut self.right_knee,
            Angle::LeftHip => &mut self.left_hip,
            Angle::RightHip => &mut self.right_hip,
            Angle::LeftTorso => &mut self.left_torso,
            Angle::RightTorso => &mut self.right_torso,
        };
        *slot = value;
    }
}

/// Reference to an extracted frame image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Position of the frame in extraction order
    pub index: u32,
    pub path: PathBuf,
}

/// Analysis output for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame: FrameRef,
    /// Image (width, height) in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
    #[serde(default)]
    pub keypoints_pixels: Keypoints,
    #[serde(default)]
    pub keypoints_normalized: Keypoints,
    #[serde(default)]
    pub angles: JointAngles,
}

/// Minimum angle found across a job's frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremalAngle {
    pub value: f64,
    pub angle: String,
    pub frame: FrameRef,
}

/// Aggregate result of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub video_id: String,
    pub video_path: PathBuf,
    /// Frames produced by extraction
    pub frames_count: usize,
    /// Frames the analysis collaborator produced a result for
    pub processed_count: usize,
    pub min_angle: Option<ExtremalAngle>,
    pub annotated_frame: Option<PathBuf>,
    pub results: Vec<FrameResult>,
}

/// A video received from a user, before admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSubmission {
    pub user: UserId,
    pub video_path: PathBuf,
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Free-text caption, used as the dataset label
    #[serde(default)]
    pub caption: Option<String>,
}

/// Stable identifier for a stored video, derived from its filename
pub fn video_id_for(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoints_deserialize_partial_and_ignore_unknown() {
        let json = r#"{"NOSE": [0.5, 0.1], "LEFT_KNEE": [0.4, 0.7], "LEFT_EYE": [0.1, 0.1]}"#;
        let kp: Keypoints = serde_json::from_str(json).unwrap();

        assert_eq!(kp.get(Keypoint::Nose), Some(Point::new(0.5, 0.1)));
        assert_eq!(kp.get(Keypoint::LeftKnee), Some(Point::new(0.4, 0.7)));
        assert_eq!(kp.get(Keypoint::RightKnee), None);
        assert_eq!(kp.len(), 2);
    }

    #[test]
    fn test_keypoints_serialize_skips_missing() {
        let mut kp = Keypoints::default();
        kp.set(Keypoint::LeftHip, Some(Point::new(1.0, 2.0)));

        let json = serde_json::to_value(&kp).unwrap();
        assert_eq!(json, serde_json::json!({"LEFT_HIP": [1.0, 2.0]}));
    }

    #[test]
    fn test_angle_names_are_unique() {
        let mut names: Vec<_> = Angle::ALL.iter().map(|a| a.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Angle::ALL.len());
    }

    #[test]
    fn test_video_id_from_path() {
        let path = std::path::Path::new("uploads/videos/video_42_1700000000.mp4");
        assert_eq!(video_id_for(path), "video_42_1700000000");
    }
}
