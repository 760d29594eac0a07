//! Per-frame feature vectors
//!
//! A vector is the (x, y) pairs of [`FEATURE_KEYPOINTS`] followed by the
//! values of [`FEATURE_ANGLES`], in that declared order. Missing values
//! contribute zero.

use crate::models::{Angle, JointAngles, Keypoint, Keypoints};

pub const FEATURE_KEYPOINTS: [Keypoint; 9] = Keypoint::ALL;
pub const FEATURE_ANGLES: [Angle; 6] = Angle::ALL;

/// Length of every feature vector
pub const FEATURE_DIM: usize = 2 * FEATURE_KEYPOINTS.len() + FEATURE_ANGLES.len();

/// Columns holding keypoint coordinates; the rest are angles
pub const KEYPOINT_COLUMNS: usize = 2 * FEATURE_KEYPOINTS.len();

/// Column names, with `suffix` appended to the keypoint axes
fn names_with(suffix: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(FEATURE_DIM);
    for kp in FEATURE_KEYPOINTS {
        names.push(format!("{}.x{suffix}", kp.name()));
        names.push(format!("{}.y{suffix}", kp.name()));
    }
    names.extend(FEATURE_ANGLES.iter().map(|a| a.name().to_string()));
    names
}

pub fn feature_names() -> Vec<String> {
    names_with("")
}

/// Names used once keypoints have been pelvis-centered
pub fn centered_feature_names() -> Vec<String> {
    names_with("_centered")
}

pub fn feature_vector(keypoints: &Keypoints, angles: &JointAngles) -> Vec<f32> {
    let mut vector = Vec::with_capacity(FEATURE_DIM);
    for kp in FEATURE_KEYPOINTS {
        let (x, y) = keypoints
            .get(kp)
            .map(|p| (p.x as f32, p.y as f32))
            .unwrap_or((0.0, 0.0));
        vector.push(x);
        vector.push(y);
    }
    for angle in FEATURE_ANGLES {
        vector.push(angles.get(angle).unwrap_or(0.0) as f32);
    }
    vector
}
