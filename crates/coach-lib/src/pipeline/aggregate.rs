//! In-process aggregation of frame results

use crate::models::{video_id_for, Angle, ExtremalAngle, FrameResult, JobSummary};
use std::path::Path;
use uuid::Uuid;

/// Minimum value of `family` across `results`.
///
/// Only present, finite values are compared; frames lacking every angle in
/// the family are skipped. Ties keep the earliest frame.
pub fn extremal_angle(results: &[FrameResult], family: &[Angle]) -> Option<ExtremalAngle> {
    let mut best: Option<(f64, Angle, &FrameResult)> = None;
    for result in results {
        for angle in family {
            let Some(value) = result.angles.get(*angle).filter(|v| v.is_finite()) else {
                continue;
            };
            if best.map_or(true, |(current, _, _)| value < current) {
                best = Some((value, *angle, result));
            }
        }
    }

    best.map(|(value, angle, result)| ExtremalAngle {
        value,
        angle: angle.name().to_string(),
        frame: result.frame.clone(),
    })
}

/// Build the immutable summary of a job's analysis
pub fn summarize(
    job_id: Uuid,
    video_path: &Path,
    frames_count: usize,
    mut results: Vec<FrameResult>,
    family: &[Angle],
) -> JobSummary {
    results.sort_by_key(|r| r.frame.index);
    JobSummary {
        job_id,
        video_id: video_id_for(video_path),
        video_path: video_path.to_path_buf(),
        frames_count,
        processed_count: results.len(),
        min_angle: extremal_angle(&results, family),
        annotated_frame: None,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameRef, JointAngles, Keypoints};
    use std::path::PathBuf;

    fn frame(index: u32, left: Option<f64>, right: Option<f64>) -> FrameResult {
        FrameResult {
            frame: FrameRef {
                index,
                path: PathBuf::from(format!("frame_{:04}.jpg", index + 1)),
            },
            size: None,
            keypoints_pixels: Keypoints::default(),
            keypoints_normalized: Keypoints::default(),
            angles: JointAngles {
                left_knee: left,
                right_knee: right,
                left_hip: Some(10.0),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_minimum_across_family() {
        let results = vec![
            frame(0, Some(170.0), Some(168.0)),
            frame(1, Some(95.0), Some(88.5)),
            frame(2, None, Some(120.0)),
        ];
        let m = extremal_angle(&results, &Angle::KNEES).unwrap();
        assert_eq!(m.value, 88.5);
        assert_eq!(m.angle, "RIGHT_KNEE_ANGLE");
        assert_eq!(m.frame.index, 1);
    }

    #[test]
    fn test_angles_outside_family_ignored() {
        // left_hip is 10 on every frame but not part of the knee family
        let results = vec![frame(0, Some(140.0), None)];
        assert_eq!(extremal_angle(&results, &Angle::KNEES).unwrap().value, 140.0);
    }

    #[test]
    fn test_frames_without_values_skipped() {
        let results = vec![frame(0, None, None), frame(1, Some(f64::NAN), None)];
        assert!(extremal_angle(&results, &Angle::KNEES).is_none());
    }

    #[test]
    fn test_tie_keeps_first_frame() {
        let results = vec![frame(3, Some(90.0), None), frame(5, Some(90.0), None)];
        assert_eq!(extremal_angle(&results, &Angle::KNEES).unwrap().frame.index, 3);
    }

    #[test]
    fn test_summarize_counts() {
        let results = vec![frame(2, Some(100.0), None), frame(0, Some(150.0), None)];
        let s = summarize(Uuid::nil(), Path::new("/tmp/video_1_2.mp4"), 4, results, &Angle::KNEES);

        assert_eq!(s.video_id, "video_1_2");
        assert_eq!(s.frames_count, 4);
        assert_eq!(s.processed_count, 2);
        assert_eq!(s.results[0].frame.index, 0);
        assert_eq!(s.min_angle.unwrap().frame.index, 2);
        assert!(s.annotated_frame.is_none());
    }
}
