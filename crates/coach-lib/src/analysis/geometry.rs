//! Joint angle geometry

use crate::models::{Angle, JointAngles, Keypoints, Point};

/// Angle at `b` formed by the segments b→a and b→c, in degrees.
///
/// Returns 0 when either segment has zero length.
pub fn angle_three_points(a: Point, b: Point, c: Point) -> f64 {
    let (ax, ay) = (a.x - b.x, a.y - b.y);
    let (cx, cy) = (c.x - b.x, c.y - b.y);
    let mag_a = ax.hypot(ay);
    let mag_c = cx.hypot(cy);
    if mag_a == 0.0 || mag_c == 0.0 {
        return 0.0;
    }
    let cos = ((ax * cx + ay * cy) / (mag_a * mag_c)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Angle value for `angle` if all three joints are present
pub fn measure(angle: Angle, keypoints: &Keypoints) -> Option<f64> {
    let (a, b, c) = angle.joints();
    Some(angle_three_points(
        keypoints.get(a)?,
        keypoints.get(b)?,
        keypoints.get(c)?,
    ))
}

/// Fill angles the collaborator did not report from pixel keypoints
pub fn fill_missing_angles(angles: &mut JointAngles, keypoints: &Keypoints) {
    for angle in Angle::ALL {
        if angles.get(angle).is_none() {
            angles.set(angle, measure(angle, keypoints));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Keypoint;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_right_angle() {
        let angle = angle_three_points(
            Point::new(0.0, 1.0),
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
        );
        assert!(approx(angle, 90.0));
    }

    #[test]
    fn test_straight_leg_is_180() {
        let angle = angle_three_points(
            Point::new(100.0, 100.0),
            Point::new(100.0, 200.0),
            Point::new(100.0, 300.0),
        );
        assert!(approx(angle, 180.0));
    }

    #[test]
    fn test_degenerate_segment_is_zero() {
        let p = Point::new(5.0, 5.0);
        assert_eq!(angle_three_points(p, p, Point::new(1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_fill_missing_keeps_reported_values() {
        let mut kp = Keypoints::default();
        kp.set(Keypoint::LeftHip, Some(Point::new(0.0, 0.0)));
        kp.set(Keypoint::LeftKnee, Some(Point::new(0.0, 10.0)));
        kp.set(Keypoint::LeftAnkle, Some(Point::new(10.0, 10.0)));
        kp.set(Keypoint::RightHip, Some(Point::new(0.0, 0.0)));
        kp.set(Keypoint::RightKnee, Some(Point::new(0.0, 10.0)));
        kp.set(Keypoint::RightAnkle, Some(Point::new(0.0, 20.0)));

        let mut angles = JointAngles {
            right_knee: Some(123.0),
            ..Default::default()
        };
        fill_missing_angles(&mut angles, &kp);

        assert!(approx(angles.left_knee.unwrap(), 90.0));
        assert_eq!(angles.right_knee, Some(123.0));
        // Shoulders missing, so hip angles stay absent
        assert_eq!(angles.left_hip, None);
        assert_eq!(angles.right_torso, None);
    }
}
