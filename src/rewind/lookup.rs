//! Time-indexed frame lookup and interpolation between bracketing frames

use glam::Quat;

use super::history::HistoryBuffer;
use super::snapshot::{Capsule, HitboxSnapshot, OrientedBox};
use super::RewindError;

/// Find (or reconstruct) the frame at `target_time`.
///
/// Boundary hits and exact matches are returned as-is; anything strictly
/// between two frames is interpolated.
pub fn find_frame(history: &HistoryBuffer, target_time: f32) -> Result<HitboxSnapshot, RewindError> {
    let (Some(oldest), Some(newest)) = (history.tail(), history.head()) else {
        return Err(RewindError::NoHistory { frames: 0 });
    };
    if history.len() < 2 {
        return Err(RewindError::NoHistory {
            frames: history.len(),
        });
    }

    if target_time < oldest.timestamp {
        return Err(RewindError::TooOld {
            claimed: target_time,
            oldest: oldest.timestamp,
        });
    }
    if target_time == oldest.timestamp {
        return Ok(oldest.clone());
    }
    if target_time >= newest.timestamp {
        return Ok(newest.clone());
    }

    // March back until older.time <= target_time <= younger.time
    let mut younger = newest;
    let mut older = newest;
    for frame in history.iter_newest_first().skip(1) {
        older = frame;
        if frame.timestamp <= target_time {
            break;
        }
        younger = frame;
    }

    if older.timestamp == target_time {
        return Ok(older.clone());
    }

    interpolate(older, younger, target_time)
}

/// Blend two frames of the same skeleton. Sizes, radii and classes come from `younger`.
pub fn interpolate(
    older: &HitboxSnapshot,
    younger: &HitboxSnapshot,
    target_time: f32,
) -> Result<HitboxSnapshot, RewindError> {
    let mismatch = || RewindError::TopologyMismatch {
        older: older.timestamp,
        younger: younger.timestamp,
    };

    if older.boxes.len() != younger.boxes.len() || older.capsules.len() != younger.capsules.len() {
        return Err(mismatch());
    }

    let span = younger.timestamp - older.timestamp;
    let fraction = if span > 0.0 {
        ((target_time - older.timestamp) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let mut frame = HitboxSnapshot::new(target_time);

    for (bone, young) in &younger.boxes {
        let old = older.boxes.get(bone).ok_or_else(mismatch)?;
        frame.boxes.insert(
            *bone,
            OrientedBox {
                location: old.location.lerp(young.location, fraction),
                rotation: shortest_slerp(old.rotation, young.rotation, fraction),
                extent: young.extent,
            },
        );
    }

    for (old, young) in older.capsules.iter().zip(&younger.capsules) {
        if old.bone != young.bone {
            return Err(mismatch());
        }
        frame.capsules.push(Capsule {
            bone: young.bone,
            a: old.a.lerp(young.a, fraction),
            b: old.b.lerp(young.b, fraction),
            radius: young.radius,
            class: young.class,
        });
    }

    Ok(frame)
}

fn shortest_slerp(from: Quat, to: Quat, fraction: f32) -> Quat {
    let to = if from.dot(to) < 0.0 { -to } else { to };
    from.slerp(to, fraction)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::rewind::hitbox::HitboxClass;

    fn head_frame(t: f32, position: Vec3) -> HitboxSnapshot {
        let mut frame = HitboxSnapshot::new(t);
        frame.boxes.insert(
            "head",
            OrientedBox {
                location: position,
                rotation: Quat::IDENTITY,
                extent: Vec3::splat(10.0),
            },
        );
        frame.capsules.push(Capsule {
            bone: "head",
            a: position,
            b: position + Vec3::Z * 10.0,
            radius: 10.0,
            class: HitboxClass::Head,
        });
        frame
    }

    fn history(frames: Vec<HitboxSnapshot>) -> HistoryBuffer {
        let mut buffer = HistoryBuffer::new(100.0);
        for frame in frames {
            buffer.record(frame).unwrap();
        }
        buffer
    }

    #[test]
    fn no_history_with_fewer_than_two_frames() {
        let empty = history(vec![]);
        assert_eq!(
            find_frame(&empty, 1.0),
            Err(RewindError::NoHistory { frames: 0 })
        );

        let single = history(vec![head_frame(1.0, Vec3::ZERO)]);
        assert_eq!(
            find_frame(&single, 1.0),
            Err(RewindError::NoHistory { frames: 1 })
        );
    }

    #[test]
    fn too_old_claim() {
        let buffer = history(vec![head_frame(1.0, Vec3::ZERO), head_frame(2.0, Vec3::X)]);
        assert_eq!(
            find_frame(&buffer, 0.5),
            Err(RewindError::TooOld {
                claimed: 0.5,
                oldest: 1.0
            })
        );
    }

    #[test]
    fn boundaries_are_returned_unchanged() {
        let tail = head_frame(1.0, Vec3::new(1.0, 2.0, 3.0));
        let middle = head_frame(1.5, Vec3::new(7.0, 7.0, 7.0));
        let head = head_frame(2.0, Vec3::new(4.0, 5.0, 6.0));
        let buffer = history(vec![tail.clone(), middle, head.clone()]);

        assert_eq!(find_frame(&buffer, 1.0).unwrap(), tail);
        assert_eq!(find_frame(&buffer, 2.0).unwrap(), head);
        // Claims from the future clamp to the newest frame
        assert_eq!(find_frame(&buffer, 3.0).unwrap(), head);
    }

    #[test]
    fn exact_match_mid_history() {
        let middle = head_frame(1.5, Vec3::new(7.0, 7.0, 7.0));
        let buffer = history(vec![
            head_frame(1.0, Vec3::ZERO),
            middle.clone(),
            head_frame(2.0, Vec3::X),
        ]);
        assert_eq!(find_frame(&buffer, 1.5).unwrap(), middle);
    }

    #[test]
    fn linear_midpoint() {
        let p0 = Vec3::new(0.0, 0.0, 0.0);
        let p1 = Vec3::new(100.0, -40.0, 20.0);
        let buffer = history(vec![head_frame(0.0, p0), head_frame(10.0, p1)]);

        let frame = find_frame(&buffer, 5.0).unwrap();
        let expected = (p0 + p1) / 2.0;

        assert_eq!(frame.timestamp, 5.0);
        assert!(frame.boxes["head"].location.abs_diff_eq(expected, 1e-4));
        assert!(frame.capsules[0].a.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn brackets_the_right_pair() {
        let buffer = history(vec![
            head_frame(0.0, Vec3::ZERO),
            head_frame(1.0, Vec3::X * 10.0),
            head_frame(2.0, Vec3::X * 30.0),
            head_frame(3.0, Vec3::X * 60.0),
        ]);

        let frame = find_frame(&buffer, 1.25).unwrap();
        assert!(frame.boxes["head"]
            .location
            .abs_diff_eq(Vec3::X * 15.0, 1e-4));
    }

    #[test]
    fn rotation_takes_shortest_arc() {
        let mut older = head_frame(0.0, Vec3::ZERO);
        let mut younger = head_frame(1.0, Vec3::ZERO);
        let quarter = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        older.boxes.get_mut("head").unwrap().rotation = Quat::IDENTITY;
        // Same rotation as `quarter`, opposite hemisphere
        younger.boxes.get_mut("head").unwrap().rotation = -quarter;

        let frame = interpolate(&older, &younger, 0.5).unwrap();
        let halfway = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
        let rotation = frame.boxes["head"].rotation;
        assert!(rotation.dot(halfway).abs() > 0.9999);
    }

    #[test]
    fn size_and_class_from_younger() {
        let older = head_frame(0.0, Vec3::ZERO);
        let mut younger = head_frame(1.0, Vec3::ZERO);
        younger.capsules[0].radius = 12.0;
        younger.boxes.get_mut("head").unwrap().extent = Vec3::splat(8.0);

        let frame = interpolate(&older, &younger, 0.25).unwrap();
        assert_eq!(frame.capsules[0].radius, 12.0);
        assert_eq!(frame.boxes["head"].extent, Vec3::splat(8.0));
    }

    #[test]
    fn topology_mismatch_is_reported() {
        let older = head_frame(0.0, Vec3::ZERO);
        let mut younger = head_frame(1.0, Vec3::ZERO);
        younger.capsules[0].bone = "neck_01";

        assert_eq!(
            interpolate(&older, &younger, 0.5),
            Err(RewindError::TopologyMismatch {
                older: 0.0,
                younger: 1.0
            })
        );

        let mut missing = head_frame(1.0, Vec3::ZERO);
        missing.boxes.clear();
        assert!(interpolate(&older, &missing, 0.5).is_err());
    }
}
