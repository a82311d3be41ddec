//! Hand landmark data.

use nalgebra::Point2;

use crate::image::{draw, Color, Image, Resolution};

/// The number of landmarks estimated for each hand.
pub const NUM_LANDMARKS: usize = 21;

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Surround the palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// The landmarks of one hand, as reported by a [`LandmarkDetector`].
///
/// Positions are normalized: X and Y are in range `0.0..=1.0` relative to the frame's width and
/// height. Z is the relative depth reported by the network and is not used for control.
///
/// [`LandmarkDetector`]: super::detector::LandmarkDetector
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    positions: [[f32; 3]; NUM_LANDMARKS],
    presence: f32,
}

impl HandLandmarks {
    /// Creates a set of landmarks from normalized positions.
    ///
    /// `presence` is the detector's confidence that a hand is visible.
    pub fn new(positions: [[f32; 3]; NUM_LANDMARKS], presence: f32) -> Self {
        Self {
            positions,
            presence,
        }
    }

    /// Creates landmarks from normalized 2D positions, with full presence and zero depth.
    pub fn from_xy(positions: [[f32; 2]; NUM_LANDMARKS]) -> Self {
        Self::new(positions.map(|[x, y]| [x, y, 0.0]), 1.0)
    }

    /// Returns all normalized landmark positions.
    pub fn positions(&self) -> &[[f32; 3]; NUM_LANDMARKS] {
        &self.positions
    }

    /// Returns a landmark's normalized position.
    pub fn position(&self, idx: LandmarkIdx) -> [f32; 3] {
        self.positions[idx as usize]
    }

    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Converts the normalized positions into pixel coordinates of a frame of size `res`.
    ///
    /// Coordinates are truncated towards zero.
    pub fn to_pixels(&self, res: Resolution) -> LandmarkList {
        let (w, h) = (res.width() as f32, res.height() as f32);
        LandmarkList {
            points: self
                .positions
                .map(|[x, y, _]| Point2::new((x * w) as i32, (y * h) as i32)),
        }
    }
}

/// A landmark in pixel coordinates, together with its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landmark {
    pub id: usize,
    pub x: i32,
    pub y: i32,
}

/// The 21 landmarks of one hand in integer pixel coordinates of the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandmarkList {
    points: [Point2<i32>; NUM_LANDMARKS],
}

impl LandmarkList {
    /// Creates a landmark list from `(x, y)` pixel coordinates, ordered by [`LandmarkIdx`].
    pub fn new(points: [(i32, i32); NUM_LANDMARKS]) -> Self {
        Self {
            points: points.map(|(x, y)| Point2::new(x, y)),
        }
    }

    /// Returns the pixel position of a landmark.
    #[inline]
    pub fn point(&self, idx: LandmarkIdx) -> Point2<i32> {
        self.points[idx as usize]
    }

    /// Returns all landmark positions, ordered by [`LandmarkIdx`].
    pub fn points(&self) -> &[Point2<i32>; NUM_LANDMARKS] {
        &self.points
    }

    /// Returns the landmark with index `id`, or [`None`] if `id` is out of range.
    pub fn get(&self, id: usize) -> Option<Landmark> {
        self.points.get(id).map(|p| Landmark { id, x: p.x, y: p.y })
    }

    /// Returns an iterator over all landmarks, in index order.
    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.points
            .iter()
            .enumerate()
            .map(|(id, p)| Landmark { id, x: p.x, y: p.y })
    }

    /// Draws the hand skeleton and a dot on every landmark.
    pub fn draw(&self, target: &mut Image) {
        for (a, b) in CONNECTIVITY {
            let (a, b) = (self.point(*a), self.point(*b));
            draw::line(target, (a.x, a.y), (b.x, b.y))
                .color(Color::WHITE)
                .stroke_width(2);
        }
        for p in &self.points {
            draw::circle(target, p.x, p.y, 7)
                .color(Color::from_rgb8(9, 0, 255))
                .filled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pixels_truncates() {
        let mut positions = [[0.0; 2]; NUM_LANDMARKS];
        positions[LandmarkIdx::IndexFingerTip as usize] = [0.5, 0.25];
        positions[LandmarkIdx::PinkyTip as usize] = [0.9999, 0.0019];
        let list = HandLandmarks::from_xy(positions).to_pixels(Resolution::RES_VGA);

        assert_eq!(
            list.get(8),
            Some(Landmark {
                id: 8,
                x: 320,
                y: 120
            })
        );
        assert_eq!(list.point(LandmarkIdx::PinkyTip), Point2::new(639, 0));
        assert_eq!(list.get(NUM_LANDMARKS), None);
        assert_eq!(list.iter().count(), NUM_LANDMARKS);
    }

    #[test]
    fn landmark_idx_matches_network_order() {
        assert_eq!(LandmarkIdx::ThumbTip as usize, 4);
        assert_eq!(LandmarkIdx::IndexFingerTip as usize, 8);
        assert_eq!(LandmarkIdx::MiddleFingerTip as usize, 12);
        assert_eq!(LandmarkIdx::PinkyTip as usize, NUM_LANDMARKS - 1);
    }
}
