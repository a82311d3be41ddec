//! Palm detection.
//!
//! The hand landmark network expects a crop that is centered on the hand and rotated so that the
//! fingers point up. While no hand is tracked, that crop comes from the palm detection network: a
//! single shot multibox detector (SSD) where every anchor of its output grid predicts a palm box,
//! 7 keypoints and a score.

use std::path::Path;

use anyhow::{bail, Context};
use nalgebra::{Point2, Rotation2, Vector2};

use crate::image::{AspectRatio, Image, Rect, Resolution, RotatedRect};
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};
use crate::timer::Timer;

/// Values predicted per anchor: box center offset and size, then 7 keypoint offsets.
const BOX_PARAMS: usize = 18;

const NUM_KEYPOINTS: usize = 7;

/// Relative margin added around the squared palm box to cover the whole hand.
const HAND_GROW: f32 = 0.8;

/// Distance the palm box is moved towards the fingers, relative to its height.
const HAND_SHIFT: f32 = 0.5;

/// A keypoint of a [`PalmDetection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

/// Returns the clockwise rotation (in radians) that turns a hand upright, so that `finger` lies
/// straight above `wrist`.
pub(crate) fn upright_angle(wrist: Point2<f32>, finger: Point2<f32>) -> f32 {
    let rel = wrist - finger;
    Rotation2::rotation_between(&Vector2::y(), &rel).angle()
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// A palm found by a [`PalmDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct PalmDetection {
    confidence: f32,
    rect: Rect,
    keypoints: [Point2<f32>; NUM_KEYPOINTS],
    angle: f32,
}

impl PalmDetection {
    fn new(confidence: f32, rect: Rect, keypoints: [Point2<f32>; NUM_KEYPOINTS]) -> Self {
        let angle = upright_angle(
            keypoints[Keypoint::Wrist as usize],
            keypoints[Keypoint::MiddleFingerMcp as usize],
        );
        Self {
            confidence,
            rect,
            keypoints,
            angle,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned box around the palm.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoint(&self, keypoint: Keypoint) -> Point2<f32> {
        self.keypoints[keypoint as usize]
    }

    /// Returns the clockwise rotation of the hand, in radians. 0.0 means the fingers point up.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Estimates the square region covering the whole hand, rotated along with the hand.
    pub fn hand_roi(&self) -> RotatedRect {
        let size = self.rect.width().max(self.rect.height());
        let shift =
            Rotation2::new(self.angle) * Vector2::new(0.0, -HAND_SHIFT * self.rect.height());
        let center = self.rect.center() + shift;
        RotatedRect::new(Rect::from_center(center.x, center.y, size, size), self.angle)
            .grow_rel(HAND_GROW)
    }

    /// Maps the detection from network input coordinates to the frame area shown by `view`.
    fn to_frame(&self, view: Rect, input_res: Resolution) -> Self {
        let scale = view.width() / input_res.width() as f32;
        let offset = Vector2::new(view.x(), view.y());
        let map = |p: Point2<f32>| Point2::from(p.coords * scale) + offset;
        let center = map(self.rect.center());
        Self {
            confidence: self.confidence,
            rect: Rect::from_center(
                center.x,
                center.y,
                self.rect.width() * scale,
                self.rect.height() * scale,
            ),
            keypoints: self.keypoints.map(map),
            angle: self.angle,
        }
    }
}

/// SSD anchor centers, normalized to `0.0..=1.0`.
struct Anchors(Vec<Point2<f32>>);

impl Anchors {
    /// Computes the anchor layout of the MediaPipe palm detection networks: a grid with a stride
    /// of 8 pixels and 2 anchors per cell, followed by one with a stride of 16 and 6 per cell.
    fn palm(input_res: Resolution) -> Self {
        let mut anchors = Vec::new();
        for (stride, per_cell) in [(8, 2), (16, 6)] {
            let (w, h) = (input_res.width() / stride, input_res.height() / stride);
            for y in 0..h {
                for x in 0..w {
                    let center = Point2::new(
                        (x as f32 + 0.5) / w as f32,
                        (y as f32 + 0.5) / h as f32,
                    );
                    anchors.extend(std::iter::repeat(center).take(per_cell));
                }
            }
        }
        Self(anchors)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

fn decode(
    anchor: Point2<f32>,
    input_res: Resolution,
    params: &[f32],
    confidence: f32,
) -> PalmDetection {
    let origin = Vector2::new(
        anchor.x * input_res.width() as f32,
        anchor.y * input_res.height() as f32,
    );
    let point = |i: usize| Point2::new(params[i], params[i + 1]) + origin;

    let center = point(0);
    let rect = Rect::from_center(center.x, center.y, params[2], params[3]);
    let keypoints = std::array::from_fn(|i| point(4 + i * 2));
    PalmDetection::new(confidence, rect, keypoints)
}

/// Returns the detection with the highest confidence of at least `threshold`.
///
/// Anchors with non-finite outputs are skipped.
fn extract_best(
    anchors: &Anchors,
    input_res: Resolution,
    outputs: &Outputs,
    threshold: f32,
) -> anyhow::Result<Option<PalmDetection>> {
    let boxes = outputs.f32_data(0, &[1, anchors.len(), BOX_PARAMS])?;
    let scores = outputs.f32_data(1, &[1, anchors.len(), 1])?;

    let params = |i: usize| &boxes[i * BOX_PARAMS..][..BOX_PARAMS];
    let best = scores
        .iter()
        .map(|&score| sigmoid(score))
        .enumerate()
        .filter(|&(_, conf)| conf >= threshold)
        .filter(|&(i, _)| params(i).iter().all(|v| v.is_finite()))
        .max_by(|(_, a), (_, b)| a.total_cmp(b));

    Ok(best.map(|(i, conf)| decode(anchors.0[i], input_res, params(i), conf)))
}

/// Finds the most prominent palm in a frame.
pub struct PalmDetector {
    cnn: Cnn,
    anchors: Anchors,
    threshold: f32,
    t_infer: Timer,
    t_extract: Timer,
}

impl PalmDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    /// Loads a palm detection network from an ONNX file.
    ///
    /// The network takes a `[1, 3, H, W]` RGB input in range `0.0..=1.0` and produces
    /// `[1, N, 18]` boxes and `[1, N, 1]` raw scores.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?;
        if nn.num_outputs() != 2 {
            bail!(
                "palm detection network '{}' has {} outputs, expected 2",
                path.display(),
                nn.num_outputs()
            );
        }
        let cnn = Cnn::new(nn, ColorMapper::linear(0.0..=1.0))
            .with_context(|| format!("unsupported palm detection network '{}'", path.display()))?;
        log::info!(
            "loaded palm detection network '{}' with input size {}",
            path.display(),
            cnn.input_resolution(),
        );
        Ok(Self::new(cnn))
    }

    pub fn new(cnn: Cnn) -> Self {
        Self {
            anchors: Anchors::palm(cnn.input_resolution()),
            cnn,
            threshold: Self::DEFAULT_THRESHOLD,
            t_infer: Timer::new("palm infer"),
            t_extract: Timer::new("palm extract"),
        }
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }

    /// Searches the whole of `image` and returns the palm with the highest confidence.
    pub fn detect(&self, image: &Image) -> anyhow::Result<Option<PalmDetection>> {
        let input_res = self.cnn.input_resolution();
        let view = image
            .rect()
            .grow_to_fit_aspect(input_res.aspect_ratio().unwrap_or(AspectRatio::SQUARE));
        let outputs = self.cnn.estimate_timed(image, view, &self.t_infer)?;
        log::trace!("palm inference result: {:?}", outputs);

        let best = self
            .t_extract
            .time(|| extract_best(&self.anchors, input_res, &outputs, self.threshold))?;
        Ok(best.map(|det| det.to_frame(view, input_res)))
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use tract_onnx::prelude::{tract_ndarray::Array3, Tensor};

    use super::*;

    const INPUT: Resolution = Resolution::new(192, 192);

    /// Index of the first anchor in cell (3, 5) of the 12x12 grid, centered on (56, 88).
    const ANCHOR: usize = 24 * 24 * 2 + (5 * 12 + 3) * 6;

    fn outputs(boxes: Vec<f32>, scores: Vec<f32>) -> Outputs {
        let n = scores.len();
        Outputs::from_tensors(vec![
            Tensor::from(Array3::from_shape_vec((1, n, 18), boxes).unwrap().into_dyn()),
            Tensor::from(Array3::from_shape_vec((1, n, 1), scores).unwrap().into_dyn()),
        ])
    }

    /// Outputs with one upright palm at [`ANCHOR`] and a weaker one at anchor 0.
    fn upright_palm() -> Outputs {
        let anchors = Anchors::palm(INPUT);
        let mut boxes = vec![0.0; anchors.len() * BOX_PARAMS];
        let mut scores = vec![-10.0; anchors.len()];

        let params = &mut boxes[ANCHOR * BOX_PARAMS..][..BOX_PARAMS];
        params[..4].copy_from_slice(&[4.0, -8.0, 40.0, 40.0]);
        // Wrist below the middle finger MCP.
        params[4..6].copy_from_slice(&[0.0, 20.0]);
        params[8..10].copy_from_slice(&[0.0, -20.0]);
        scores[ANCHOR] = 3.0;
        scores[0] = 1.0;

        outputs(boxes, scores)
    }

    #[test]
    fn anchor_layout() {
        let anchors = Anchors::palm(INPUT);
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors.0[0], Point2::new(0.5 / 24.0, 0.5 / 24.0));
        assert_eq!(anchors.0[1], anchors.0[0]);
        assert_eq!(anchors.0[24 * 24 * 2], Point2::new(0.5 / 12.0, 0.5 / 12.0));
        assert_abs_diff_eq!(anchors.0[ANCHOR].x * 192.0, 56.0, epsilon = 1e-4);
        assert_abs_diff_eq!(anchors.0[ANCHOR].y * 192.0, 88.0, epsilon = 1e-4);
    }

    #[test]
    fn picks_most_confident_palm() {
        let anchors = Anchors::palm(INPUT);
        let det = extract_best(&anchors, INPUT, &upright_palm(), 0.5)
            .unwrap()
            .unwrap();
        assert_relative_eq!(det.confidence(), sigmoid(3.0));
        assert_abs_diff_eq!(det.rect().center().x, 60.0, epsilon = 1e-4);
        assert_abs_diff_eq!(det.rect().center().y, 80.0, epsilon = 1e-4);
        assert_eq!(det.rect().width(), 40.0);
        assert_abs_diff_eq!(det.keypoint(Keypoint::Wrist).y, 108.0, epsilon = 1e-4);
        assert_abs_diff_eq!(det.keypoint(Keypoint::MiddleFingerMcp).y, 68.0, epsilon = 1e-4);
        assert_abs_diff_eq!(det.angle(), 0.0);

        assert!(extract_best(&anchors, INPUT, &upright_palm(), 0.99)
            .unwrap()
            .is_none());
    }

    #[test]
    fn skips_non_finite_outputs() {
        let anchors = Anchors::palm(INPUT);
        let n = anchors.len();
        let nan_scores = outputs(vec![0.0; n * BOX_PARAMS], vec![f32::NAN; n]);
        assert!(extract_best(&anchors, INPUT, &nan_scores, 0.5)
            .unwrap()
            .is_none());

        let mut scores = vec![-10.0; n];
        scores[7] = 5.0;
        let nan_boxes = outputs(vec![f32::NAN; n * BOX_PARAMS], scores);
        assert!(extract_best(&anchors, INPUT, &nan_boxes, 0.5)
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejects_unexpected_shapes() {
        let anchors = Anchors::palm(INPUT);
        let wrong = outputs(vec![0.0; 10 * BOX_PARAMS], vec![0.0; 10]);
        assert!(extract_best(&anchors, INPUT, &wrong, 0.5).is_err());
    }

    #[test]
    fn tilted_hand_angle() {
        // Fingers leaning to the right need a clockwise rotation.
        let angle = upright_angle(Point2::new(0.0, 0.0), Point2::new(10.0, -10.0));
        assert_relative_eq!(angle, FRAC_PI_4);
        let angle = upright_angle(Point2::new(0.0, 0.0), Point2::new(-10.0, -10.0));
        assert_relative_eq!(angle, -FRAC_PI_4);
    }

    #[test]
    fn hand_roi_extends_towards_fingers() {
        let anchors = Anchors::palm(INPUT);
        let det = extract_best(&anchors, INPUT, &upright_palm(), 0.5)
            .unwrap()
            .unwrap();
        let roi = det.hand_roi();
        assert_abs_diff_eq!(roi.center().x, 60.0, epsilon = 1e-4);
        assert_abs_diff_eq!(roi.center().y, 60.0, epsilon = 1e-4);
        assert_abs_diff_eq!(roi.rect().width(), 104.0, epsilon = 1e-3);
        assert_abs_diff_eq!(roi.rect().height(), 104.0, epsilon = 1e-3);
        assert_abs_diff_eq!(roi.rotation_radians(), 0.0);
    }

    #[test]
    fn maps_back_to_letterboxed_frame() {
        // A 640x480 frame shown to a 192x192 network with 80px bars above and below.
        let view = Resolution::RES_VGA
            .rect()
            .grow_to_fit_aspect(AspectRatio::SQUARE);
        let det = PalmDetection::new(
            0.9,
            Rect::from_center(96.0, 96.0, 30.0, 30.0),
            [Point2::new(96.0, 96.0); NUM_KEYPOINTS],
        );
        let det = det.to_frame(view, INPUT);
        assert_abs_diff_eq!(det.rect().center().x, 320.0, epsilon = 1e-3);
        assert_abs_diff_eq!(det.rect().center().y, 240.0, epsilon = 1e-3);
        assert_abs_diff_eq!(det.rect().width(), 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(det.keypoint(Keypoint::ThumbMcp).y, 240.0, epsilon = 1e-3);
    }
}
