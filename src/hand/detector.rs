//! Hand landmark detection.

use std::path::Path;

use anyhow::Context;
use nalgebra::Point2;

use crate::image::{AspectRatio, Image, Resolution, RotatedRect};
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};
use crate::timer::Timer;

use super::landmark::{HandLandmarks, LandmarkIdx, NUM_LANDMARKS};
use super::palm::{upright_angle, PalmDetector};

/// Source of hand landmarks for a frame.
///
/// Implementations may keep state between frames (for example a tracked region of interest), so
/// they should be fed consecutive frames of the same video stream.
pub trait LandmarkDetector {
    /// Detects the hands visible in `image`.
    ///
    /// Returns an empty list when no hand is visible. Landmark positions are normalized to the
    /// dimensions of `image`.
    fn detect(&mut self, image: &Image) -> anyhow::Result<Vec<HandLandmarks>>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Vec<HandLandmarks>> {
        (**self).detect(image)
    }
}

/// Region of interest (RoI) tracking for a single hand.
///
/// After every landmark estimate, the tracker either keeps following the hand, with the RoI set to
/// a padded square around the landmarks (rotated along with the hand), or drops it when the
/// network is no longer confident that a hand is visible.
#[derive(Debug, Clone)]
pub struct RoiTracker {
    roi: Option<RotatedRect>,
    min_confidence: f32,
}

impl Default for RoiTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RoiTracker {
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

    /// Relative padding added on each side of the landmarks' bounding box.
    const PADDING: f32 = 0.3;

    pub fn new() -> Self {
        Self {
            roi: None,
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// Sets the minimum presence score for a hand to stay tracked.
    ///
    /// # Panics
    ///
    /// Panics if `confidence` is not in range `0.0..=1.0`.
    pub fn set_min_confidence(&mut self, confidence: f32) {
        assert!((0.0..=1.0).contains(&confidence));
        self.min_confidence = confidence;
    }

    /// Returns the region the next frame should be searched in, or [`None`] if no hand is
    /// tracked.
    pub fn roi(&self) -> Option<RotatedRect> {
        self.roi
    }

    /// Updates the RoI from a landmark estimate of a frame of size `frame`.
    ///
    /// Returns the estimate if the hand is still tracked. Estimates below the minimum confidence,
    /// or with non-finite positions, lose the hand and return [`None`].
    pub fn track(&mut self, estimate: HandLandmarks, frame: Resolution) -> Option<HandLandmarks> {
        let finite = estimate
            .positions()
            .iter()
            .flatten()
            .all(|v| v.is_finite());
        if !finite || !(estimate.presence() >= self.min_confidence) {
            if self.roi.is_some() {
                log::debug!(
                    "hand lost (presence {:.2} < {:.2}, finite: {})",
                    estimate.presence(),
                    self.min_confidence,
                    finite,
                );
            }
            self.roi = None;
            return None;
        }

        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let pixel = |idx: LandmarkIdx| {
            let [x, y, _] = estimate.position(idx);
            Point2::new(x * w, y * h)
        };
        let angle = upright_angle(pixel(LandmarkIdx::Wrist), pixel(LandmarkIdx::MiddleFingerMcp));
        let roi = RotatedRect::bounding(
            angle,
            estimate.positions().iter().map(|[x, y, _]| [x * w, y * h]),
        )
        .map(|rect| {
            rect.grow_rel(Self::PADDING)
                .grow_to_fit_aspect(AspectRatio::SQUARE)
        });
        if self.roi.is_none() {
            log::debug!("hand found, tracking {:?}", roi);
        }
        self.roi = roi;

        Some(estimate)
    }
}

/// Estimates the landmarks of a single hand with a hand landmark network, tracking the hand
/// across frames.
///
/// While no hand is tracked, a [`PalmDetector`] (if one is attached) searches the frame and its
/// best palm seeds the region of interest. Without a palm detector, the whole frame is passed to
/// the landmark network (with black bars added to match its input aspect ratio), which only finds
/// hands that fill a large part of the frame. Once the landmark network reports a hand with
/// sufficient confidence, a [`RoiTracker`] follows it until confidence drops below the minimum.
pub struct HandDetector {
    cnn: Cnn,
    palm: Option<PalmDetector>,
    tracker: RoiTracker,
    t_infer: Timer,
    t_extract: Timer,
}

impl HandDetector {
    pub const DEFAULT_MIN_CONFIDENCE: f32 = RoiTracker::DEFAULT_MIN_CONFIDENCE;

    /// Loads the hand landmark network from an ONNX file.
    ///
    /// The network is expected to take a `[1, 3, H, W]` RGB input in range `0.0..=1.0` and to
    /// produce 4 outputs: `[1, 63]` screen landmarks, `[1, 1]` presence, `[1, 1]` handedness and
    /// `[1, 63]` world landmarks.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?;
        if nn.num_outputs() != 4 {
            anyhow::bail!(
                "hand landmark network '{}' has {} outputs, expected 4",
                path.display(),
                nn.num_outputs()
            );
        }
        let cnn = Cnn::new(nn, ColorMapper::linear(0.0..=1.0))
            .with_context(|| format!("unsupported hand landmark network '{}'", path.display()))?;
        log::info!(
            "loaded hand landmark network '{}' with input size {}",
            path.display(),
            cnn.input_resolution(),
        );
        Ok(Self::new(cnn))
    }

    /// Creates a detector from an already loaded landmark network.
    pub fn new(cnn: Cnn) -> Self {
        Self {
            cnn,
            palm: None,
            tracker: RoiTracker::new(),
            t_infer: Timer::new("infer"),
            t_extract: Timer::new("extract"),
        }
    }

    /// Uses `palm` to find hands that are not tracked yet.
    pub fn with_palm_detector(self, palm: PalmDetector) -> Self {
        Self {
            palm: Some(palm),
            ..self
        }
    }

    /// Sets the minimum presence score for a hand to be reported.
    ///
    /// By default, [`HandDetector::DEFAULT_MIN_CONFIDENCE`] is used.
    ///
    /// # Panics
    ///
    /// Panics if `confidence` is not in range `0.0..=1.0`.
    pub fn set_min_confidence(&mut self, confidence: f32) {
        self.tracker.set_min_confidence(confidence);
    }

    /// Returns the region of interest that the next frame will be searched in.
    ///
    /// Returns [`None`] if no hand is being tracked.
    pub fn roi(&self) -> Option<RotatedRect> {
        self.tracker.roi()
    }

    /// Returns profiling timers.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        let palm = self.palm.iter().flat_map(|palm| palm.timers());
        [&self.t_infer, &self.t_extract].into_iter().chain(palm)
    }

    fn input_aspect(&self) -> AspectRatio {
        self.cnn
            .input_resolution()
            .aspect_ratio()
            .unwrap_or(AspectRatio::SQUARE)
    }

    /// Returns the region to run the landmark network on, or [`None`] if there is no hand.
    fn search_region(&self, image: &Image) -> anyhow::Result<Option<RotatedRect>> {
        if let Some(roi) = self.tracker.roi() {
            return Ok(Some(roi));
        }
        let Some(palm) = &self.palm else {
            return Ok(Some(image.rect().into()));
        };
        Ok(palm.detect(image)?.map(|det| {
            log::trace!("palm detected: {:?}", det);
            det.hand_roi()
        }))
    }
}

impl LandmarkDetector for HandDetector {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Vec<HandLandmarks>> {
        let Some(roi) = self.search_region(image)? else {
            return Ok(Vec::new());
        };
        let view = roi.grow_to_fit_aspect(self.input_aspect());

        let outputs = self.cnn.estimate_timed(image, view, &self.t_infer)?;
        log::trace!("inference result: {:?}", outputs);

        let estimate = self.t_extract.time(|| {
            RawEstimate::extract(&outputs).map(|est| {
                est.to_frame(view, self.cnn.input_resolution(), image.resolution())
            })
        })?;

        Ok(self
            .tracker
            .track(estimate, image.resolution())
            .into_iter()
            .collect())
    }
}

/// Network outputs, in the coordinate system of the network input.
struct RawEstimate {
    positions: [[f32; 3]; NUM_LANDMARKS],
    presence: f32,
}

impl RawEstimate {
    fn extract(outputs: &Outputs) -> anyhow::Result<Self> {
        let screen_landmarks = outputs.f32_data(0, &[1, NUM_LANDMARKS * 3])?;
        let presence = outputs.f32_data(1, &[1, 1])?[0];
        // Handedness and world landmarks are not used, but check that this is the network we
        // think it is.
        outputs.f32_data(2, &[1, 1])?;
        outputs.f32_data(3, &[1, NUM_LANDMARKS * 3])?;

        let mut positions = [[0.0; 3]; NUM_LANDMARKS];
        for (out, chunk) in positions.iter_mut().zip(screen_landmarks.chunks_exact(3)) {
            out.copy_from_slice(chunk);
        }

        Ok(Self {
            positions,
            presence,
        })
    }

    /// Maps the estimate from the network input (which showed `view`) back to the full frame,
    /// and normalizes it.
    fn to_frame(
        &self,
        view: RotatedRect,
        input_res: Resolution,
        frame_res: Resolution,
    ) -> HandLandmarks {
        let scale_x = view.rect().width() / input_res.width() as f32;
        let scale_y = view.rect().height() / input_res.height() as f32;
        let (w, h) = (frame_res.width() as f32, frame_res.height() as f32);

        let positions = self.positions.map(|[x, y, z]| {
            let p = view.transform_out(x * scale_x, y * scale_y);
            [p.x / w, p.y / h, z * scale_x / w]
        });
        HandLandmarks::new(positions, self.presence)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use tract_onnx::prelude::{tract_ndarray::Array2, Tensor};

    use super::*;
    use crate::image::Rect;

    fn tensor(rows: usize, data: Vec<f32>) -> Tensor {
        Tensor::from(Array2::from_shape_vec((1, rows), data).unwrap().into_dyn())
    }

    fn outputs(landmark: [f32; 3], presence: f32) -> Outputs {
        let landmarks = landmark.repeat(NUM_LANDMARKS);
        Outputs::from_tensors(vec![
            tensor(63, landmarks.clone()),
            tensor(1, vec![presence]),
            tensor(1, vec![0.9]),
            tensor(63, landmarks),
        ])
    }

    #[test]
    fn extract_checks_shapes() {
        let est = RawEstimate::extract(&outputs([1.0, 2.0, 3.0], 0.8)).unwrap();
        assert_eq!(est.positions[20], [1.0, 2.0, 3.0]);
        assert_eq!(est.presence, 0.8);

        let bad = Outputs::from_tensors(vec![tensor(42, vec![0.0; 42])]);
        assert!(RawEstimate::extract(&bad).is_err());

        let missing = Outputs::from_tensors(vec![tensor(63, vec![0.0; 63])]);
        assert!(RawEstimate::extract(&missing).is_err());
    }

    #[test]
    fn letterboxed_full_frame_maps_back() {
        // A 640x480 frame is grown to 640x640 for a square network input, adding 80px bars at the
        // top and bottom.
        let frame = Resolution::RES_VGA;
        let view = RotatedRect::from(frame.rect()).grow_to_fit_aspect(AspectRatio::SQUARE);
        assert_relative_eq!(view.rect().y(), -80.0);

        let est = RawEstimate::extract(&outputs([112.0, 112.0, 0.0], 1.0)).unwrap();
        let hand = est.to_frame(view, Resolution::new(224, 224), frame);
        let [x, y, _] = hand.positions()[0];
        assert_relative_eq!(x, 0.5);
        assert_relative_eq!(y, 0.5);

        let est = RawEstimate::extract(&outputs([0.0, 0.0, 0.0], 1.0)).unwrap();
        let hand = est.to_frame(view, Resolution::new(224, 224), frame);
        let [x, y, _] = hand.positions()[0];
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, -80.0 / 480.0);
    }

    #[test]
    fn roi_maps_back() {
        let view = Rect::from_top_left(100.0, 50.0, 200.0, 200.0).into();
        let est = RawEstimate::extract(&outputs([56.0, 224.0, 0.0], 1.0)).unwrap();
        let hand = est.to_frame(view, Resolution::new(224, 224), Resolution::new(400, 400));
        let [x, y, _] = hand.positions()[0];
        assert_relative_eq!(x, 150.0 / 400.0);
        assert_relative_eq!(y, 250.0 / 400.0);
    }

    #[test]
    fn rotated_roi_maps_back() {
        // A quarter turn clockwise: the top edge of the network input runs down the right edge of
        // the view.
        let view = RotatedRect::new(Rect::from_center(200.0, 200.0, 200.0, 200.0), FRAC_PI_2);
        let est = RawEstimate::extract(&outputs([224.0, 0.0, 0.0], 1.0)).unwrap();
        let hand = est.to_frame(view, Resolution::new(224, 224), Resolution::new(400, 400));
        let [x, y, _] = hand.positions()[0];
        assert_abs_diff_eq!(x, 300.0 / 400.0, epsilon = 1e-5);
        assert_abs_diff_eq!(y, 300.0 / 400.0, epsilon = 1e-5);
    }

    /// An upright open hand around the center of a 640x480 frame.
    fn upright_hand(presence: f32) -> HandLandmarks {
        let mut positions = [[0.5, 0.5, 0.0]; NUM_LANDMARKS];
        positions[LandmarkIdx::Wrist as usize] = [0.5, 0.8, 0.0];
        positions[LandmarkIdx::MiddleFingerMcp as usize] = [0.5, 0.5, 0.0];
        positions[LandmarkIdx::MiddleFingerTip as usize] = [0.5, 0.2, 0.0];
        positions[LandmarkIdx::ThumbTip as usize] = [0.4, 0.5, 0.0];
        positions[LandmarkIdx::PinkyTip as usize] = [0.6, 0.4, 0.0];
        HandLandmarks::new(positions, presence)
    }

    #[test]
    fn tracker_follows_found_hand() {
        let mut tracker = RoiTracker::new();
        assert_eq!(tracker.roi(), None);

        let hand = tracker.track(upright_hand(0.9), Resolution::RES_VGA);
        assert!(hand.is_some());

        let roi = tracker.roi().unwrap();
        assert_abs_diff_eq!(roi.rotation_radians(), 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(roi.center().x, 320.0, epsilon = 1e-3);
        assert_abs_diff_eq!(roi.center().y, 240.0, epsilon = 1e-3);
        // Landmarks span 128x288 pixels, padded by 30% per side and squared.
        assert_abs_diff_eq!(roi.rect().width(), 288.0 * 1.6, epsilon = 1e-3);
        assert_abs_diff_eq!(roi.rect().height(), 288.0 * 1.6, epsilon = 1e-3);
    }

    #[test]
    fn tracker_loses_unconfident_hand() {
        let mut tracker = RoiTracker::new();
        tracker.track(upright_hand(0.9), Resolution::RES_VGA);
        assert!(tracker.roi().is_some());

        assert!(tracker.track(upright_hand(0.2), Resolution::RES_VGA).is_none());
        assert_eq!(tracker.roi(), None);

        tracker.set_min_confidence(0.1);
        assert!(tracker.track(upright_hand(0.2), Resolution::RES_VGA).is_some());
    }

    #[test]
    fn tracker_roi_is_stable_for_still_hand() {
        let mut tracker = RoiTracker::new();
        tracker.track(upright_hand(0.9), Resolution::RES_VGA);
        let first = tracker.roi().unwrap();
        tracker.track(upright_hand(0.9), Resolution::RES_VGA);
        assert_eq!(tracker.roi(), Some(first));
    }

    #[test]
    fn tracker_rotates_roi_with_hand() {
        let mut positions = [[0.5, 0.5, 0.0]; NUM_LANDMARKS];
        positions[LandmarkIdx::Wrist as usize] = [0.4, 0.5, 0.0];
        positions[LandmarkIdx::MiddleFingerMcp as usize] = [0.5, 0.5, 0.0];
        let mut tracker = RoiTracker::new();
        tracker.track(HandLandmarks::new(positions, 1.0), Resolution::new(100, 100));

        // Fingers pointing right.
        let roi = tracker.roi().unwrap();
        assert_abs_diff_eq!(roi.rotation_radians(), FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn tracker_rejects_non_finite_landmarks() {
        let mut tracker = RoiTracker::new();
        tracker.track(upright_hand(0.9), Resolution::RES_VGA);

        let nan = HandLandmarks::new([[f32::NAN; 3]; NUM_LANDMARKS], 0.9);
        assert!(tracker.track(nan, Resolution::RES_VGA).is_none());
        assert_eq!(tracker.roi(), None);

        let nan_presence = HandLandmarks::new(*upright_hand(0.9).positions(), f32::NAN);
        assert!(tracker.track(nan_presence, Resolution::RES_VGA).is_none());
    }

    #[test]
    fn nan_network_output_is_no_hand() {
        let est = RawEstimate::extract(&outputs([f32::NAN; 3], 0.9)).unwrap();
        let frame = Resolution::RES_VGA;
        let hand = est.to_frame(frame.rect().into(), Resolution::new(224, 224), frame);
        let mut tracker = RoiTracker::new();
        assert!(tracker.track(hand, frame).is_none());
    }
}
