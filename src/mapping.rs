//! Mapping from camera coordinates to screen coordinates.

use crate::image::{Rect, Resolution};

/// Linearly maps `value` from the range `from` onto the range `to`.
///
/// Values outside of `from` are clamped to the ends of `to`.
pub fn interp(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let (x0, x1) = from;
    let (y0, y1) = to;
    if value <= x0 {
        return y0;
    }
    if value >= x1 {
        return y1;
    }
    y0 + (value - x0) * (y1 - y0) / (x1 - x0)
}

/// The part of the camera frame that is mapped onto the whole screen.
///
/// Keeping a margin to the frame edges lets the fingertip reach the screen edges while the rest of
/// the hand is still in view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveRegion {
    rect: Rect,
}

impl ActiveRegion {
    /// Creates an active region `margin` pixels away from each edge of a frame of size `frame`.
    ///
    /// Returns an error if the margin leaves no usable area.
    pub fn with_margin(frame: Resolution, margin: u32) -> anyhow::Result<Self> {
        if margin.saturating_mul(2) >= frame.width() || margin.saturating_mul(2) >= frame.height()
        {
            anyhow::bail!("frame margin of {}px is too large for {} frames", margin, frame);
        }
        let m = margin as f32;
        Ok(Self {
            rect: Rect::from_corners(
                (m, m),
                (frame.width() as f32 - m, frame.height() as f32 - m),
            ),
        })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }
}

/// Maps points in the [`ActiveRegion`] to screen coordinates.
#[derive(Debug, Clone, Copy)]
pub struct CursorMapper {
    region: ActiveRegion,
    screen: (f32, f32),
}

impl CursorMapper {
    pub fn new(region: ActiveRegion, screen_width: f32, screen_height: f32) -> Self {
        Self {
            region,
            screen: (screen_width, screen_height),
        }
    }

    pub fn region(&self) -> ActiveRegion {
        self.region
    }

    pub fn screen_size(&self) -> (f32, f32) {
        self.screen
    }

    /// Maps a frame position to a screen position.
    ///
    /// The top-left corner of the active region maps to `(0, 0)`, the bottom-right corner maps to
    /// `(screen_width, screen_height)`. Points outside of the region are clamped.
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        let r = self.region.rect;
        (
            interp(x, (r.x(), r.x_end()), (0.0, self.screen.0)),
            interp(y, (r.y(), r.y_end()), (0.0, self.screen.1)),
        )
    }
}

/// Moves a point a fixed fraction of the way towards its target on each step.
///
/// Larger divisors give a steadier but more sluggish cursor. The state starts at `(0, 0)`.
#[derive(Debug, Clone)]
pub struct Smoother {
    divisor: f32,
    prev: (f32, f32),
}

impl Smoother {
    /// Creates a smoother; a divisor of 1 disables smoothing.
    ///
    /// Returns an error if `divisor` is less than 1 (or NaN).
    pub fn new(divisor: f32) -> anyhow::Result<Self> {
        if divisor.is_nan() || divisor < 1.0 {
            anyhow::bail!("smoothing divisor must be at least 1, got {}", divisor);
        }
        Ok(Self {
            divisor,
            prev: (0.0, 0.0),
        })
    }

    pub fn divisor(&self) -> f32 {
        self.divisor
    }

    /// Returns the last smoothed position.
    pub fn position(&self) -> (f32, f32) {
        self.prev
    }

    /// Advances towards `target` and returns the new smoothed position.
    pub fn step(&mut self, target: (f32, f32)) -> (f32, f32) {
        let (px, py) = self.prev;
        let cur = (
            px + (target.0 - px) / self.divisor,
            py + (target.1 - py) / self.divisor,
        );
        log::trace!("smoothing {:?} -> {:?} (target {:?})", self.prev, cur, target);
        self.prev = cur;
        cur
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn mapper() -> CursorMapper {
        let region = ActiveRegion::with_margin(Resolution::RES_VGA, 100).unwrap();
        CursorMapper::new(region, 1920.0, 1080.0)
    }

    #[test]
    fn interp_clamps() {
        assert_eq!(interp(5.0, (0.0, 10.0), (0.0, 100.0)), 50.0);
        assert_eq!(interp(-5.0, (0.0, 10.0), (0.0, 100.0)), 0.0);
        assert_eq!(interp(15.0, (0.0, 10.0), (0.0, 100.0)), 100.0);
    }

    #[test]
    fn active_region() {
        let region = ActiveRegion::with_margin(Resolution::RES_VGA, 100).unwrap();
        assert_eq!(region.rect(), Rect::from_corners((100.0, 100.0), (540.0, 380.0)));

        assert!(ActiveRegion::with_margin(Resolution::RES_VGA, 240).is_err());
        assert!(ActiveRegion::with_margin(Resolution::RES_VGA, 0).is_ok());
    }

    #[test]
    fn map_corners() {
        let mapper = mapper();
        assert_eq!(mapper.map(100.0, 100.0), (0.0, 0.0));
        assert_eq!(mapper.map(540.0, 380.0), (1920.0, 1080.0));
        let (x, y) = mapper.map(320.0, 240.0);
        assert_relative_eq!(x, 960.0);
        assert_relative_eq!(y, 540.0);
    }

    #[test]
    fn map_clamps_outside() {
        let mapper = mapper();
        assert_eq!(mapper.map(0.0, 0.0), (0.0, 0.0));
        assert_eq!(mapper.map(639.0, 479.0), (1920.0, 1080.0));
        assert_eq!(mapper.map(600.0, 100.0), (1920.0, 0.0));
    }

    #[test]
    fn smoothing() {
        let mut smoother = Smoother::new(8.0).unwrap();
        assert_eq!(smoother.step((800.0, 0.0)), (100.0, 0.0));
        assert_eq!(smoother.position(), (100.0, 0.0));
        let (x, _) = smoother.step((800.0, 0.0));
        assert_relative_eq!(x, 187.5);
    }

    #[test]
    fn smoothing_converges() {
        let mut smoother = Smoother::new(3.0).unwrap();
        for _ in 0..200 {
            smoother.step((500.0, 250.0));
        }
        let (x, y) = smoother.position();
        assert_relative_eq!(x, 500.0, epsilon = 1e-3);
        assert_relative_eq!(y, 250.0, epsilon = 1e-3);
    }

    #[test]
    fn divisor_one_disables_smoothing() {
        let mut smoother = Smoother::new(1.0).unwrap();
        assert_eq!(smoother.step((42.0, 7.0)), (42.0, 7.0));
    }

    #[test]
    fn invalid_divisor() {
        assert!(Smoother::new(0.5).is_err());
        assert!(Smoother::new(0.0).is_err());
        assert!(Smoother::new(f32::NAN).is_err());
    }
}
