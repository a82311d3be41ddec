//! Axis-aligned and rotated rectangles.

use std::fmt;

use nalgebra::{Point2, Rotation2, Vector2};

use super::AspectRatio;

/// An axis-aligned rectangle in pixel coordinates.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Point2<f32>,
    size: Vector2<f32>,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Point2::new(x_center, y_center),
            size: Vector2::new(width, height),
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self::from_center(
            top_left_x + width * 0.5,
            top_left_y + height * 0.5,
            width,
            height,
        )
    }

    /// Creates a rectangle spanning from its top-left to its bottom-right corner.
    ///
    /// # Panics
    ///
    /// Panics if `bottom_right` lies above or to the left of `top_left`.
    pub fn from_corners(top_left: (f32, f32), bottom_right: (f32, f32)) -> Self {
        Self::span_inner(top_left.0, top_left.1, bottom_right.0, bottom_right.1)
    }

    /// Computes the bounding rectangle that encompasses `points`.
    ///
    /// Points with a NaN or infinite coordinate are ignored. Returns [`None`] if no finite point
    /// is left.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter().filter(|p| is_finite(p));

        let [x, y] = iter.next()?;
        let (mut min, mut max) = (Point2::new(x, y), Point2::new(x, y));

        for [x, y] in iter {
            min = Point2::new(min.x.min(x), min.y.min(y));
            max = Point2::new(max.x.max(x), max.y.max(y));
        }

        Some(Self::span_inner(min.x, min.y, max.x, max.y))
    }

    fn span_inner(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        assert!(x_min <= x_max, "x_min={}, x_max={}", x_min, x_max);
        assert!(y_min <= y_max, "y_min={}, y_max={}", y_min, y_max);
        Self::from_top_left(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    /// Grows this rectangle by adding a margin relative to width and height.
    ///
    /// `amount` is the relative amount of the rectangles width and height to add to each side.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        Rect {
            size: self.size * (1.0 + 2.0 * amount),
            ..*self
        }
    }

    /// Symmetrically extends one dimension of `self` so that the resulting rectangle has the given
    /// aspect ratio.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target_aspect: AspectRatio) -> Self {
        let mut res = *self;
        let target_width = self.height() * target_aspect.as_f32();
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / target_aspect.as_f32();
        }

        res
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.center.x - self.size.x * 0.5
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    /// Returns the X coordinate of the right side of the rectangle.
    #[inline]
    pub fn x_end(&self) -> f32 {
        self.x() + self.width()
    }

    /// Returns the Y coordinate of the bottom side of the rectangle.
    #[inline]
    pub fn y_end(&self) -> f32 {
        self.y() + self.height()
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.center
    }
}

/// A [`Rect`], rotated clockwise around its center.
///
/// The angle is measured in the image coordinate system, where Y points down, so a positive angle
/// turns the rectangle's top edge towards the right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Computes the rectangle with rotation `radians` that tightly encloses `points`.
    ///
    /// Points with a NaN or infinite coordinate are ignored. Returns [`None`] if no finite point
    /// is left.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(radians: f32, points: I) -> Option<Self> {
        let rot = Rotation2::new(radians);
        let mut iter = points
            .into_iter()
            .filter(|p| is_finite(p))
            .map(|[x, y]| rot.inverse_transform_vector(&Vector2::new(x, y)));

        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for p in iter {
            min = min.inf(&p);
            max = max.sup(&p);
        }

        // The center is found in the rotated frame and then rotated back.
        let center = rot * ((min + max) * 0.5);
        let size = max - min;
        Some(Self::new(
            Rect::from_center(center.x, center.y, size.x, size.y),
            radians,
        ))
    }

    /// Returns the underlying non-rotated rectangle.
    #[inline]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Returns the clockwise rotation in radians.
    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.rect.center()
    }

    /// Applies a closure to the underlying non-rotated [`Rect`].
    #[must_use]
    pub fn map(self, f: impl FnOnce(Rect) -> Rect) -> Self {
        Self {
            rect: f(self.rect),
            ..self
        }
    }

    /// Grows this rectangle by adding a margin relative to width and height.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.map(|rect| rect.grow_rel(amount))
    }

    /// Symmetrically extends one dimension of `self` so that it has the given aspect ratio.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target_aspect: AspectRatio) -> Self {
        self.map(|rect| rect.grow_to_fit_aspect(target_aspect))
    }

    /// Transforms a point from the rectangle's own coordinate system into the parent system.
    ///
    /// The origin of the rectangle's coordinate system is its top left corner, before rotation.
    pub fn transform_out(&self, x: f32, y: f32) -> Point2<f32> {
        let half = self.rect.size * 0.5;
        let rel = Vector2::new(x, y) - half;
        self.rect.center + Rotation2::new(self.radians) * rel
    }
}

fn is_finite([x, y]: &[f32; 2]) -> bool {
    x.is_finite() && y.is_finite()
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}
