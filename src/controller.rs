//! Per-frame gesture decisions.
//!
//! The [`Controller`] turns the landmarks of one frame into pointer actions on a [`CursorSink`].

use std::time::Instant;

use nalgebra::Point2;

use crate::click::{distance, ClickTrigger};
use crate::cursor::CursorSink;
use crate::hand::detector::LandmarkDetector;
use crate::hand::gesture::{fingers_up, FingerStates, Mode};
use crate::hand::landmark::{LandmarkIdx, LandmarkList};
use crate::image::{draw, Color, Image, Rect};
use crate::mapping::{ActiveRegion, CursorMapper, Smoother};

/// Drives a [`CursorSink`] from hand landmarks.
pub struct Controller<S> {
    cursor: S,
    mapper: CursorMapper,
    smoother: Smoother,
    trigger: ClickTrigger,
    mirror: bool,
    mode: Mode,
}

impl<S: CursorSink> Controller<S> {
    /// Creates a controller mapping `region` onto the screen of `cursor`.
    ///
    /// Horizontal mirroring is enabled by default, see [`Controller::set_mirror`].
    pub fn new(
        cursor: S,
        region: ActiveRegion,
        smoother: Smoother,
        trigger: ClickTrigger,
    ) -> Self {
        let (w, h) = cursor.screen_size();
        Self {
            mapper: CursorMapper::new(region, w as f32, h as f32),
            cursor,
            smoother,
            trigger,
            mirror: true,
            mode: Mode::Idle,
        }
    }

    /// Sets whether horizontal pointer movement is mirrored.
    ///
    /// Webcam frames show the user as seen from the camera, so moving the hand to the right moves
    /// it to the left in the image. Mirroring makes the pointer follow the hand instead.
    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    /// Returns the mode selected in the last [`Controller::update`].
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn region(&self) -> ActiveRegion {
        self.mapper.region()
    }

    pub fn cursor(&self) -> &S {
        &self.cursor
    }

    pub fn into_cursor(self) -> S {
        self.cursor
    }

    /// Runs `detector` on `image` and processes the first hand it finds.
    pub fn process_frame<D: LandmarkDetector + ?Sized>(
        &mut self,
        detector: &mut D,
        image: &Image,
        now: Instant,
    ) -> anyhow::Result<FrameReport> {
        let hands = detector.detect(image)?;
        if hands.len() > 1 {
            log::trace!("{} hands detected, using the first", hands.len());
        }
        let hand = hands.first().map(|hand| hand.to_pixels(image.resolution()));
        self.update(hand.as_ref(), now)
    }

    /// Processes the landmarks of one frame.
    ///
    /// `hand` is [`None`] when no hand was detected. `now` is the capture time of the frame and is
    /// used for click rate limiting.
    pub fn update(
        &mut self,
        hand: Option<&LandmarkList>,
        now: Instant,
    ) -> anyhow::Result<FrameReport> {
        let mut report = FrameReport {
            region: self.mapper.region().rect(),
            hand: hand.cloned(),
            mode: Mode::Idle,
            fingers: None,
            index_tip: None,
            middle_tip: None,
            cursor: None,
            pinch_distance: None,
            clicked: false,
        };

        let Some(hand) = hand else {
            self.trigger.release();
            self.set_mode(Mode::Idle);
            return Ok(report);
        };

        let fingers = fingers_up(hand);
        let mode = Mode::from_fingers(fingers);
        let index_tip = hand.point(LandmarkIdx::IndexFingerTip);
        let middle_tip = hand.point(LandmarkIdx::MiddleFingerTip);
        report.mode = mode;
        report.fingers = Some(fingers);
        report.index_tip = Some(index_tip);
        report.middle_tip = Some(middle_tip);
        self.set_mode(mode);

        match mode {
            Mode::Move => {
                self.trigger.release();
                let target = self.mapper.map(index_tip.x as f32, index_tip.y as f32);
                let (x, y) = self.smoother.step(target);
                let x = if self.mirror {
                    self.mapper.screen_size().0 - x
                } else {
                    x
                };
                self.cursor.move_to(x, y)?;
                report.cursor = Some((x, y));
            }
            Mode::Click => {
                let d = distance(index_tip, middle_tip);
                report.pinch_distance = Some(d);
                if self.trigger.update(self.trigger.is_pinched(d), now) {
                    log::debug!("pinch distance {:.1}px, clicking", d);
                    self.cursor.click()?;
                    report.clicked = true;
                }
            }
            Mode::Idle => self.trigger.release(),
        }

        Ok(report)
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            log::debug!("mode: {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }
}

/// What the [`Controller`] saw and did in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// The active region, in frame coordinates.
    pub region: Rect,
    /// The landmarks the decisions were based on.
    pub hand: Option<LandmarkList>,
    pub mode: Mode,
    /// [`None`] if no hand was detected.
    pub fingers: Option<FingerStates>,
    pub index_tip: Option<Point2<i32>>,
    pub middle_tip: Option<Point2<i32>>,
    /// Where the pointer was moved to (only in [`Mode::Move`]).
    pub cursor: Option<(f32, f32)>,
    /// Distance between index and middle fingertip (only in [`Mode::Click`]).
    pub pinch_distance: Option<f32>,
    pub clicked: bool,
}

impl FrameReport {
    /// Annotates `image` with the hand skeleton, the active region, and the fingertips that drove
    /// this frame.
    pub fn draw(&self, image: &mut Image) {
        if let Some(hand) = &self.hand {
            hand.draw(image);
        }
        draw::rect(image, self.region)
            .color(Color::GREEN)
            .stroke_width(4);

        match (self.mode, self.index_tip, self.middle_tip) {
            (Mode::Move, Some(tip), _) => {
                draw::circle(image, tip.x, tip.y, 15)
                    .color(Color::MAGENTA)
                    .filled();
            }
            (Mode::Click, Some(a), Some(b)) => {
                draw::line(image, (a.x, a.y), (b.x, b.y))
                    .color(Color::GREEN)
                    .stroke_width(3);
                for p in [a, b] {
                    draw::circle(image, p.x, p.y, 15).color(Color::RED).filled();
                }
                let mid = Point2::new((a.x + b.x) / 2, (a.y + b.y) / 2);
                let color = if self.clicked {
                    Color::GREEN
                } else {
                    Color::MAGENTA
                };
                draw::circle(image, mid.x, mid.y, 15).color(color).filled();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_relative_eq;

    use super::*;
    use crate::click::ClickPolicy;
    use crate::hand::landmark::NUM_LANDMARKS;
    use crate::image::Resolution;

    #[derive(Debug, PartialEq)]
    enum Action {
        Move(f32, f32),
        Click,
    }

    #[derive(Default)]
    struct Recorder {
        actions: Vec<Action>,
    }

    impl CursorSink for Recorder {
        fn screen_size(&self) -> (u32, u32) {
            (1920, 1080)
        }

        fn move_to(&mut self, x: f32, y: f32) -> anyhow::Result<()> {
            self.actions.push(Action::Move(x, y));
            Ok(())
        }

        fn click(&mut self) -> anyhow::Result<()> {
            self.actions.push(Action::Click);
            Ok(())
        }
    }

    /// A hand with the index finger at `index` and the middle finger at `middle`. A finger is up
    /// when its tip is above y=300.
    fn hand(index: (i32, i32), middle: (i32, i32)) -> LandmarkList {
        let mut points = [(0, 0); NUM_LANDMARKS];
        for (id, p) in points.iter_mut().enumerate() {
            // Joints sit at y=300, tips of folded fingers below them.
            *p = (200 + id as i32, if id % 4 == 0 { 320 } else { 300 });
        }
        points[LandmarkIdx::IndexFingerTip as usize] = index;
        points[LandmarkIdx::MiddleFingerTip as usize] = middle;
        LandmarkList::new(points)
    }

    fn controller(policy: ClickPolicy, divisor: f32) -> Controller<Recorder> {
        Controller::new(
            Recorder::default(),
            ActiveRegion::with_margin(Resolution::RES_VGA, 100).unwrap(),
            Smoother::new(divisor).unwrap(),
            ClickTrigger::new(policy, 45.0),
        )
    }

    #[test]
    fn no_hand_is_idle() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        let report = c.update(None, Instant::now()).unwrap();
        assert_eq!(report.mode, Mode::Idle);
        assert_eq!(report.fingers, None);
        assert!(c.cursor().actions.is_empty());
    }

    #[test]
    fn move_is_smoothed_and_mirrored() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        // (540, 380) maps to the bottom-right corner of the screen.
        let report = c
            .update(Some(&hand((540, 100), (300, 350))), Instant::now())
            .unwrap();
        assert_eq!(report.mode, Mode::Move);
        let (x, y) = report.cursor.unwrap();
        assert_relative_eq!(x, 1920.0 - 240.0);
        assert_relative_eq!(y, 0.0);
        assert_eq!(c.cursor().actions, [Action::Move(x, y)]);

        c.set_mirror(false);
        let report = c
            .update(Some(&hand((540, 100), (300, 350))), Instant::now())
            .unwrap();
        let (x, _) = report.cursor.unwrap();
        assert_relative_eq!(x, 240.0 + (1920.0 - 240.0) / 8.0);
    }

    #[test]
    fn pinch_clicks_once() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        let now = Instant::now();
        let pinched = hand((300, 100), (330, 100));

        let report = c.update(Some(&pinched), now).unwrap();
        assert_eq!(report.mode, Mode::Click);
        assert_eq!(report.pinch_distance, Some(30.0));
        assert!(report.clicked);
        let report = c.update(Some(&pinched), now).unwrap();
        assert!(!report.clicked);

        // Spreading the fingers releases the pinch.
        let spread = hand((300, 100), (400, 100));
        let report = c.update(Some(&spread), now).unwrap();
        assert_eq!(report.pinch_distance, Some(100.0));
        assert!(!report.clicked);

        assert!(c.update(Some(&pinched), now).unwrap().clicked);
        assert_eq!(c.cursor().actions, [Action::Click, Action::Click]);
    }

    #[test]
    fn every_frame_policy() {
        let mut c = controller(ClickPolicy::EveryFrame, 8.0);
        let pinched = hand((300, 100), (330, 100));
        let now = Instant::now();
        for i in 0..3 {
            let report = c
                .update(Some(&pinched), now + Duration::from_millis(i * 33))
                .unwrap();
            assert!(report.clicked);
        }
        assert_eq!(c.cursor().actions.len(), 3);
    }

    #[test]
    fn losing_hand_releases_pinch() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        let pinched = hand((300, 100), (330, 100));
        let now = Instant::now();
        assert!(c.update(Some(&pinched), now).unwrap().clicked);
        c.update(None, now).unwrap();
        assert_eq!(c.mode(), Mode::Idle);
        assert!(c.update(Some(&pinched), now).unwrap().clicked);
    }

    #[test]
    fn index_down_is_idle() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        let report = c
            .update(Some(&hand((300, 350), (330, 100))), Instant::now())
            .unwrap();
        assert_eq!(report.mode, Mode::Idle);
        assert!(report.fingers.is_some());
        assert!(c.cursor().actions.is_empty());
    }

    #[test]
    fn draw_report() {
        let mut c = controller(ClickPolicy::OncePerPinch, 8.0);
        let report = c
            .update(Some(&hand((300, 200), (330, 200))), Instant::now())
            .unwrap();
        let mut image = Image::new(640, 480);
        report.draw(&mut image);
        assert_eq!(image.get(100, 100), Color::GREEN);
        assert_eq!(image.get(315, 200), Color::GREEN);
        assert_eq!(image.get(300, 190), Color::RED);
    }
}
