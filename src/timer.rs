//! Frame rate and performance measurement.

use std::{
    cell::Cell,
    fmt::{self, Arguments},
    mem,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::filter::{Ema, EmaState, Filter};

const EMA_ALPHA: f32 = 0.3;

/// A timer that can measure and average the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    ema: Ema,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    ema_state: EmaState,
    /// The current average time in seconds.
    avg: f32,
    /// The number of time measurements that contributed to the current `avg`.
    count: usize,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ema: Ema::new(EMA_ALPHA),
            state: Mutex::new(State::default()),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    fn stop(&self, start: Instant) {
        let duration = start.elapsed();
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.avg = self
            .ema
            .filter(&mut state.ema_state, duration.as_secs_f32());
        state.count += 1;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.ema_state = EmaState::default();

        let avg = mem::replace(&mut state.avg, 0.0);
        let len = mem::replace(&mut state.count, 0);
        let avg_ms = avg * 1000.0;

        write!(f, "{}: {len}x{avg_ms:.01}ms", self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Logs frames per second with optional extra data.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS if one second has passed.
    pub fn tick(&mut self) {
        self.tick_impl(format_args!(""));
    }

    /// Advances the frame counter by 1 and logs FPS and `extra` data if one second has passed.
    pub fn tick_with<D: fmt::Display, I: IntoIterator<Item = D>>(&mut self, extra: I) {
        struct DisplayExtra<D: fmt::Display, I: Iterator<Item = D>>(Cell<Option<I>>);

        impl<D: fmt::Display, I: Iterator<Item = D>> fmt::Display for DisplayExtra<D, I> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let Some(mut iter) = self.0.take() else {
                    return Ok(());
                };
                if let Some(first) = iter.next() {
                    write!(f, " ({first}")?;
                    for item in iter {
                        write!(f, ", {item}")?;
                    }
                    f.write_str(")")?;
                }
                Ok(())
            }
        }

        self.tick_impl(format_args!(
            "{}",
            DisplayExtra(Cell::new(Some(extra.into_iter())))
        ));
    }

    fn tick_impl(&mut self, args: Arguments<'_>) {
        self.frames += 1;
        if self.start.elapsed() > Duration::from_secs(1) {
            log::debug!("{}: {} FPS{}", self.name, self.frames, args);

            self.frames = 0;
            self.start = Instant::now();
        }
    }
}

/// Instantaneous frame rate, computed from the interval between two consecutive frames.
///
/// This is what gets drawn onto the preview window. Unlike [`FpsCounter`], it updates every frame.
#[derive(Debug, Default)]
pub struct FrameRate {
    last: Option<Instant>,
    fps: Option<f32>,
}

impl FrameRate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame captured at `now` and returns the current frame rate.
    ///
    /// Returns [`None`] until two frames with distinct timestamps have been recorded. If `now` is
    /// not later than the previous timestamp, the previously computed rate is returned unchanged.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        if let Some(last) = self.last {
            let secs = now.saturating_duration_since(last).as_secs_f32();
            if secs > 0.0 {
                self.fps = Some(1.0 / secs);
            }
        }
        self.last = Some(now);
        self.fps
    }

    /// Returns the most recently computed frame rate.
    pub fn get(&self) -> Option<f32> {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn frame_rate_needs_two_frames() {
        let mut rate = FrameRate::new();
        assert_eq!(rate.tick(Instant::now()), None);
    }

    #[test]
    fn frame_rate_from_interval() {
        let start = Instant::now();
        let mut rate = FrameRate::new();
        rate.tick(start);
        let fps = rate.tick(start + Duration::from_millis(40)).unwrap();
        assert_relative_eq!(fps, 25.0, epsilon = 0.01);
    }

    #[test]
    fn frame_rate_zero_interval() {
        let start = Instant::now();
        let mut rate = FrameRate::new();
        assert_eq!(rate.tick(start), None);
        assert_eq!(rate.tick(start), None);

        let later = start + Duration::from_millis(20);
        let fps = rate.tick(later).unwrap();
        assert_relative_eq!(fps, 50.0, epsilon = 0.01);
        assert_eq!(rate.tick(later), Some(fps));
        assert_eq!(rate.get(), Some(fps));
    }

    #[test]
    fn timer_display_resets() {
        let timer = Timer::new("work");
        timer.time(|| ());
        timer.time(|| ());
        assert!(timer.to_string().starts_with("work: 2x"));
        assert!(timer.to_string().starts_with("work: 0x"));
    }
}
