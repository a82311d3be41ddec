//! Mouse pointer output.

use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};

/// Receives the pointer actions decided by the
/// [`Controller`][crate::controller::Controller].
///
/// Coordinates are in screen pixels, with the origin in the top-left corner of the main display.
pub trait CursorSink {
    /// Returns the width and height of the screen the pointer moves on.
    fn screen_size(&self) -> (u32, u32);

    /// Moves the pointer to an absolute position.
    fn move_to(&mut self, x: f32, y: f32) -> anyhow::Result<()>;

    /// Performs a left click at the current pointer position.
    fn click(&mut self) -> anyhow::Result<()>;
}

impl<S: CursorSink + ?Sized> CursorSink for Box<S> {
    fn screen_size(&self) -> (u32, u32) {
        (**self).screen_size()
    }

    fn move_to(&mut self, x: f32, y: f32) -> anyhow::Result<()> {
        (**self).move_to(x, y)
    }

    fn click(&mut self) -> anyhow::Result<()> {
        (**self).click()
    }
}

/// Clamps a position into a screen of size `size` and rounds it to whole pixels.
fn clamp_to_screen(x: f32, y: f32, size: (u32, u32)) -> (i32, i32) {
    let max_x = size.0.saturating_sub(1) as f32;
    let max_y = size.1.saturating_sub(1) as f32;
    (
        x.clamp(0.0, max_x).round() as i32,
        y.clamp(0.0, max_y).round() as i32,
    )
}

/// Controls the system mouse through [`enigo`].
pub struct EnigoCursor {
    enigo: Enigo,
    screen: (u32, u32),
}

impl EnigoCursor {
    /// Connects to the platform's input system and queries the size of the main display.
    pub fn new() -> anyhow::Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("failed to connect to the input system: {:?}", e))?;
        let (w, h) = enigo
            .main_display()
            .map_err(|e| anyhow::anyhow!("failed to query the display size: {:?}", e))?;
        let screen = (u32::try_from(w)?, u32::try_from(h)?);
        log::info!("screen size: {}x{}", screen.0, screen.1);

        Ok(Self { enigo, screen })
    }
}

impl CursorSink for EnigoCursor {
    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn move_to(&mut self, x: f32, y: f32) -> anyhow::Result<()> {
        let (x, y) = clamp_to_screen(x, y, self.screen);
        log::trace!("move pointer to ({}, {})", x, y);
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| anyhow::anyhow!("failed to move the pointer: {:?}", e))
    }

    fn click(&mut self) -> anyhow::Result<()> {
        log::debug!("click");
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| anyhow::anyhow!("failed to click: {:?}", e))
    }
}

/// A cursor that only logs what it would do.
#[derive(Debug)]
pub struct LogCursor {
    screen: (u32, u32),
    position: (i32, i32),
    clicks: u64,
}

impl LogCursor {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        log::info!(
            "dry run: simulating a {}x{} screen, the pointer will not move",
            screen_width,
            screen_height
        );
        Self {
            screen: (screen_width, screen_height),
            position: (0, 0),
            clicks: 0,
        }
    }

    /// Returns the last (clamped) pointer position.
    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn clicks(&self) -> u64 {
        self.clicks
    }
}

impl CursorSink for LogCursor {
    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn move_to(&mut self, x: f32, y: f32) -> anyhow::Result<()> {
        self.position = clamp_to_screen(x, y, self.screen);
        log::trace!("dry run: move pointer to {:?}", self.position);
        Ok(())
    }

    fn click(&mut self) -> anyhow::Result<()> {
        self.clicks += 1;
        log::info!("dry run: click #{} at {:?}", self.clicks, self.position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp() {
        assert_eq!(clamp_to_screen(-5.0, 20.4, (1920, 1080)), (0, 20));
        assert_eq!(clamp_to_screen(1920.0, 1080.0, (1920, 1080)), (1919, 1079));
        assert_eq!(clamp_to_screen(f32::INFINITY, 0.6, (1920, 1080)), (1919, 1));
    }

    #[test]
    fn log_cursor() {
        let mut cursor = LogCursor::new(800, 600);
        assert_eq!(cursor.screen_size(), (800, 600));
        cursor.move_to(900.0, 300.0).unwrap();
        assert_eq!(cursor.position(), (799, 300));
        cursor.click().unwrap();
        cursor.click().unwrap();
        assert_eq!(cursor.clicks(), 2);
    }
}
