use std::time::Instant;

use virtual_mouse::click::ClickTrigger;
use virtual_mouse::config::Config;
use virtual_mouse::controller::Controller;
use virtual_mouse::cursor::{CursorSink, EnigoCursor, LogCursor};
use virtual_mouse::gui::{self, Event};
use virtual_mouse::hand::detector::HandDetector;
use virtual_mouse::hand::palm::PalmDetector;
use virtual_mouse::image::{draw, Color};
use virtual_mouse::mapping::{ActiveRegion, Smoother};
use virtual_mouse::timer::{FpsCounter, FrameRate};
use virtual_mouse::video::webcam::{Webcam, WebcamOptions};

/// Screen size reported by the pointer in dry-run mode.
const DRY_RUN_SCREEN: (u32, u32) = (1920, 1080);

fn main() {
    virtual_mouse::init_logger!();
    virtual_mouse::run(app);
}

fn app() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let mut options = WebcamOptions::default().resolution(config.capture_resolution());
    if let Some(name) = config.get_webcam_name() {
        options = options.name(name);
    }
    if let Some(index) = config.get_webcam_index() {
        options = options.index(index);
    }
    let mut webcam = Webcam::open(options)?;

    let mut detector = HandDetector::load(config.get_model())?;
    match config.get_palm_model() {
        Some(path) => detector = detector.with_palm_detector(PalmDetector::load(path)?),
        None => log::info!("palm detection disabled, searching the whole frame for hands"),
    }
    detector.set_min_confidence(config.get_min_confidence());

    let cursor: Box<dyn CursorSink> = if config.get_dry_run() {
        Box::new(LogCursor::new(DRY_RUN_SCREEN.0, DRY_RUN_SCREEN.1))
    } else {
        Box::new(EnigoCursor::new()?)
    };
    let region = ActiveRegion::with_margin(webcam.resolution(), config.get_frame_margin())?;
    let mut controller = Controller::new(
        cursor,
        region,
        Smoother::new(config.get_smoothing())?,
        ClickTrigger::new(config.get_click_policy(), config.get_click_distance()),
    );
    controller.set_mirror(config.get_mirror());

    log::info!(
        "click policy: {}, press '{}' in the preview window to quit",
        config.get_click_policy(),
        config.quit_key()
    );

    let mut frame_rate = FrameRate::new();
    let mut fps = FpsCounter::new("virtual-mouse");
    loop {
        let mut image = webcam.read()?;
        let now = Instant::now();

        let report = controller.process_frame(&mut detector, &image, now)?;
        report.draw(&mut image);

        let rate = frame_rate.tick(now).map_or(0, |fps| fps as u32);
        draw::text(&mut image, 20, 40, &format!("Frame : {}", rate))
            .color(Color::GREEN)
            .large()
            .align_left();
        gui::show_image(config.window_title(), &image);

        fps.tick_with(webcam.timers().chain(detector.timers()));

        while let Some(event) = gui::poll_event() {
            match event {
                Event::KeyPressed(key) if key == config.quit_key() => {
                    log::info!("quit key pressed, exiting");
                    return Ok(());
                }
                Event::WindowClosed(_) => {
                    log::info!("window closed, exiting");
                    return Ok(());
                }
                Event::KeyPressed(_) => {}
            }
        }
    }
}
