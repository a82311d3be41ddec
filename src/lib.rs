//! Hand-gesture mouse control.
//!
//! A webcam frame is passed to a hand landmark network, the resulting landmarks are classified
//! into a small set of gestures, and the gestures drive the system mouse pointer:
//!
//! * Index finger up, middle finger down: the pointer follows the index fingertip.
//! * Index and middle finger up: bringing both fingertips together performs a left click.
//!
//! Landmarks come from anything implementing [`LandmarkDetector`][hand::detector::LandmarkDetector],
//! and pointer output goes to anything implementing [`CursorSink`][cursor::CursorSink], so the
//! decision logic in [`controller`] can be driven by synthetic data.
//!
//! # Coordinates
//!
//! Frame coordinates have their origin in the top-left corner of the camera image, X points to
//! the right and Y points *down*. Landmarks reported by detectors are normalized to `0.0..=1.0`
//! relative to the frame size; [`LandmarkList`][hand::landmark::LandmarkList] holds them in
//! integer pixel coordinates.
//!
//! # Environment Variables
//!
//! All runtime configuration is done via environment variables, see [`config::Config`] for the
//! full list. `RUST_LOG` is honored by the logger set up with [`init_logger!`].

pub mod click;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod filter;
pub mod gui;
pub mod hand;
pub mod image;
pub mod mapping;
pub mod nn;
pub mod termination;
pub mod timer;
pub mod video;

use log::LevelFilter;

pub use gui::run;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `wgpu` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
