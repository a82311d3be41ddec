//! Runtime configuration.
//!
//! There is no configuration file. [`Config::default`] holds the built-in settings, and
//! [`Config::from_env`] applies overrides from these environment variables:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `VIRTUAL_MOUSE_WEBCAM_NAME` | webcam to open, by name | first compatible |
//! | `VIRTUAL_MOUSE_WEBCAM_INDEX` | webcam to open, as `/dev/video<N>` | unset |
//! | `VIRTUAL_MOUSE_MODEL` | path to the hand landmark ONNX network | `3rdparty/onnx/hand_landmark_full.onnx` |
//! | `VIRTUAL_MOUSE_PALM_MODEL` | path to the palm detection ONNX network, `none` to search the whole frame | `3rdparty/onnx/palm_detection_full.onnx` |
//! | `VIRTUAL_MOUSE_MIN_CONFIDENCE` | minimum hand presence score | `0.5` |
//! | `VIRTUAL_MOUSE_FRAME_MARGIN` | distance of the active region from the frame edges, in pixels | `100` |
//! | `VIRTUAL_MOUSE_SMOOTHING` | smoothing divisor, `1` disables smoothing | `8` |
//! | `VIRTUAL_MOUSE_CLICK_DISTANCE` | fingertip distance below which a pinch clicks, in pixels | `45` |
//! | `VIRTUAL_MOUSE_CLICK_POLICY` | `once`, `every-frame` or `cooldown:<ms>` | `once` |
//! | `VIRTUAL_MOUSE_MIRROR` | mirror horizontal pointer movement | `true` |
//! | `VIRTUAL_MOUSE_DRY_RUN` | only log pointer actions | `false` |

use std::{
    env::{self, VarError},
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::bail;

use crate::click::{ClickPolicy, ClickTrigger};
use crate::hand::detector::HandDetector;
use crate::image::Resolution;

pub const ENV_WEBCAM_NAME: &str = "VIRTUAL_MOUSE_WEBCAM_NAME";
pub const ENV_WEBCAM_INDEX: &str = "VIRTUAL_MOUSE_WEBCAM_INDEX";
pub const ENV_MODEL: &str = "VIRTUAL_MOUSE_MODEL";
pub const ENV_PALM_MODEL: &str = "VIRTUAL_MOUSE_PALM_MODEL";
pub const ENV_MIN_CONFIDENCE: &str = "VIRTUAL_MOUSE_MIN_CONFIDENCE";
pub const ENV_FRAME_MARGIN: &str = "VIRTUAL_MOUSE_FRAME_MARGIN";
pub const ENV_SMOOTHING: &str = "VIRTUAL_MOUSE_SMOOTHING";
pub const ENV_CLICK_DISTANCE: &str = "VIRTUAL_MOUSE_CLICK_DISTANCE";
pub const ENV_CLICK_POLICY: &str = "VIRTUAL_MOUSE_CLICK_POLICY";
pub const ENV_MIRROR: &str = "VIRTUAL_MOUSE_MIRROR";
pub const ENV_DRY_RUN: &str = "VIRTUAL_MOUSE_DRY_RUN";

const DEFAULT_MODEL: &str = "3rdparty/onnx/hand_landmark_full.onnx";
const DEFAULT_PALM_MODEL: &str = "3rdparty/onnx/palm_detection_full.onnx";

/// Application settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    webcam_name: Option<String>,
    webcam_index: Option<u32>,
    model: PathBuf,
    palm_model: Option<PathBuf>,
    min_confidence: f32,
    frame_margin: u32,
    smoothing: f32,
    click_distance: f32,
    click_policy: ClickPolicy,
    mirror: bool,
    dry_run: bool,
    capture_resolution: Resolution,
    window_title: String,
    quit_key: char,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webcam_name: None,
            webcam_index: None,
            model: PathBuf::from(DEFAULT_MODEL),
            palm_model: Some(PathBuf::from(DEFAULT_PALM_MODEL)),
            min_confidence: HandDetector::DEFAULT_MIN_CONFIDENCE,
            frame_margin: 100,
            smoothing: 8.0,
            click_distance: ClickTrigger::DEFAULT_THRESHOLD,
            click_policy: ClickPolicy::OncePerPinch,
            mirror: true,
            dry_run: false,
            capture_resolution: Resolution::RES_VGA,
            window_title: "Webcam".into(),
            quit_key: 'x',
        }
    }
}

impl Config {
    /// Returns the default configuration, overridden by the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(s)) => bail!(
                "invalid value set for `{}` variable: {}",
                name,
                s.to_string_lossy()
            ),
        })
    }

    /// Returns the default configuration, overridden by the variables that `lookup` returns.
    ///
    /// `lookup` is called with each variable name and returns its value, or [`None`] if it is not
    /// set. Empty values count as unset.
    pub fn from_lookup<F>(mut lookup: F) -> anyhow::Result<Self>
    where
        F: FnMut(&str) -> anyhow::Result<Option<String>>,
    {
        let mut get = |name: &str| -> anyhow::Result<Option<String>> {
            Ok(lookup(name)?.filter(|v| !v.trim().is_empty()))
        };

        let mut config = Self::default();
        if let Some(name) = get(ENV_WEBCAM_NAME)? {
            config.webcam_name = Some(name);
        }
        if let Some(index) = get(ENV_WEBCAM_INDEX)? {
            config.webcam_index = Some(parse(ENV_WEBCAM_INDEX, &index)?);
        }
        if let Some(model) = get(ENV_MODEL)? {
            config.model = PathBuf::from(model);
        }
        if let Some(palm_model) = get(ENV_PALM_MODEL)? {
            config.palm_model = match palm_model.trim() {
                "none" => None,
                _ => Some(PathBuf::from(palm_model)),
            };
        }
        if let Some(conf) = get(ENV_MIN_CONFIDENCE)? {
            let conf: f32 = parse(ENV_MIN_CONFIDENCE, &conf)?;
            if !(0.0..=1.0).contains(&conf) {
                bail!("`{}` must be between 0 and 1, got {}", ENV_MIN_CONFIDENCE, conf);
            }
            config.min_confidence = conf;
        }
        if let Some(margin) = get(ENV_FRAME_MARGIN)? {
            config.frame_margin = parse(ENV_FRAME_MARGIN, &margin)?;
        }
        if let Some(smoothing) = get(ENV_SMOOTHING)? {
            let smoothing: f32 = parse(ENV_SMOOTHING, &smoothing)?;
            if smoothing.is_nan() || smoothing < 1.0 {
                bail!("`{}` must be at least 1, got {}", ENV_SMOOTHING, smoothing);
            }
            config.smoothing = smoothing;
        }
        if let Some(distance) = get(ENV_CLICK_DISTANCE)? {
            let distance: f32 = parse(ENV_CLICK_DISTANCE, &distance)?;
            if distance.is_nan() || distance <= 0.0 {
                bail!("`{}` must be positive, got {}", ENV_CLICK_DISTANCE, distance);
            }
            config.click_distance = distance;
        }
        if let Some(policy) = get(ENV_CLICK_POLICY)? {
            config.click_policy = parse(ENV_CLICK_POLICY, &policy)?;
        }
        if let Some(mirror) = get(ENV_MIRROR)? {
            config.mirror = parse_bool(ENV_MIRROR, &mirror)?;
        }
        if let Some(dry_run) = get(ENV_DRY_RUN)? {
            config.dry_run = parse_bool(ENV_DRY_RUN, &dry_run)?;
        }

        log::debug!("configuration: {:?}", config);
        Ok(config)
    }

    /// Selects the webcam by its name (as reported by the driver).
    pub fn webcam_name(self, name: impl Into<String>) -> Self {
        Self {
            webcam_name: Some(name.into()),
            ..self
        }
    }

    /// Selects the webcam at `/dev/video<index>`.
    pub fn webcam_index(self, index: u32) -> Self {
        Self {
            webcam_index: Some(index),
            ..self
        }
    }

    pub fn model(self, path: impl Into<PathBuf>) -> Self {
        Self {
            model: path.into(),
            ..self
        }
    }

    /// Sets the palm detection network, or disables palm detection with [`None`].
    pub fn palm_model(self, path: Option<PathBuf>) -> Self {
        Self {
            palm_model: path,
            ..self
        }
    }

    pub fn frame_margin(self, margin: u32) -> Self {
        Self {
            frame_margin: margin,
            ..self
        }
    }

    pub fn smoothing(self, divisor: f32) -> Self {
        Self {
            smoothing: divisor,
            ..self
        }
    }

    pub fn click_policy(self, policy: ClickPolicy) -> Self {
        Self {
            click_policy: policy,
            ..self
        }
    }

    pub fn mirror(self, mirror: bool) -> Self {
        Self { mirror, ..self }
    }

    pub fn dry_run(self, dry_run: bool) -> Self {
        Self { dry_run, ..self }
    }

    pub fn get_webcam_name(&self) -> Option<&str> {
        self.webcam_name.as_deref()
    }

    pub fn get_webcam_index(&self) -> Option<u32> {
        self.webcam_index
    }

    pub fn get_model(&self) -> &Path {
        &self.model
    }

    pub fn get_palm_model(&self) -> Option<&Path> {
        self.palm_model.as_deref()
    }

    pub fn get_min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn get_frame_margin(&self) -> u32 {
        self.frame_margin
    }

    pub fn get_smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn get_click_distance(&self) -> f32 {
        self.click_distance
    }

    pub fn get_click_policy(&self) -> ClickPolicy {
        self.click_policy
    }

    pub fn get_mirror(&self) -> bool {
        self.mirror
    }

    pub fn get_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn capture_resolution(&self) -> Resolution {
        self.capture_resolution
    }

    pub fn window_title(&self) -> &str {
        &self.window_title
    }

    pub fn quit_key(&self) -> char {
        self.quit_key
    }
}

fn parse<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| {
        anyhow::anyhow!(
            "invalid value set for `{}` variable: '{}' ({})",
            name,
            value,
            e
        )
    })
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => bail!("invalid value set for `{}` variable: '{}'", name, value),
    }
}
