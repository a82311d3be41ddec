//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::{error::Error, fmt, path::PathBuf};

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::image::{Image, Resolution};
use crate::timer::Timer;

/// Whether to keep the requested resolution or frame rate when the camera can't deliver both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamPreference {
    #[default]
    Resolution,
    Framerate,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<Resolution>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Selects and configures the webcam to open.
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    index: Option<u32>,
    frame: FramePrefs,
}

impl WebcamOptions {
    /// Opens the webcam whose driver reports the card name `name`.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Opens `/dev/video<index>` instead of searching all devices.
    ///
    /// If a [`name`](Self::name) is set as well, the device at `index` must also have that name.
    pub fn index(self, index: u32) -> Self {
        Self {
            index: Some(index),
            ..self
        }
    }

    /// Sets the desired frame size.
    ///
    /// The smallest supported size that is at least as large is selected. If there is none, the
    /// largest supported size is used instead.
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.frame.resolution = Some(resolution);
        self
    }

    /// Sets the desired minimum frame rate.
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects which of resolution and frame rate to give up first.
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

/// Error returned by [`Webcam::open`] when no matching webcam could be opened.
///
/// This is carried inside the returned [`anyhow::Error`] and can be retrieved with
/// [`anyhow::Error::downcast_ref`].
#[derive(Debug)]
pub struct DeviceUnavailable {
    device: String,
    reason: String,
}

impl DeviceUnavailable {
    fn new(device: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns a description of the device that was requested.
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl fmt::Display for DeviceUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "webcam unavailable ({}): {}", self.device, self.reason)
    }
}

impl Error for DeviceUnavailable {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

impl FrameFormat {
    fn fps(&self) -> f32 {
        (1.0 / self.frame_interval.as_f32()).round()
    }
}

fn supported_formats(device: &Device) -> anyhow::Result<(Pixelformat, Vec<FrameFormat>)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if [Pixelformat::JPEG, Pixelformat::MJPG].contains(&format.pixelformat()) {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }
    let Some(pixel_format) = pixel_format else {
        bail!("device does not support JPEG or MJPG capture");
    };

    let FrameSizes::Discrete(sizes) = device.frame_sizes(pixel_format)? else {
        bail!("stepwise or continuous resolutions are not supported");
    };
    let mut formats = Vec::new();
    for size in sizes {
        let FrameIntervals::Discrete(intervals) =
            device.frame_intervals(pixel_format, size.width(), size.height())?
        else {
            bail!("stepwise or continuous frame rates are not supported");
        };
        for interval in intervals {
            formats.push(FrameFormat {
                resolution: Resolution::new(size.width(), size.height()),
                frame_interval: *interval.fract(),
            });
        }
    }

    Ok((pixel_format, formats))
}

/// Picks a format from `formats`, relaxing `prefs` until one matches.
///
/// The less preferred parameter is dropped first.
fn negotiate_format(formats: &[FrameFormat], mut prefs: FramePrefs) -> Option<FrameFormat> {
    loop {
        if let Some(fmt) = negotiate_format_step(formats, prefs) {
            return Some(fmt);
        }

        log::debug!("no format matches {:?}", prefs);
        let dropped = match prefs.pref {
            ParamPreference::Resolution => {
                prefs.fps.take().is_some() || prefs.resolution.take().is_some()
            }
            ParamPreference::Framerate => {
                prefs.resolution.take().is_some() || prefs.fps.take().is_some()
            }
        };
        if !dropped {
            return None;
        }
    }
}

fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let mut eligible = formats
        .iter()
        .filter(|fmt| {
            let res_ok = prefs.resolution.map_or(true, |res| {
                fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
            });
            let fps_ok = prefs.fps.map_or(true, |fps| fmt.fps() >= fps as f32);
            res_ok && fps_ok
        })
        .copied()
        .collect::<Vec<_>>();

    // Closest to the requested size if there is one, largest otherwise.
    let size_key = |fmt: &FrameFormat| -> i64 {
        let pixels = fmt.resolution.num_pixels() as i64;
        if prefs.resolution.is_some() {
            -pixels
        } else {
            pixels
        }
    };
    match prefs.pref {
        ParamPreference::Resolution => {
            eligible.sort_by_key(|fmt| (size_key(fmt), fmt.fps() as u32))
        }
        ParamPreference::Framerate => {
            eligible.sort_by_key(|fmt| (fmt.fps() as u32, size_key(fmt)))
        }
    }
    eligible.last().copied()
}

/// Describes why a device that opened fine was still skipped by [`Webcam::open_device`].
fn mismatch_reason(options: &WebcamOptions) -> String {
    match &options.name {
        Some(name) => format!("not a video capture device named '{}'", name),
        None => "not a video capture device".to_string(),
    }
}

/// A webcam yielding a stream of [`Image`]s.
///
/// The device is released when this is dropped.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the webcam selected by `options`.
    ///
    /// Without a name or index, the first device that supports MJPG capture is opened. With both,
    /// only the device at the index is tried, and it must match the name. This can block for a
    /// few hundred milliseconds while the camera initializes.
    ///
    /// Failure to find or open a matching device is reported as [`DeviceUnavailable`].
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        if let Some(index) = options.index {
            let path = PathBuf::from(format!("/dev/video{}", index));
            let device = path.display().to_string();
            let dev = Device::open(&path).map_err(|e| DeviceUnavailable::new(&*device, e))?;
            return match Self::open_device(dev, &options) {
                Ok(Some(webcam)) => Ok(webcam),
                Ok(None) => Err(DeviceUnavailable::new(device, mismatch_reason(&options)).into()),
                Err(e) => Err(DeviceUnavailable::new(device, e).into()),
            };
        }

        let devices = linuxvideo::list().map_err(|e| DeviceUnavailable::new("any", e))?;
        for res in devices {
            match res {
                Ok(dev) => match Self::open_device(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => log::debug!("{:#}", e),
                },
                Err(e) => log::warn!("{}", e),
            }
        }

        let device = match &options.name {
            Some(name) => format!("'{}'", name),
            None => "any".to_string(),
        };
        Err(DeviceUnavailable::new(device, "no supported webcam device found").into())
    }

    fn open_device(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if let Some(name) = &options.name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );
        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixel_format, formats) = supported_formats(&dev)?;
        let Some(fmt) = negotiate_format(&formats, options.frame) else {
            bail!("failed to negotiate a format for {}", path.display());
        };
        let capture = dev.video_capture(PixFormat::new(
            fmt.resolution.width(),
            fmt.resolution.height(),
            pixel_format,
        ))?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        let actual = capture.set_frame_interval(fmt.frame_interval)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        Ok(Some(Self {
            stream: capture.into_stream(2)?,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Returns the size of the captured frames.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Blocks until the next frame is available and returns it.
    ///
    /// Frames that fail to decode are logged and replaced by a blank frame, so that a single
    /// corrupted frame does not end the stream.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let dequeue_guard = self.t_dequeue.start();
        let res = self.resolution;
        let t_decode = &self.t_decode;
        let image = self.stream.dequeue(|buf| {
            drop(dequeue_guard);
            let image = t_decode
                .time(|| Image::decode_jpeg(&buf))
                .unwrap_or_else(|e| {
                    log::error!("webcam decode error: {}", e);
                    Image::new(res.width(), res.height())
                });
            Ok(image)
        })?;
        Ok(image)
    }

    /// Returns profiling timers for webcam access and decoding.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue, &self.t_decode].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            resolution: Resolution::new(w, h),
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            fmt(1920, 1080, 30),
            fmt(1280, 720, 30),
            fmt(1280, 720, 60),
            fmt(640, 480, 30),
            fmt(640, 480, 15),
            fmt(320, 240, 60),
        ]
    }

    fn prefs(
        resolution: Option<Resolution>,
        fps: Option<u32>,
        pref: ParamPreference,
    ) -> FramePrefs {
        FramePrefs {
            resolution,
            fps,
            pref,
        }
    }

    #[test]
    fn picks_closest_resolution() {
        let p = prefs(Some(Resolution::RES_VGA), None, ParamPreference::Resolution);
        assert_eq!(negotiate_format_step(&formats(), p), Some(fmt(640, 480, 30)));

        let p = prefs(Some(Resolution::new(800, 600)), None, ParamPreference::Resolution);
        assert_eq!(negotiate_format_step(&formats(), p), Some(fmt(1280, 720, 60)));
    }

    #[test]
    fn without_resolution_picks_largest() {
        let p = prefs(None, None, ParamPreference::Resolution);
        assert_eq!(negotiate_format_step(&formats(), p), Some(fmt(1920, 1080, 30)));

        let p = prefs(None, None, ParamPreference::Framerate);
        assert_eq!(negotiate_format_step(&formats(), p), Some(fmt(1280, 720, 60)));
    }

    #[test]
    fn fps_filter() {
        let p = prefs(Some(Resolution::RES_VGA), Some(60), ParamPreference::Resolution);
        assert_eq!(negotiate_format_step(&formats(), p), Some(fmt(1280, 720, 60)));
    }

    #[test]
    fn relaxes_preferences() {
        // Nothing delivers 4K, and nothing delivers 120 FPS.
        let p = prefs(
            Some(Resolution::new(3840, 2160)),
            Some(120),
            ParamPreference::Resolution,
        );
        assert_eq!(negotiate_format_step(&formats(), p), None);
        assert_eq!(negotiate_format(&formats(), p), Some(fmt(1920, 1080, 30)));

        let p = prefs(Some(Resolution::RES_VGA), Some(120), ParamPreference::Framerate);
        assert_eq!(negotiate_format(&formats(), p), Some(fmt(1280, 720, 60)));

        assert_eq!(negotiate_format(&[], p), None);
    }

    #[test]
    fn device_unavailable_is_downcastable() {
        let err: anyhow::Error = DeviceUnavailable::new("/dev/video9", "No such file").into();
        let inner = err.downcast_ref::<DeviceUnavailable>().unwrap();
        assert_eq!(inner.device(), "/dev/video9");
        assert_eq!(err.to_string(), "webcam unavailable (/dev/video9): No such file");
    }

    #[test]
    fn open_missing_index_is_device_unavailable() {
        let Err(err) = Webcam::open(WebcamOptions::default().index(987)) else {
            panic!("/dev/video987 should not exist");
        };
        let inner = err.downcast_ref::<DeviceUnavailable>();
        assert!(inner.is_some(), "{:#}", err);
        assert_eq!(inner.unwrap().device(), "/dev/video987");
    }

    #[test]
    fn mismatch_names_the_filter() {
        let options = WebcamOptions::default().index(0).name("Integrated Camera");
        let reason = mismatch_reason(&options);
        assert!(reason.contains("'Integrated Camera'"), "{}", reason);

        let reason = mismatch_reason(&WebcamOptions::default().index(0));
        assert_eq!(reason, "not a video capture device");
    }
}
