use std::fmt;

use bitflags::bitflags;

use crate::control::{DenoiseMode, Size};
use crate::device::Properties;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::FourCC;

/// Index of a stream within the active configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub usize);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// What a stream is used for, the device picks defaults based on this
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamRole {
    Viewfinder,
    StillCapture,
    VideoRecording,
    Raw,
}

/// Requested (and, after `Device::configure`, negotiated) stream parameters
///
/// Zero values mean "let the device choose".
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Logical name used for lookups, e.g. `viewfinder` or `lores`
    pub name: String,
    pub role: StreamRole,
    pub pixel_format: FourCC,
    pub size: Size,
    /// Bytes per row, filled in by the device
    pub stride: u32,
    pub buffer_count: u32,
}

impl StreamConfig {
    pub fn new(name: &str, role: StreamRole) -> Self {
        StreamConfig {
            name: name.to_string(),
            role,
            pixel_format: FourCC::YUV420,
            size: Size::default(),
            stride: 0,
            buffer_count: 0,
        }
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            width: self.size.width,
            height: self.size.height,
            stride: self.stride,
            pixel_format: self.pixel_format,
        }
    }
}

/// Dimensions of a configured stream
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixel_format: FourCC,
}

bitflags! {
    /// Variants of the still capture configuration
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
    pub struct StillFlags: u32 {
        const NONE              = 0;
        const BGR               = 0x0001;
        const RGB               = 0x0002;
        const RAW               = 0x0004;
        const DOUBLE_BUFFER     = 0x0008;
        const TRIPLE_BUFFER     = 0x0010;
        const BUFFER_MASK       = 0x0018;
    }
}

bitflags! {
    /// Variants of the video configuration
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
    pub struct VideoFlags: u32 {
        const NONE              = 0;
        const RAW               = 0x0001;
    }
}

/// A complete set of streams to configure together
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub streams: Vec<StreamConfig>,
    /// Noise reduction applied when the camera starts
    pub denoise: DenoiseMode,
    /// Still configurations run with the longest possible frame duration limits
    pub still: bool,
}

impl Configuration {
    /// Builds a configuration from explicit streams
    ///
    /// The first stream is the main one; concurrent streams must end up with the same buffer
    /// count.
    pub fn new(streams: Vec<StreamConfig>) -> Self {
        Configuration {
            streams,
            denoise: DenoiseMode::Minimal,
            still: false,
        }
    }

    /// Preview configuration: a YUV420 viewfinder plus an optional low resolution stream
    ///
    /// Without an explicit viewfinder size, half the sensor's first active area is used (most
    /// sensors have a 2x2 binned mode there), matched to the field of view of `width`/`height`
    /// when those are set. The result is trimmed to `preview_max_size` keeping its aspect ratio.
    pub fn viewfinder(options: &Options, properties: &Properties) -> Result<Self> {
        let mut main = StreamConfig::new("viewfinder", StreamRole::Viewfinder);
        main.size = viewfinder_size(options, properties);

        let mut streams = vec![main];
        if options.has_lores() {
            streams.push(lores_stream(options, &streams[0])?);
        }

        Ok(Configuration {
            streams,
            denoise: denoise_mode(&options.denoise, "cdn_off")?,
            still: false,
        })
    }

    /// Still capture configuration with an optional raw stream
    pub fn still(options: &Options, flags: StillFlags) -> Result<Self> {
        let mut main = StreamConfig::new("still", StreamRole::StillCapture);
        main.pixel_format = if flags.contains(StillFlags::BGR) {
            FourCC::BGR888
        } else if flags.contains(StillFlags::RGB) {
            FourCC::RGB888
        } else {
            FourCC::YUV420
        };
        let buffering = flags & StillFlags::BUFFER_MASK;
        if buffering == StillFlags::DOUBLE_BUFFER {
            main.buffer_count = 2;
        } else if buffering == StillFlags::TRIPLE_BUFFER {
            main.buffer_count = 3;
        }
        main.size = Size::new(options.width, options.height);

        let mut streams = vec![main];
        if flags.contains(StillFlags::RAW) {
            streams.push(raw_stream(options, &streams[0]));
        }

        Ok(Configuration {
            streams,
            denoise: denoise_mode(&options.denoise, "cdn_hq")?,
            still: true,
        })
    }

    /// Video configuration with optional raw and low resolution streams
    pub fn video(options: &Options, flags: VideoFlags) -> Result<Self> {
        let mut main = StreamConfig::new("video", StreamRole::VideoRecording);
        main.buffer_count = options.video_buffer_count;
        main.size = Size::new(options.width, options.height);

        let mut streams = vec![main];
        if flags.contains(VideoFlags::RAW) {
            streams.push(raw_stream(options, &streams[0]));
        }
        if options.has_lores() {
            let lores = lores_stream(options, &streams[0])?;
            streams.push(lores);
        }

        Ok(Configuration {
            streams,
            denoise: denoise_mode(&options.denoise, "cdn_fast")?,
            still: false,
        })
    }

    /// Checks the negotiated configuration for invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        let main = self
            .streams
            .first()
            .ok_or_else(|| Error::Configuration("no streams configured".to_string()))?;

        for stream in &self.streams[1..] {
            if stream.name == "lores" && !stream.size.fits_in(&main.size) {
                return Err(Error::Configuration(format!(
                    "low resolution stream {} larger than {} stream {}",
                    stream.size, main.name, main.size
                )));
            }
        }

        Ok(())
    }
}

fn viewfinder_size(options: &Options, properties: &Properties) -> Size {
    let mut size = Size::new(1280, 960);
    if options.viewfinder_width != 0 && options.viewfinder_height != 0 {
        size = Size::new(options.viewfinder_width, options.viewfinder_height);
    } else if let Some(area) = properties.pixel_array_active_areas.first() {
        let half = area.size();
        size = Size::new(half.width / 2, half.height / 2);
        if options.width != 0 && options.height != 0 {
            size = size.bounded_to_aspect_ratio(Size::new(options.width, options.height));
        }
        size = size.align_down_to(2, 2);
    }

    let max = options.preview_max_size;
    if !max.is_null() {
        size = size
            .bounded_to(max.bounded_to_aspect_ratio(size))
            .align_down_to(2, 2);
    }
    size
}

fn lores_stream(options: &Options, main: &StreamConfig) -> Result<StreamConfig> {
    let size = Size::new(options.lores_width, options.lores_height).align_down_to(2, 2);
    if !main.size.is_null() && !size.fits_in(&main.size) {
        return Err(Error::Configuration(format!(
            "low resolution image {} larger than {} {}",
            size, main.name, main.size
        )));
    }

    let mut lores = StreamConfig::new("lores", StreamRole::Viewfinder);
    lores.size = size;
    lores.buffer_count = main.buffer_count;
    Ok(lores)
}

fn raw_stream(options: &Options, main: &StreamConfig) -> StreamConfig {
    let mut raw = StreamConfig::new("raw", StreamRole::Raw);
    raw.pixel_format = FourCC::RAW;
    if !options.rawfull {
        raw.size = main.size;
    }
    raw.buffer_count = main.buffer_count;
    raw
}

fn denoise_mode(requested: &str, auto: &str) -> Result<DenoiseMode> {
    use std::convert::TryFrom;

    if requested == "auto" {
        DenoiseMode::try_from(auto)
    } else {
        DenoiseMode::try_from(requested)
    }
}
