use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Width and height of an image or sensor area
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    pub fn is_null(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Rounds both dimensions down to the given alignment
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::Size;
    /// assert_eq!(Size::new(641, 481).align_down_to(2, 2), Size::new(640, 480));
    /// ```
    pub fn align_down_to(self, h_align: u32, v_align: u32) -> Self {
        Size {
            width: self.width / h_align * h_align,
            height: self.height / v_align * v_align,
        }
    }

    /// Whether this size fits inside `other` in both dimensions
    pub fn fits_in(&self, other: &Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Clamps each dimension to `bound`
    pub fn bounded_to(self, bound: Size) -> Self {
        Size {
            width: self.width.min(bound.width),
            height: self.height.min(bound.height),
        }
    }

    /// Largest size within this one that has the aspect ratio of `ratio`
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::Size;
    /// let size = Size::new(2028, 1520).bounded_to_aspect_ratio(Size::new(1920, 1080));
    /// assert_eq!(size, Size::new(2028, 1140));
    /// ```
    pub fn bounded_to_aspect_ratio(self, ratio: Size) -> Self {
        if ratio.is_null() {
            return self;
        }
        let scaled_width = self.width as u64 * ratio.height as u64;
        let scaled_height = ratio.width as u64 * self.height as u64;
        if scaled_width > scaled_height {
            Size {
                width: (scaled_height / ratio.height as u64) as u32,
                height: self.height,
            }
        } else {
            Size {
                width: self.width,
                height: (scaled_width / ratio.width as u64) as u32,
            }
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Rectangle on the sensor pixel array
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rectangle {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Moves the rectangle by the given offset
    pub fn translated_by(self, x: i32, y: i32) -> Self {
        Rectangle {
            x: self.x + x,
            y: self.y + y,
            ..self
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})/{}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Identifiers of the controls the pipeline sets or reads back
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlId {
    ScalerCrop,
    FrameDurationLimits,
    ExposureTime,
    AnalogueGain,
    DigitalGain,
    AeMeteringMode,
    AeExposureMode,
    AeLocked,
    ExposureValue,
    AwbMode,
    ColourGains,
    Brightness,
    Contrast,
    Saturation,
    Sharpness,
    NoiseReductionMode,
    FocusFoM,
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Control payload
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Bool(bool),
    Integer(i32),
    Integer64(i64),
    Float(f32),
    /// Pair of 64-bit values, used for min/max limits
    Integer64Pair(i64, i64),
    /// Pair of floats, used for red/blue gains
    FloatPair(f32, f32),
    Rectangle(Rectangle),
}

impl ControlValue {
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            ControlValue::Float(v) => Some(v),
            ControlValue::Integer(v) => Some(v as f32),
            ControlValue::Integer64(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ControlValue::Integer(v) => Some(v as i64),
            ControlValue::Integer64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ControlValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(v) => write!(f, "{}", v),
            ControlValue::Integer(v) => write!(f, "{}", v),
            ControlValue::Integer64(v) => write!(f, "{}", v),
            ControlValue::Float(v) => write!(f, "{}", v),
            ControlValue::Integer64Pair(a, b) => write!(f, "[{}, {}]", a, b),
            ControlValue::FloatPair(a, b) => write!(f, "[{}, {}]", a, b),
            ControlValue::Rectangle(r) => write!(f, "{}", r),
        }
    }
}

/// Ordered set of control values
///
/// Used both for controls the application wants applied with the next request and for the
/// metadata the device reports back with a completed request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ControlList {
    values: BTreeMap<ControlId, ControlValue>,
}

impl ControlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: ControlId, value: ControlValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: ControlId) -> Option<&ControlValue> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: ControlId) -> bool {
        self.values.contains_key(&id)
    }

    /// Sets `id` only if the list does not carry a value for it yet
    pub fn set_default(&mut self, id: ControlId, value: ControlValue) {
        self.values.entry(id).or_insert(value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControlId, &ControlValue)> {
        self.values.iter()
    }
}

/// Noise reduction modes selectable at configure time
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DenoiseMode {
    Off         = 0,
    Fast        = 1,
    HighQuality = 2,
    Minimal     = 3,
}

impl TryFrom<&str> for DenoiseMode {
    type Error = Error;

    fn try_from(name: &str) -> Result<Self> {
        match name {
            "off" => Ok(DenoiseMode::Off),
            "cdn_off" => Ok(DenoiseMode::Minimal),
            "cdn_fast" => Ok(DenoiseMode::Fast),
            "cdn_hq" => Ok(DenoiseMode::HighQuality),
            _ => Err(Error::Configuration(format!("invalid denoise mode {}", name))),
        }
    }
}

impl From<DenoiseMode> for ControlValue {
    fn from(mode: DenoiseMode) -> Self {
        ControlValue::Integer(mode as i32)
    }
}
