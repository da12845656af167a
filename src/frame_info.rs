use crate::capture::CompletedCapture;
use crate::control::{ControlId, ControlList, ControlValue};

/// Per frame values shown in the preview overlay
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub sequence: u64,
    pub fps: f32,
    /// Exposure time in microseconds
    pub exposure_time: f32,
    pub analogue_gain: f32,
    pub digital_gain: f32,
    /// Red and blue gains
    pub colour_gains: [f32; 2],
    /// Focus figure of merit
    pub focus: f32,
    pub ae_locked: bool,
}

impl Default for FrameInfo {
    fn default() -> Self {
        FrameInfo {
            sequence: 0,
            fps: 0.0,
            exposure_time: 0.0,
            analogue_gain: 0.0,
            digital_gain: 0.0,
            colour_gains: [0.0, 0.0],
            focus: 0.0,
            ae_locked: false,
        }
    }
}

const TOKENS: [&str; 9] = [
    "%frame", "%fps", "%exp", "%ag", "%dg", "%rg", "%bg", "%focus", "%aelock",
];

impl FrameInfo {
    /// Extracts the values reported in capture metadata, missing ones stay at zero
    pub fn new(metadata: &ControlList) -> Self {
        let float = |id| metadata.get(id).and_then(ControlValue::as_f32).unwrap_or(0.0);

        let colour_gains = match metadata.get(ControlId::ColourGains) {
            Some(ControlValue::FloatPair(r, b)) => [*r, *b],
            _ => [0.0, 0.0],
        };

        FrameInfo {
            exposure_time: float(ControlId::ExposureTime),
            analogue_gain: float(ControlId::AnalogueGain),
            digital_gain: float(ControlId::DigitalGain),
            colour_gains,
            focus: float(ControlId::FocusFoM),
            ae_locked: metadata
                .get(ControlId::AeLocked)
                .and_then(ControlValue::as_bool)
                .unwrap_or(false),
            ..FrameInfo::default()
        }
    }

    pub fn from_capture(capture: &CompletedCapture) -> Self {
        FrameInfo {
            sequence: capture.sequence(),
            fps: capture.framerate(),
            ..FrameInfo::new(capture.metadata())
        }
    }

    /// Expands the `%` placeholders of `template`
    ///
    /// Known placeholders are `%frame`, `%fps`, `%exp`, `%ag`, `%dg`, `%rg`, `%bg`, `%focus`
    /// and `%aelock`. Anything else is copied unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::FrameInfo;
    ///
    /// let info = FrameInfo { sequence: 12, fps: 29.97, ..FrameInfo::default() };
    /// assert_eq!(info.format("#%frame (%fps fps)"), "#12 (29.97 fps)");
    /// ```
    pub fn format(&self, template: &str) -> String {
        let mut parsed = template.to_string();
        for token in TOKENS.iter() {
            if parsed.contains(token) {
                parsed = parsed.replace(token, &self.value_of(token));
            }
        }
        parsed
    }

    fn value_of(&self, token: &str) -> String {
        match token {
            "%frame" => self.sequence.to_string(),
            "%fps" => format!("{:.2}", self.fps),
            "%exp" => format!("{:.2}", self.exposure_time),
            "%ag" => format!("{:.2}", self.analogue_gain),
            "%dg" => format!("{:.2}", self.digital_gain),
            "%rg" => format!("{:.2}", self.colour_gains[0]),
            "%bg" => format!("{:.2}", self.colour_gains[1]),
            "%focus" => format!("{:.2}", self.focus),
            "%aelock" => u8::from(self.ae_locked).to_string(),
            _ => token.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_extracted() {
        let mut metadata = ControlList::new();
        metadata.set(ControlId::ExposureTime, ControlValue::Integer(10000));
        metadata.set(ControlId::AnalogueGain, ControlValue::Float(2.0));
        metadata.set(ControlId::ColourGains, ControlValue::FloatPair(1.5, 1.8));
        metadata.set(ControlId::AeLocked, ControlValue::Bool(true));

        let info = FrameInfo::new(&metadata);
        assert_eq!(info.exposure_time, 10000.0);
        assert_eq!(info.analogue_gain, 2.0);
        assert_eq!(info.digital_gain, 0.0);
        assert_eq!(info.colour_gains, [1.5, 1.8]);
        assert!(info.ae_locked);
    }

    #[test]
    fn every_placeholder_is_expanded() {
        let info = FrameInfo {
            sequence: 4,
            fps: 30.0,
            exposure_time: 100.0,
            analogue_gain: 1.0,
            digital_gain: 1.25,
            colour_gains: [1.5, 1.75],
            focus: 99.0,
            ae_locked: true,
        };

        assert_eq!(
            info.format("%frame %fps %exp %ag %dg %rg %bg %focus %aelock %other"),
            "4 30.00 100.00 1.00 1.25 1.50 1.75 99.00 1 %other"
        );
    }
}
