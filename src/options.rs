use crate::control::{Rectangle, Size};

/// Region of interest, each component a fraction of the sensor crop area
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Roi {
    pub fn is_set(&self) -> bool {
        self.width != 0.0 && self.height != 0.0
    }

    /// Scales the region onto `area`, keeping the area's origin
    pub fn apply(&self, area: &Rectangle) -> Rectangle {
        Rectangle::new(
            (self.x * area.width as f32) as i32,
            (self.y * area.height as f32) as i32,
            (self.width * area.width as f32) as u32,
            (self.height * area.height as f32) as u32,
        )
        .translated_by(area.x, area.y)
    }
}

/// Application settings consumed by the pipeline
///
/// How these get filled (command line, config file, ..) is up to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub verbose: bool,
    /// Overlay template for the preview, see [`FrameInfo::format`](crate::FrameInfo::format)
    pub info_text: String,
    /// Size of the main still/video stream, zero for the device default
    pub width: u32,
    pub height: u32,
    pub viewfinder_width: u32,
    pub viewfinder_height: u32,
    pub lores_width: u32,
    pub lores_height: u32,
    /// Raw stream at full sensor resolution instead of the main stream's size
    pub rawfull: bool,
    pub framerate: f32,
    /// Exposure time in microseconds
    pub shutter: i64,
    pub gain: f32,
    pub ev: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
    pub awb_gain_r: f32,
    pub awb_gain_b: f32,
    pub metering_index: i32,
    pub exposure_index: i32,
    pub awb_index: i32,
    /// `auto` or one of `off`, `cdn_off`, `cdn_fast`, `cdn_hq`
    pub denoise: String,
    pub roi: Roi,
    /// Buffers per stream for video configurations
    pub video_buffer_count: u32,
    /// Largest image the preview can show, zero for unbounded
    pub preview_max_size: Size,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            verbose: false,
            info_text: String::from("#%frame (%fps fps) exp %exp ag %ag dg %dg"),
            width: 0,
            height: 0,
            viewfinder_width: 0,
            viewfinder_height: 0,
            lores_width: 0,
            lores_height: 0,
            rawfull: false,
            framerate: 0.0,
            shutter: 0,
            gain: 0.0,
            ev: 0.0,
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            sharpness: 1.0,
            awb_gain_r: 0.0,
            awb_gain_b: 0.0,
            metering_index: 0,
            exposure_index: 0,
            awb_index: 0,
            denoise: String::from("auto"),
            roi: Roi::default(),
            video_buffer_count: 6,
            preview_max_size: Size::default(),
        }
    }
}

impl Options {
    pub fn has_lores(&self) -> bool {
        self.lores_width != 0 && self.lores_height != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_is_translated_into_crop_area() {
        let roi = Roi {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
        };
        let area = Rectangle::new(16, 8, 4000, 3000);
        assert_eq!(roi.apply(&area), Rectangle::new(1016, 758, 2000, 1500));
    }
}
