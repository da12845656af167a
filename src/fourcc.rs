use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    repr: [u8; 4],
}

impl FourCC {
    /// Planar YUV 4:2:0, the only format the preview path accepts
    pub const YUV420: FourCC = FourCC { repr: *b"YU12" };
    /// Packed 24-bit RGB
    pub const RGB888: FourCC = FourCC { repr: *b"RGB3" };
    /// Packed 24-bit BGR
    pub const BGR888: FourCC = FourCC { repr: *b"BGR3" };
    /// Unpacked sensor data
    pub const RAW: FourCC = FourCC { repr: *b"RAW " };

    #[allow(clippy::trivially_copy_pass_by_ref)]
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::FourCC;
    /// let fourcc = FourCC::new(b"YU12");
    /// assert_eq!(fourcc, FourCC::YUV420);
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the raw bytes
    pub fn repr(&self) -> [u8; 4] {
        self.repr
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = str::from_utf8(&self.repr);
        if let Ok(string) = string {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        u32::from_le_bytes(fourcc.repr)
    }
}
