use std::{fmt, time};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Sensor timestamp in nanoseconds (usually set by the driver at start of exposure)
pub struct Timestamp {
    pub nsec: u64,
}

impl Timestamp {
    /// Returns a timestamp representation
    ///
    /// # Arguments
    ///
    /// * `nsec` - Nanoseconds on the sensor's monotonic clock
    ///
    /// # Example
    ///
    /// ```
    /// use framepipe::Timestamp;
    /// let ts = Timestamp::new(33_333_333);
    /// assert_eq!(ts.as_micros(), 33_333);
    /// ```
    pub fn new(nsec: u64) -> Self {
        Timestamp { nsec }
    }

    /// Microseconds, as expected by encoders
    pub fn as_micros(&self) -> i64 {
        (self.nsec / 1000) as i64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let floating: f64 = self.nsec as f64 / 1_000_000_000.0;
        write!(f, "{} [s]", floating)
    }
}

impl From<time::Duration> for Timestamp {
    fn from(duration: time::Duration) -> Self {
        Timestamp::new(duration.as_nanos() as u64)
    }
}

impl From<Timestamp> for time::Duration {
    fn from(ts: Timestamp) -> Self {
        time::Duration::from_nanos(ts.nsec)
    }
}
