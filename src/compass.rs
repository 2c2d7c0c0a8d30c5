use crate::types::{OrientationMatrix, RawFd};
use std::io;

/// Magnetometer driver collaborator.
///
/// Integrated compasses deliver their samples inside the main motion
/// stream; standalone ones are read through `read_sample`. Compass
/// calibration algorithms live behind this trait and report their results
/// through `CallbackHandle::update_calibration`.
pub trait CompassSensor: Send {
    /// A magnetometer is attached.
    fn is_present(&self) -> bool;

    /// Samples arrive as COMPASS records in the motion stream.
    fn is_integrated(&self) -> bool;

    fn enable(&mut self, on: bool) -> io::Result<()>;

    fn set_delay(&mut self, ns: i64) -> io::Result<()>;

    /// Next pending sample as chip-frame counts plus timestamp.
    fn read_sample(&mut self) -> io::Result<Option<([i32; 3], i64)>>;

    fn fd(&self) -> Option<RawFd> {
        None
    }

    /// µT per LSB.
    fn sensitivity(&self) -> f32;

    fn orientation(&self) -> OrientationMatrix {
        OrientationMatrix::IDENTITY
    }

    fn chip_name(&self) -> &str;

    /// Full range in µT.
    fn max_range(&self) -> f32;
}

/// Stand-in for boards without a magnetometer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompass;

impl CompassSensor for NoCompass {
    fn is_present(&self) -> bool {
        false
    }

    fn is_integrated(&self) -> bool {
        false
    }

    fn enable(&mut self, _on: bool) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no compass attached"))
    }

    fn set_delay(&mut self, _ns: i64) -> io::Result<()> {
        Ok(())
    }

    fn read_sample(&mut self) -> io::Result<Option<([i32; 3], i64)>> {
        Ok(None)
    }

    fn sensitivity(&self) -> f32 {
        0.0
    }

    fn chip_name(&self) -> &str {
        "none"
    }

    fn max_range(&self) -> f32 {
        0.0
    }
}

/// Compass whose samples ride the motion stream (secondary I2C slave of
/// the motion chip).
#[derive(Debug, Clone)]
pub struct IntegratedCompass {
    name: String,
    sensitivity: f32,
    max_range: f32,
    orientation: OrientationMatrix,
    enabled: bool,
    delay_ns: i64,
}

impl IntegratedCompass {
    pub fn new(name: impl Into<String>, sensitivity: f32, max_range: f32) -> Self {
        Self {
            name: name.into(),
            sensitivity,
            max_range,
            orientation: OrientationMatrix::IDENTITY,
            enabled: false,
            delay_ns: 0,
        }
    }

    /// AK8975-class magnetometer, 0.3 µT/LSB over ±1229 µT.
    pub fn ak8975() -> Self {
        Self::new("AK8975", 0.3, 1229.0)
    }

    pub fn with_orientation(mut self, orientation: OrientationMatrix) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay_ns(&self) -> i64 {
        self.delay_ns
    }
}

impl CompassSensor for IntegratedCompass {
    fn is_present(&self) -> bool {
        true
    }

    fn is_integrated(&self) -> bool {
        true
    }

    fn enable(&mut self, on: bool) -> io::Result<()> {
        self.enabled = on;
        Ok(())
    }

    fn set_delay(&mut self, ns: i64) -> io::Result<()> {
        self.delay_ns = ns;
        Ok(())
    }

    fn read_sample(&mut self) -> io::Result<Option<([i32; 3], i64)>> {
        Ok(None)
    }

    fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    fn orientation(&self) -> OrientationMatrix {
        self.orientation
    }

    fn chip_name(&self) -> &str {
        &self.name
    }

    fn max_range(&self) -> f32 {
        self.max_range
    }
}
