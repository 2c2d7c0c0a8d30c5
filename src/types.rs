use crate::{MplError, Result};

/// Number of logical sensor types.
pub const NUM_SENSORS: usize = 11;

/// Standard gravity in m/s².
pub const GRAVITY_EARTH: f32 = 9.80665;

/// File descriptor handed to the framework's poll loop, -1 when absent.
pub type RawFd = std::os::raw::c_int;

/// Accuracy ranks attached to events (framework status values).
pub const ACCURACY_UNRELIABLE: i8 = 0;
pub const ACCURACY_LOW: i8 = 1;
pub const ACCURACY_MEDIUM: i8 = 2;
pub const ACCURACY_HIGH: i8 = 3;

/// Logical sensor types exposed to the framework.
///
/// The discriminant is both the framework handle and the index into every
/// per-type table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorType {
    Gyro = 0,
    RawGyro = 1,
    Accelerometer = 2,
    MagneticField = 3,
    RawMagneticField = 4,
    Orientation = 5,
    RotationVector = 6,
    GameRotationVector = 7,
    LinearAccel = 8,
    Gravity = 9,
    SignificantMotion = 10,
}

impl SensorType {
    pub const ALL: [SensorType; NUM_SENSORS] = [
        SensorType::Gyro,
        SensorType::RawGyro,
        SensorType::Accelerometer,
        SensorType::MagneticField,
        SensorType::RawMagneticField,
        SensorType::Orientation,
        SensorType::RotationVector,
        SensorType::GameRotationVector,
        SensorType::LinearAccel,
        SensorType::Gravity,
        SensorType::SignificantMotion,
    ];

    /// Resolve a framework handle.
    pub fn from_handle(handle: i32) -> Result<SensorType> {
        usize::try_from(handle)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(MplError::InvalidHandle(handle))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn handle(self) -> i32 {
        self as i32
    }

    pub fn mask(self) -> SensorMask {
        SensorMask::from_bits_retain(1 << self.index())
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorType::Gyro => "Gyro",
            SensorType::RawGyro => "RawGyro",
            SensorType::Accelerometer => "Accelerometer",
            SensorType::MagneticField => "MagneticField",
            SensorType::RawMagneticField => "RawMagneticField",
            SensorType::Orientation => "Orientation",
            SensorType::RotationVector => "RotationVector",
            SensorType::GameRotationVector => "GameRotationVector",
            SensorType::LinearAccel => "LinearAccel",
            SensorType::Gravity => "Gravity",
            SensorType::SignificantMotion => "SignificantMotion",
        }
    }

    /// Framework sensor type id (`SENSOR_TYPE_*`).
    pub fn framework_type(self) -> i32 {
        match self {
            SensorType::Accelerometer => 1,
            SensorType::MagneticField => 2,
            SensorType::Orientation => 3,
            SensorType::Gyro => 4,
            SensorType::Gravity => 9,
            SensorType::LinearAccel => 10,
            SensorType::RotationVector => 11,
            SensorType::RawMagneticField => 14,
            SensorType::GameRotationVector => 15,
            SensorType::RawGyro => 16,
            SensorType::SignificantMotion => 17,
        }
    }

    /// One-shot sensors disarm themselves after their first event.
    pub fn is_one_shot(self) -> bool {
        self == SensorType::SignificantMotion
    }
}

bitflags::bitflags! {
    /// One bit per logical sensor type, bit index == `SensorType` index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(C)]
    pub struct SensorMask: u32 {
        const GYRO                 = 1 << 0;
        const RAW_GYRO             = 1 << 1;
        const ACCELEROMETER        = 1 << 2;
        const MAGNETIC_FIELD       = 1 << 3;
        const RAW_MAGNETIC_FIELD   = 1 << 4;
        const ORIENTATION          = 1 << 5;
        const ROTATION_VECTOR      = 1 << 6;
        const GAME_ROTATION_VECTOR = 1 << 7;
        const LINEAR_ACCEL         = 1 << 8;
        const GRAVITY              = 1 << 9;
        const SIGNIFICANT_MOTION   = 1 << 10;
    }
}

impl SensorMask {
    /// Iterate the enabled types in index order.
    pub fn types(self) -> impl Iterator<Item = SensorType> {
        SensorType::ALL.into_iter().filter(move |t| self.contains(t.mask()))
    }
}

bitflags::bitflags! {
    /// Physical sensing engines; each engine owns its per-axis bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(C)]
    pub struct HardwareMask: u32 {
        const GYRO     = 0x000F;
        const ACCEL    = 0x0070;
        const COMPASS  = 0x0380;
        const PRESSURE = 0x0400;
    }
}

bitflags::bitflags! {
    /// DMP capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(C)]
    pub struct FeatureMask: u32 {
        /// Low-power quaternion (3 elements, 32 bit).
        const QUATERNION          = 0x01;
        const DISPL_ORIENTATION   = 0x02;
        const SIGNIFICANT_MOTION  = 0x04;
        const PEDOMETER           = 0x08;
        /// Full 6-axis quaternion (3 elements, 32 bit).
        const SIX_AXIS_QUATERNION = 0x10;
        /// Pedometer quaternion (3 elements, 16 bit).
        const PED_QUATERNION      = 0x20;
        /// Accel data with step header.
        const ACCEL_PED           = 0x40;
        const BATCH_MODE          = 0x80;
    }
}

/// Features that can be armed on the DMP.
pub const DMP_FEATURE_MASK: FeatureMask = FeatureMask::QUATERNION
    .union(FeatureMask::DISPL_ORIENTATION)
    .union(FeatureMask::SIGNIFICANT_MOTION)
    .union(FeatureMask::PEDOMETER)
    .union(FeatureMask::SIX_AXIS_QUATERNION)
    .union(FeatureMask::PED_QUATERNION)
    .union(FeatureMask::BATCH_MODE);

/// DMP features that surface as sensors of their own.
pub const DMP_SENSOR_MASK: FeatureMask = FeatureMask::DISPL_ORIENTATION
    .union(FeatureMask::SIGNIFICANT_MOTION)
    .union(FeatureMask::PEDOMETER)
    .union(FeatureMask::SIX_AXIS_QUATERNION);

/// Physical engines that carry calibration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalSensor {
    Gyro,
    Accel,
    Compass,
}

impl PhysicalSensor {
    pub fn hardware(self) -> HardwareMask {
        match self {
            PhysicalSensor::Gyro => HardwareMask::GYRO,
            PhysicalSensor::Accel => HardwareMask::ACCEL,
            PhysicalSensor::Compass => HardwareMask::COMPASS,
        }
    }
}

/// Chip-to-device axis mapping, row-major 3x3 of -1/0/1 entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationMatrix([i8; 9]);

impl OrientationMatrix {
    pub const IDENTITY: OrientationMatrix = OrientationMatrix([1, 0, 0, 0, 1, 0, 0, 0, 1]);

    pub fn new(m: [i8; 9]) -> Result<Self> {
        if m.iter().any(|v| !(-1..=1).contains(v)) {
            return Err(MplError::InvalidArgument(format!(
                "orientation entries must be -1, 0 or 1: {:?}",
                m
            )));
        }
        Ok(Self(m))
    }

    /// Parse the comma separated form the kernel exposes, e.g. `"0, 1, 0, ..."`.
    pub fn parse(text: &str) -> Result<Self> {
        let values: Vec<i8> = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i8>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| MplError::InvalidArgument(format!("orientation '{}': {}", text.trim(), e)))?;
        let m: [i8; 9] = values.try_into().map_err(|v: Vec<i8>| {
            MplError::InvalidArgument(format!("orientation needs 9 entries, got {}", v.len()))
        })?;
        Self::new(m)
    }

    pub fn as_array(&self) -> &[i8; 9] {
        &self.0
    }

    /// Chip frame to device frame.
    pub fn apply(&self, v: [i32; 3]) -> [i32; 3] {
        let m = &self.0;
        let mut out = [0i32; 3];
        for (r, o) in out.iter_mut().enumerate() {
            *o = m[r * 3] as i32 * v[0] + m[r * 3 + 1] as i32 * v[1] + m[r * 3 + 2] as i32 * v[2];
        }
        out
    }

    /// Device frame to chip frame (the matrix is orthonormal).
    pub fn apply_inverse(&self, v: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        let mut out = [0f32; 3];
        for (c, o) in out.iter_mut().enumerate() {
            *o = m[c] as f32 * v[0] + m[3 + c] as f32 * v[1] + m[6 + c] as f32 * v[2];
        }
        out
    }
}

impl Default for OrientationMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Output event handed to the framework.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    pub sensor: SensorType,
    pub handle: i32,
    /// Nanoseconds, as stamped by the kernel.
    pub timestamp: i64,
    /// Vector sensors use `[0..3]`; uncalibrated types carry the bias in
    /// `[3..6]`; rotation vectors carry `x, y, z, w, heading accuracy`.
    pub values: [f32; 6],
    pub accuracy: i8,
}

impl SensorEvent {
    pub fn new(sensor: SensorType, timestamp: i64, values: [f32; 6], accuracy: i8) -> Self {
        Self {
            sensor,
            handle: sensor.handle(),
            timestamp,
            values,
            accuracy,
        }
    }

    pub fn vector(sensor: SensorType, timestamp: i64, v: [f32; 3], accuracy: i8) -> Self {
        Self::new(sensor, timestamp, [v[0], v[1], v[2], 0.0, 0.0, 0.0], accuracy)
    }
}

/// Asynchronous results the DMP reports through its side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmpEvent {
    /// Screen orientation code (0..3) from the display-orientation feature.
    DisplayOrientation(u8),
    SignificantMotion { timestamp: i64 },
}
