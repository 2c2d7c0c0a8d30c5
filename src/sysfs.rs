use crate::{MplError, Result};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Control endpoints the core writes to.
///
/// The key names are stable; where each key lives on disk is decided by the
/// attribute table handed to [`SysfsControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ChipEnable,
    PowerState,
    BufferEnable,
    BufferLength,
    CurrentTrigger,
    InTimestampEnable,

    DmpFirmware,
    FirmwareLoaded,
    DmpOn,
    DmpIntOn,
    DmpEventIntOn,
    DmpOutputRate,

    GyroEnable,
    GyroFifoEnable,
    GyroFifoRate,
    GyroFsr,
    GyroOrient,
    AccelEnable,
    AccelFifoEnable,
    AccelFifoRate,
    AccelFsr,
    AccelOrient,

    QuaternionOn,
    SixAxisQuaternionOn,
    PedQuaternionOn,
    PedometerOn,
    BatchMode,
    DisplayOrientationOn,
    EventDisplayOrientation,

    SmdEnable,
    EventSmd,
    SmdDelayThreshold,
    SmdDelayThreshold2,
    SmdThreshold,

    InAccelXOffset,
    InAccelYOffset,
    InAccelZOffset,
    InGyroXDmpBias,
    InGyroYDmpBias,
    InGyroZDmpBias,
}

impl Attribute {
    pub const ALL: [Attribute; 40] = [
        Attribute::ChipEnable,
        Attribute::PowerState,
        Attribute::BufferEnable,
        Attribute::BufferLength,
        Attribute::CurrentTrigger,
        Attribute::InTimestampEnable,
        Attribute::DmpFirmware,
        Attribute::FirmwareLoaded,
        Attribute::DmpOn,
        Attribute::DmpIntOn,
        Attribute::DmpEventIntOn,
        Attribute::DmpOutputRate,
        Attribute::GyroEnable,
        Attribute::GyroFifoEnable,
        Attribute::GyroFifoRate,
        Attribute::GyroFsr,
        Attribute::GyroOrient,
        Attribute::AccelEnable,
        Attribute::AccelFifoEnable,
        Attribute::AccelFifoRate,
        Attribute::AccelFsr,
        Attribute::AccelOrient,
        Attribute::QuaternionOn,
        Attribute::SixAxisQuaternionOn,
        Attribute::PedQuaternionOn,
        Attribute::PedometerOn,
        Attribute::BatchMode,
        Attribute::DisplayOrientationOn,
        Attribute::EventDisplayOrientation,
        Attribute::SmdEnable,
        Attribute::EventSmd,
        Attribute::SmdDelayThreshold,
        Attribute::SmdDelayThreshold2,
        Attribute::SmdThreshold,
        Attribute::InAccelXOffset,
        Attribute::InAccelYOffset,
        Attribute::InAccelZOffset,
        Attribute::InGyroXDmpBias,
        Attribute::InGyroYDmpBias,
        Attribute::InGyroZDmpBias,
    ];

    /// File name relative to the IIO device directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Attribute::ChipEnable => "buffer/enable_chip",
            Attribute::PowerState => "power_state",
            Attribute::BufferEnable => "buffer/enable",
            Attribute::BufferLength => "buffer/length",
            Attribute::CurrentTrigger => "trigger/current_trigger",
            Attribute::InTimestampEnable => "scan_elements/in_timestamp_en",
            Attribute::DmpFirmware => "dmp_firmware",
            Attribute::FirmwareLoaded => "firmware_loaded",
            Attribute::DmpOn => "dmp_on",
            Attribute::DmpIntOn => "dmp_int_on",
            Attribute::DmpEventIntOn => "dmp_event_int_on",
            Attribute::DmpOutputRate => "dmp_output_rate",
            Attribute::GyroEnable => "gyro_enable",
            Attribute::GyroFifoEnable => "gyro_fifo_enable",
            Attribute::GyroFifoRate => "sampling_frequency",
            Attribute::GyroFsr => "in_anglvel_scale",
            Attribute::GyroOrient => "gyro_matrix",
            Attribute::AccelEnable => "accel_enable",
            Attribute::AccelFifoEnable => "accel_fifo_enable",
            Attribute::AccelFifoRate => "accel_rate",
            Attribute::AccelFsr => "in_accel_scale",
            Attribute::AccelOrient => "accel_matrix",
            Attribute::QuaternionOn => "quaternion_on",
            Attribute::SixAxisQuaternionOn => "six_axes_q_on",
            Attribute::PedQuaternionOn => "ped_q_on",
            Attribute::PedometerOn => "pedometer_on",
            Attribute::BatchMode => "batchmode_on",
            Attribute::DisplayOrientationOn => "display_orientation_on",
            Attribute::EventDisplayOrientation => "event_display_orientation",
            Attribute::SmdEnable => "smd_enable",
            Attribute::EventSmd => "event_smd",
            Attribute::SmdDelayThreshold => "smd_delay_threshold",
            Attribute::SmdDelayThreshold2 => "smd_delay_threshold2",
            Attribute::SmdThreshold => "smd_threshold",
            Attribute::InAccelXOffset => "in_accel_x_offset",
            Attribute::InAccelYOffset => "in_accel_y_offset",
            Attribute::InAccelZOffset => "in_accel_z_offset",
            Attribute::InGyroXDmpBias => "in_anglvel_x_dmp_bias",
            Attribute::InGyroYDmpBias => "in_anglvel_y_dmp_bias",
            Attribute::InGyroZDmpBias => "in_anglvel_z_dmp_bias",
        }
    }
}

/// Key to path table for the control files of one device.
#[derive(Debug, Clone, Default)]
pub struct SysfsAttributes {
    paths: HashMap<Attribute, PathBuf>,
}

impl SysfsAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conventional layout: every attribute directly under `root`.
    pub fn standard(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let paths = Attribute::ALL
            .iter()
            .map(|&a| (a, root.join(a.file_name())))
            .collect();
        Self { paths }
    }

    /// Override (or add) the path of one attribute.
    pub fn with(mut self, attribute: Attribute, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(attribute, path.into());
        self
    }

    pub fn path(&self, attribute: Attribute) -> Option<&Path> {
        self.paths.get(&attribute).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Write/read access to the device control endpoints.
pub trait ControlInterface: Send {
    fn write_int(&mut self, attribute: Attribute, value: i64) -> io::Result<()>;

    fn write_bytes(&mut self, attribute: Attribute, data: &[u8]) -> io::Result<()>;

    fn read_string(&mut self, attribute: Attribute) -> io::Result<String>;

    fn read_int(&mut self, attribute: Attribute) -> io::Result<i64> {
        let text = self.read_string(attribute)?;
        text.trim().parse::<i64>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?}: '{}' is not an integer: {}", attribute, text.trim(), e),
            )
        })
    }
}

/// Write one integer, mapping failure to a device-communication error.
pub(crate) fn write_attr(ctl: &mut dyn ControlInterface, attribute: Attribute, value: i64) -> Result<()> {
    log::debug!("write {:?} = {}", attribute, value);
    ctl.write_int(attribute, value).map_err(|e| {
        log::warn!("write {:?} = {} failed: {}", attribute, value, e);
        MplError::device(attribute, e)
    })
}

pub(crate) fn read_attr(ctl: &mut dyn ControlInterface, attribute: Attribute) -> Result<i64> {
    ctl.read_int(attribute)
        .map_err(|e| MplError::device(attribute, e))
}

/// File-backed control interface for a real IIO device.
pub struct SysfsControl {
    attributes: SysfsAttributes,
}

impl SysfsControl {
    pub fn new(attributes: SysfsAttributes) -> Self {
        Self { attributes }
    }

    pub fn attributes(&self) -> &SysfsAttributes {
        &self.attributes
    }

    fn resolve(&self, attribute: Attribute) -> io::Result<&Path> {
        self.attributes.path(attribute).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no path configured for {:?}", attribute),
            )
        })
    }
}

impl ControlInterface for SysfsControl {
    fn write_int(&mut self, attribute: Attribute, value: i64) -> io::Result<()> {
        let path = self.resolve(attribute)?;
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        // sysfs store handlers want the whole value in one write
        file.write_all(format!("{}\n", value).as_bytes())
    }

    fn write_bytes(&mut self, attribute: Attribute, data: &[u8]) -> io::Result<()> {
        let path = self.resolve(attribute)?;
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.write_all(data)
    }

    fn read_string(&mut self, attribute: Attribute) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(attribute)?)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<Attribute, String>,
    writes: Vec<(Attribute, String)>,
    failing: HashSet<Attribute>,
}

/// In-memory control interface.
///
/// Clones share the same table, so a caller can keep one clone to inspect
/// the write log after handing another to the core. Writing the firmware
/// image flips `FirmwareLoaded` to 1 the way the kernel loader does.
#[derive(Debug, Clone, Default)]
pub struct MemoryControl {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Preset an attribute value without logging a write.
    pub fn set(&self, attribute: Attribute, value: &str) {
        self.lock().values.insert(attribute, value.to_string());
    }

    pub fn value(&self, attribute: Attribute) -> Option<String> {
        self.lock().values.get(&attribute).cloned()
    }

    pub fn int(&self, attribute: Attribute) -> Option<i64> {
        self.value(attribute).and_then(|v| v.trim().parse().ok())
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<(Attribute, String)> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Make every later write to `attribute` fail with an I/O error.
    pub fn fail_writes(&self, attribute: Attribute) {
        self.lock().failing.insert(attribute);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    fn store(&self, attribute: Attribute, value: String) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.failing.contains(&attribute) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("simulated failure writing {:?}", attribute),
            ));
        }
        inner.writes.push((attribute, value.clone()));
        inner.values.insert(attribute, value);
        if attribute == Attribute::DmpFirmware {
            inner.values.insert(Attribute::FirmwareLoaded, "1".to_string());
        }
        Ok(())
    }
}

impl ControlInterface for MemoryControl {
    fn write_int(&mut self, attribute: Attribute, value: i64) -> io::Result<()> {
        self.store(attribute, value.to_string())
    }

    fn write_bytes(&mut self, attribute: Attribute, data: &[u8]) -> io::Result<()> {
        self.store(attribute, format!("<{} bytes>", data.len()))
    }

    fn read_string(&mut self, attribute: Attribute) -> io::Result<String> {
        self.lock().values.get(&attribute).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{:?} not set", attribute))
        })
    }
}
