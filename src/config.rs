use crate::dmp::SmdParams;
use crate::types::GRAVITY_EARTH;
use crate::{MplError, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Longest delay a client may request, 1 s.
pub const MAX_DELAY_NS: i64 = 1_000_000_000;

const GYRO_FSR_DPS: [u32; 4] = [250, 500, 1000, 2000];
const ACCEL_FSR_G: [u32; 4] = [2, 4, 8, 16];

/// Static configuration of one sensor core.
#[derive(Debug, Clone, PartialEq)]
pub struct MplConfig {
    /// IIO device directory holding the control attributes.
    pub sysfs_root: PathBuf,
    /// Character device carrying the buffered motion stream.
    pub data_device: PathBuf,
    /// Chip name used for descriptor names.
    pub chip_id: String,
    pub gyro_fsr_dps: u32,
    pub accel_fsr_g: u32,
    /// Use the DMP at all.
    pub dmp: bool,
    /// DMP firmware image; without it the DMP only works if the kernel
    /// already loaded one.
    pub dmp_firmware: Option<PathBuf>,
    /// Prefer the low-power quaternion for rotation vector without compass.
    pub low_power_quaternion: bool,
    /// Poll timeout handed to the framework, -1 blocks.
    pub poll_time_ms: i32,
    /// Bytes requested per data read.
    pub read_buffer: usize,
    pub min_delay_us: u32,
    pub smd: SmdParams,
}

impl Default for MplConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            data_device: PathBuf::from("/dev/iio:device0"),
            chip_id: "MPU6500".to_string(),
            gyro_fsr_dps: 2000,
            accel_fsr_g: 2,
            dmp: true,
            dmp_firmware: None,
            low_power_quaternion: true,
            poll_time_ms: -1,
            read_buffer: 48 * 64,
            min_delay_us: 5000,
            smd: SmdParams::default(),
        }
    }
}

impl MplConfig {
    /// Defaults overridden by `MPL_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        let cfg = Self {
            sysfs_root: read_env_path("MPL_SYSFS_ROOT").unwrap_or(d.sysfs_root),
            data_device: read_env_path("MPL_DATA_DEVICE").unwrap_or(d.data_device),
            chip_id: read_env_string("MPL_CHIP_ID", &d.chip_id),
            gyro_fsr_dps: read_env("MPL_GYRO_FSR_DPS", d.gyro_fsr_dps),
            accel_fsr_g: read_env("MPL_ACCEL_FSR_G", d.accel_fsr_g),
            dmp: read_env_bool("MPL_DMP", d.dmp),
            dmp_firmware: read_env_path("MPL_DMP_FIRMWARE"),
            low_power_quaternion: read_env_bool("MPL_ENABLE_LP_QUAT", d.low_power_quaternion),
            poll_time_ms: read_env("MPL_POLL_TIME_MS", d.poll_time_ms),
            read_buffer: read_env("MPL_READ_BUFFER", d.read_buffer),
            min_delay_us: read_env("MPL_MIN_DELAY_US", d.min_delay_us),
            smd: SmdParams {
                motion_threshold: read_env("MPL_SMD_THRESHOLD", d.smd.motion_threshold),
                delay_threshold: read_env("MPL_SMD_DELAY", d.smd.delay_threshold),
                delay_threshold2: read_env("MPL_SMD_DELAY2", d.smd.delay_threshold2),
            },
        };
        log::info!(
            "config: root={} chip={} gyroFsr={} accelFsr={} dmp={} lpQuat={} readBuffer={}",
            cfg.sysfs_root.display(),
            cfg.chip_id,
            cfg.gyro_fsr_dps,
            cfg.accel_fsr_g,
            cfg.dmp,
            cfg.low_power_quaternion,
            cfg.read_buffer
        );
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if !GYRO_FSR_DPS.contains(&self.gyro_fsr_dps) {
            return Err(MplError::InvalidArgument(format!(
                "gyro full scale {} dps, expected one of {:?}",
                self.gyro_fsr_dps, GYRO_FSR_DPS
            )));
        }
        if !ACCEL_FSR_G.contains(&self.accel_fsr_g) {
            return Err(MplError::InvalidArgument(format!(
                "accel full scale {} g, expected one of {:?}",
                self.accel_fsr_g, ACCEL_FSR_G
            )));
        }
        if self.read_buffer < crate::protocol::MAX_RECORD_SIZE {
            return Err(MplError::InvalidArgument(format!(
                "read buffer of {} bytes cannot hold a record",
                self.read_buffer
            )));
        }
        if self.min_delay_us == 0 || self.min_delay_ns() > MAX_DELAY_NS {
            return Err(MplError::InvalidArgument(format!(
                "minimum delay {} us out of range",
                self.min_delay_us
            )));
        }
        Ok(())
    }

    /// Gyro sensitivity, LSB per dps.
    pub fn gyro_lsb_per_dps(&self) -> f32 {
        32768.0 / self.gyro_fsr_dps as f32
    }

    /// Accel sensitivity, LSB per g.
    pub fn accel_lsb_per_g(&self) -> f32 {
        32768.0 / self.accel_fsr_g as f32
    }

    /// rad/s per gyro LSB.
    pub fn gyro_scale(&self) -> f32 {
        1.0f32.to_radians() / self.gyro_lsb_per_dps()
    }

    /// m/s² per accel LSB.
    pub fn accel_scale(&self) -> f32 {
        GRAVITY_EARTH / self.accel_lsb_per_g()
    }

    pub fn min_delay_ns(&self) -> i64 {
        self.min_delay_us as i64 * 1000
    }

    /// Clamp a requested delay into `[min_delay, 1 s]`.
    pub fn clamp_delay(&self, ns: i64) -> Result<i64> {
        if ns < 0 {
            return Err(MplError::InvalidArgument(format!("negative delay {} ns", ns)));
        }
        Ok(ns.clamp(self.min_delay_ns(), MAX_DELAY_NS))
    }

    /// Read the configured firmware image, if any.
    pub fn load_firmware_image(&self) -> Result<Option<Vec<u8>>> {
        match &self.dmp_firmware {
            Some(path) => {
                let image = std::fs::read(path).map_err(|e| {
                    MplError::NoDevice(format!("DMP firmware {}: {}", path.display(), e))
                })?;
                log::info!("DMP firmware image {} ({} bytes)", path.display(), image.len());
                Ok(Some(image))
            }
            None => Ok(None),
        }
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("ignoring unparsable {}='{}'", name, v);
            default
        }),
        Err(_) => default,
    }
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = MplConfig::default();
        cfg.validate().unwrap();
        assert!((cfg.gyro_lsb_per_dps() - 16.384).abs() < 1e-3);
        assert_eq!(cfg.accel_lsb_per_g(), 16384.0);
        assert!((cfg.accel_scale() * 16384.0 - GRAVITY_EARTH).abs() < 1e-4);
    }

    #[test]
    fn test_delay_clamping() {
        let cfg = MplConfig::default();
        assert_eq!(cfg.clamp_delay(0).unwrap(), 5_000_000);
        assert_eq!(cfg.clamp_delay(20_000_000).unwrap(), 20_000_000);
        assert_eq!(cfg.clamp_delay(5_000_000_000).unwrap(), MAX_DELAY_NS);
        assert!(matches!(cfg.clamp_delay(-1), Err(MplError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_bad_full_scale() {
        let cfg = MplConfig { gyro_fsr_dps: 300, ..MplConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = MplConfig { accel_fsr_g: 3, ..MplConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = MplConfig { read_buffer: 8, ..MplConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_parsing() {
        assert_eq!(read_env("MPL_TEST_UNSET_VALUE", 7u32), 7);
        std::env::set_var("MPL_TEST_NUMBER", " 42 ");
        assert_eq!(read_env("MPL_TEST_NUMBER", 0i32), 42);
        std::env::set_var("MPL_TEST_NUMBER", "nope");
        assert_eq!(read_env("MPL_TEST_NUMBER", 3i32), 3);
        std::env::set_var("MPL_TEST_FLAG", "off");
        assert!(!read_env_bool("MPL_TEST_FLAG", true));
    }

    #[test]
    fn test_missing_firmware_is_no_device() {
        let cfg = MplConfig {
            dmp_firmware: Some(PathBuf::from("/nonexistent/dmp.bin")),
            ..MplConfig::default()
        };
        assert!(matches!(cfg.load_firmware_image(), Err(MplError::NoDevice(_))));
        assert!(MplConfig::default().load_firmware_image().unwrap().is_none());
    }
}
