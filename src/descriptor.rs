use crate::mask::{check_supported, Capabilities};
use crate::types::{SensorType, GRAVITY_EARTH};

/// Static description of one logical sensor for the framework.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub name: String,
    pub vendor: String,
    pub version: i32,
    pub handle: i32,
    pub sensor_type: i32,
    pub max_range: f32,
    pub resolution: f32,
    /// mA.
    pub power: f32,
    /// 0 for one-shot sensors.
    pub min_delay_us: i32,
}

/// Inputs for the descriptor table.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorContext<'a> {
    pub chip_id: &'a str,
    pub caps: Capabilities,
    pub gyro_fsr_dps: u32,
    pub accel_fsr_g: u32,
    /// Compass max range (µT) and resolution (µT per LSB).
    pub compass: Option<(&'a str, f32, f32)>,
    pub min_delay_us: i32,
}

const VENDOR: &str = "Invensense";

fn power_ma(t: SensorType) -> f32 {
    match t {
        SensorType::Gyro | SensorType::RawGyro => 5.5,
        SensorType::Accelerometer => 0.5,
        SensorType::MagneticField | SensorType::RawMagneticField => 0.3,
        SensorType::SignificantMotion => 0.5,
        SensorType::RotationVector => 6.3,
        _ => 6.0,
    }
}

/// One descriptor per type the hardware can back, in handle order.
pub fn populate_sensor_list(ctx: &DescriptorContext) -> Vec<SensorDescriptor> {
    let gyro_range = (ctx.gyro_fsr_dps as f32).to_radians();
    let accel_range = ctx.accel_fsr_g as f32 * GRAVITY_EARTH;
    let (compass_name, compass_range, compass_res) = ctx.compass.unwrap_or(("none", 0.0, 0.0));

    SensorType::ALL
        .into_iter()
        .filter(|t| check_supported(*t, &ctx.caps).is_ok())
        .map(|t| {
            let (source, max_range, resolution) = match t {
                SensorType::Gyro | SensorType::RawGyro => {
                    (ctx.chip_id, gyro_range, gyro_range / 32768.0)
                }
                SensorType::Accelerometer | SensorType::LinearAccel | SensorType::Gravity => {
                    (ctx.chip_id, accel_range, accel_range / 32768.0)
                }
                SensorType::MagneticField | SensorType::RawMagneticField => {
                    (compass_name, compass_range, compass_res)
                }
                SensorType::Orientation => (ctx.chip_id, 360.0, 1.0 / 65536.0),
                SensorType::RotationVector | SensorType::GameRotationVector => {
                    (ctx.chip_id, 1.0, 1.0 / (1u32 << 30) as f32)
                }
                SensorType::SignificantMotion => (ctx.chip_id, 1.0, 1.0),
            };
            SensorDescriptor {
                name: format!("{} {}", source, t.name()),
                vendor: VENDOR.to_string(),
                version: 1,
                handle: t.handle(),
                sensor_type: t.framework_type(),
                max_range,
                resolution,
                power: power_ma(t),
                min_delay_us: if t.is_one_shot() { 0 } else { ctx.min_delay_us },
            }
        })
        .collect()
}
