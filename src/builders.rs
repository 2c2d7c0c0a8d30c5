//! Per-type event builders.
//!
//! A record first updates the shared caches (`BuildContext::absorb`), then
//! every builder bound to its kind runs against the same context. Builders
//! are plain functions in a table indexed by `SensorType`.

use crate::calibration::CalibrationStore;
use crate::demux::RawSample;
use crate::protocol::{self, Quaternion, RecordKind};
use crate::types::{
    FeatureMask, HardwareMask, OrientationMatrix, PhysicalSensor, SensorEvent, SensorType,
    ACCURACY_HIGH, ACCURACY_LOW, ACCURACY_MEDIUM, GRAVITY_EARTH, NUM_SENSORS,
};
use std::f32::consts::PI;

pub type BuilderFn = fn(&BuildContext, &RawSample) -> Option<SensorEvent>;

/// Builder per type, indexed by `SensorType::index()`.
pub const BUILDERS: [BuilderFn; NUM_SENSORS] = [
    build_gyro,
    build_raw_gyro,
    build_accel,
    build_magnetic_field,
    build_raw_magnetic_field,
    build_orientation,
    build_rotation_vector,
    build_game_rotation_vector,
    build_linear_accel,
    build_gravity,
    build_significant_motion,
];

/// Types a record kind can produce events for, in build order.
pub fn targets(kind: RecordKind) -> &'static [SensorType] {
    match kind {
        RecordKind::Gyro => &[SensorType::Gyro, SensorType::RawGyro],
        RecordKind::Accel => &[
            SensorType::Accelerometer,
            SensorType::LinearAccel,
            SensorType::Orientation,
        ],
        RecordKind::Compass => &[SensorType::MagneticField, SensorType::RawMagneticField],
        RecordKind::Quaternion | RecordKind::SixAxisQuaternion | RecordKind::PedQuaternion => &[
            SensorType::Orientation,
            SensorType::RotationVector,
            SensorType::GameRotationVector,
            SensorType::Gravity,
        ],
        RecordKind::Pressure => &[],
    }
}

/// Chip-to-device axis maps of the three engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Orientations {
    pub gyro: OrientationMatrix,
    pub accel: OrientationMatrix,
    pub compass: OrientationMatrix,
}

impl Orientations {
    pub fn get(&self, sensor: PhysicalSensor) -> &OrientationMatrix {
        match sensor {
            PhysicalSensor::Gyro => &self.gyro,
            PhysicalSensor::Accel => &self.accel,
            PhysicalSensor::Compass => &self.compass,
        }
    }
}

/// Latest values the derived types combine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleCache {
    /// Calibrated body-frame accel, m/s².
    pub accel: Option<[f32; 3]>,
    /// Calibrated body-frame field, µT.
    pub compass: Option<[f32; 3]>,
    pub quaternion: Option<Quaternion>,
    pub pressure: Option<f32>,
    pub steps: u64,
}

/// Everything a builder may read.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub calibration: CalibrationStore,
    pub orientation: Orientations,
    pub cache: SampleCache,
}

impl BuildContext {
    pub fn new(calibration: CalibrationStore, orientation: Orientations) -> Self {
        Self {
            calibration,
            orientation,
            cache: SampleCache::default(),
        }
    }

    /// Counts to body-frame output units, bias untouched.
    pub fn uncalibrated(&self, sensor: PhysicalSensor, raw: [i32; 3]) -> [f32; 3] {
        let scale = self.calibration.get(sensor).scale;
        self.orientation.get(sensor).apply(raw).map(|v| v as f32 * scale)
    }

    pub fn calibrated(&self, sensor: PhysicalSensor, raw: [i32; 3]) -> [f32; 3] {
        let v = self.uncalibrated(sensor, raw);
        let b = self.calibration.get(sensor).effective_bias();
        [v[0] - b[0], v[1] - b[1], v[2] - b[2]]
    }

    pub fn accuracy(&self, sensor: PhysicalSensor) -> i8 {
        self.calibration.get(sensor).accuracy()
    }

    /// Fold one record into the caches.
    pub fn absorb(&mut self, sample: &RawSample) {
        match sample.kind {
            RecordKind::Accel => {
                self.cache.accel = Some(self.calibrated(PhysicalSensor::Accel, sample.data));
            }
            RecordKind::Compass => {
                self.cache.compass = Some(self.calibrated(PhysicalSensor::Compass, sample.data));
            }
            RecordKind::Quaternion | RecordKind::SixAxisQuaternion | RecordKind::PedQuaternion => {
                let fp = sample.fixed_point();
                let [x, y, z] = sample.data.map(|v| fp.to_f32(v));
                self.cache.quaternion = Some(protocol::quaternion_from_imaginary(x, y, z));
            }
            RecordKind::Pressure => {
                self.cache.pressure = Some(sample.fixed_point().to_f32(sample.data[0]));
            }
            RecordKind::Gyro => {}
        }
        if sample.step && sample.kind.carries_step() {
            self.cache.steps += 1;
        }
    }

    /// Drop cached values whose producer is no longer running.
    pub fn invalidate(&mut self, hardware: HardwareMask, features: FeatureMask) {
        if !hardware.contains(HardwareMask::ACCEL) {
            self.cache.accel = None;
        }
        if !hardware.contains(HardwareMask::COMPASS) {
            self.cache.compass = None;
        }
        let quaternions = FeatureMask::QUATERNION
            | FeatureMask::SIX_AXIS_QUATERNION
            | FeatureMask::PED_QUATERNION;
        if !features.intersects(quaternions) {
            self.cache.quaternion = None;
        }
    }

    /// Rotate `q` about world Z so magnetic north lies on world Y.
    fn heading_corrected(&self, q: Quaternion) -> Option<Quaternion> {
        let m = self.cache.compass?;
        let w = protocol::rotate(q, m);
        if w[0].abs() < 1e-6 && w[1].abs() < 1e-6 {
            return None;
        }
        let half = w[0].atan2(w[1]) / 2.0;
        let yaw = [half.cos(), 0.0, 0.0, half.sin()];
        Some(protocol::normalize(protocol::multiply(yaw, q)))
    }

    fn heading_accuracy(&self) -> f32 {
        match self.accuracy(PhysicalSensor::Compass) {
            ACCURACY_HIGH => PI / 36.0,
            ACCURACY_MEDIUM => PI / 18.0,
            ACCURACY_LOW => PI / 6.0,
            _ => PI,
        }
    }
}

fn with_bias(v: [f32; 3], bias: [f32; 3]) -> [f32; 6] {
    [v[0], v[1], v[2], bias[0], bias[1], bias[2]]
}

fn build_gyro(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let v = ctx.calibrated(PhysicalSensor::Gyro, s.data);
    Some(SensorEvent::vector(
        SensorType::Gyro,
        s.timestamp,
        v,
        ctx.accuracy(PhysicalSensor::Gyro),
    ))
}

fn build_raw_gyro(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let v = ctx.uncalibrated(PhysicalSensor::Gyro, s.data);
    let bias = ctx.calibration.get(PhysicalSensor::Gyro).reported_bias();
    Some(SensorEvent::new(
        SensorType::RawGyro,
        s.timestamp,
        with_bias(v, bias),
        ctx.accuracy(PhysicalSensor::Gyro),
    ))
}

fn build_accel(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let v = ctx.calibrated(PhysicalSensor::Accel, s.data);
    Some(SensorEvent::vector(
        SensorType::Accelerometer,
        s.timestamp,
        v,
        ctx.accuracy(PhysicalSensor::Accel),
    ))
}

fn build_magnetic_field(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let v = ctx.calibrated(PhysicalSensor::Compass, s.data);
    Some(SensorEvent::vector(
        SensorType::MagneticField,
        s.timestamp,
        v,
        ctx.accuracy(PhysicalSensor::Compass),
    ))
}

fn build_raw_magnetic_field(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let v = ctx.uncalibrated(PhysicalSensor::Compass, s.data);
    let bias = ctx.calibration.get(PhysicalSensor::Compass).reported_bias();
    Some(SensorEvent::new(
        SensorType::RawMagneticField,
        s.timestamp,
        with_bias(v, bias),
        ctx.accuracy(PhysicalSensor::Compass),
    ))
}

/// Azimuth, pitch and roll in degrees. Accel records only drive this type
/// until the first quaternion arrives; then the tilt estimate is replaced.
fn build_orientation(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let (q, accuracy) = if s.kind.is_quaternion() {
        (ctx.cache.quaternion?, ctx.accuracy(PhysicalSensor::Accel))
    } else if ctx.cache.quaternion.is_none() {
        let up = ctx.cache.accel?;
        (protocol::tilt_quaternion(up)?, ctx.accuracy(PhysicalSensor::Accel))
    } else {
        return None;
    };
    let (q, accuracy) = match ctx.heading_corrected(q) {
        Some(corrected) => (corrected, ctx.accuracy(PhysicalSensor::Compass)),
        None => (q, accuracy),
    };
    let m = protocol::quaternion_to_rotation(q);
    Some(SensorEvent::vector(
        SensorType::Orientation,
        s.timestamp,
        protocol::rotation_to_orientation(&m),
        accuracy,
    ))
}

fn build_rotation_vector(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let q = ctx.cache.quaternion?;
    let (q, heading, accuracy) = match ctx.heading_corrected(q) {
        Some(corrected) => (
            corrected,
            ctx.heading_accuracy(),
            ctx.accuracy(PhysicalSensor::Compass),
        ),
        None => (q, PI, ctx.accuracy(PhysicalSensor::Gyro)),
    };
    let [w, x, y, z] = q;
    Some(SensorEvent::new(
        SensorType::RotationVector,
        s.timestamp,
        [x, y, z, w, heading, 0.0],
        accuracy,
    ))
}

fn build_game_rotation_vector(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let [w, x, y, z] = ctx.cache.quaternion?;
    Some(SensorEvent::new(
        SensorType::GameRotationVector,
        s.timestamp,
        [x, y, z, w, 0.0, 0.0],
        ctx.accuracy(PhysicalSensor::Gyro),
    ))
}

fn build_linear_accel(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let q = ctx.cache.quaternion?;
    let a = ctx.cache.accel?;
    let g = protocol::gravity_from_quaternion(q, GRAVITY_EARTH);
    Some(SensorEvent::vector(
        SensorType::LinearAccel,
        s.timestamp,
        [a[0] - g[0], a[1] - g[1], a[2] - g[2]],
        ctx.accuracy(PhysicalSensor::Accel),
    ))
}

fn build_gravity(ctx: &BuildContext, s: &RawSample) -> Option<SensorEvent> {
    let q = ctx.cache.quaternion?;
    Some(SensorEvent::vector(
        SensorType::Gravity,
        s.timestamp,
        protocol::gravity_from_quaternion(q, GRAVITY_EARTH),
        ctx.accuracy(PhysicalSensor::Accel),
    ))
}

/// Significant motion has no stream record; it fires from the DMP side
/// channel through `significant_motion_event`.
fn build_significant_motion(_ctx: &BuildContext, _s: &RawSample) -> Option<SensorEvent> {
    None
}

pub fn significant_motion_event(timestamp: i64) -> SensorEvent {
    SensorEvent::new(
        SensorType::SignificantMotion,
        timestamp,
        [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ACCURACY_HIGH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FixedPoint;
    use crate::types::ACCURACY_UNRELIABLE;

    fn context() -> BuildContext {
        // 1 unit per LSB keeps the arithmetic readable
        BuildContext::new(CalibrationStore::new(1.0, 1.0, 1.0), Orientations::default())
    }

    fn sample(kind: RecordKind, data: [i32; 3]) -> RawSample {
        RawSample { kind, data, step: false, timestamp: 42 }
    }

    fn build(ctx: &mut BuildContext, t: SensorType, s: &RawSample) -> Option<SensorEvent> {
        ctx.absorb(s);
        BUILDERS[t.index()](ctx, s)
    }

    fn identity_quaternion() -> RawSample {
        sample(RecordKind::SixAxisQuaternion, [0, 0, 0])
    }

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-3)
    }

    #[test]
    fn test_table_binds_each_type() {
        for kind in [
            RecordKind::Gyro,
            RecordKind::Accel,
            RecordKind::Compass,
            RecordKind::SixAxisQuaternion,
        ] {
            for t in targets(kind) {
                assert!(!t.is_one_shot());
            }
        }
        assert!(targets(RecordKind::Pressure).is_empty());
        let mut ctx = context();
        assert!(build(&mut ctx, SensorType::SignificantMotion, &identity_quaternion()).is_none());
    }

    #[test]
    fn test_gyro_applies_orientation_and_bias() {
        let mut ctx = context();
        ctx.orientation.gyro = OrientationMatrix::new([0, 1, 0, -1, 0, 0, 0, 0, 1]).unwrap();
        ctx.calibration.update(PhysicalSensor::Gyro, [1.0, 0.0, 0.0], ACCURACY_HIGH);
        let s = sample(RecordKind::Gyro, [10, 20, 30]);

        let cal = build(&mut ctx, SensorType::Gyro, &s).unwrap();
        assert_eq!(&cal.values[..3], &[19.0, -10.0, 30.0]);
        assert_eq!(cal.accuracy, ACCURACY_HIGH);
        assert_eq!(cal.timestamp, 42);
        assert_eq!(cal.handle, SensorType::Gyro.handle());

        let raw = build(&mut ctx, SensorType::RawGyro, &s).unwrap();
        assert_eq!(raw.values, [20.0, -10.0, 30.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_calibration_is_unreliable() {
        let mut ctx = context();
        let e = build(&mut ctx, SensorType::Accelerometer, &sample(RecordKind::Accel, [1, 2, 3])).unwrap();
        assert_eq!(&e.values[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(e.accuracy, ACCURACY_UNRELIABLE);
    }

    #[test]
    fn test_gravity_and_linear_accel_at_rest() {
        let mut ctx = context();
        let q = identity_quaternion();
        let g = build(&mut ctx, SensorType::Gravity, &q).unwrap();
        assert!(close(&g.values[..3], &[0.0, 0.0, GRAVITY_EARTH]));

        // accel reads 1 g up plus 1 m/s² along x
        let a = sample(RecordKind::Accel, [1, 0, 10]);
        ctx.calibration = CalibrationStore::new(1.0, 1.0, 1.0);
        let lin = build(&mut ctx, SensorType::LinearAccel, &a).unwrap();
        assert!(close(&lin.values[..3], &[1.0, 0.0, 10.0 - GRAVITY_EARTH]));
    }

    #[test]
    fn test_linear_accel_needs_quaternion() {
        let mut ctx = context();
        assert!(build(&mut ctx, SensorType::LinearAccel, &sample(RecordKind::Accel, [0, 0, 10])).is_none());
    }

    #[test]
    fn test_orientation_from_tilt_then_quaternion() {
        let mut ctx = context();
        let flat = sample(RecordKind::Accel, [0, 0, 10]);
        let e = build(&mut ctx, SensorType::Orientation, &flat).unwrap();
        assert!(close(&e.values[1..3], &[0.0, 0.0]));

        let q = identity_quaternion();
        assert!(build(&mut ctx, SensorType::Orientation, &q).is_some());
        // a quaternion is cached now, accel records stop driving orientation
        assert!(build(&mut ctx, SensorType::Orientation, &flat).is_none());
    }

    #[test]
    fn test_rotation_vector_heading_correction() {
        let mut ctx = context();
        // field points along device +x: north is 90 degrees off world Y
        ctx.absorb(&sample(RecordKind::Compass, [30, 0, -40]));
        ctx.calibration.update(PhysicalSensor::Compass, [0.0; 3], ACCURACY_HIGH);
        let e = build(&mut ctx, SensorType::RotationVector, &identity_quaternion()).unwrap();
        let q = [e.values[3], e.values[0], e.values[1], e.values[2]];
        let north = protocol::rotate(q, [30.0, 0.0, -40.0]);
        assert!(north[0].abs() < 1e-3 && north[1] > 0.0);
        assert!((e.values[4] - PI / 36.0).abs() < 1e-6);

        let game = build(&mut ctx, SensorType::GameRotationVector, &identity_quaternion()).unwrap();
        assert!(close(&game.values[..4], &[0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_ped_quaternion_uses_q14() {
        let mut ctx = context();
        let half = FixedPoint::Q14.from_f32(0.5);
        ctx.absorb(&RawSample { kind: RecordKind::PedQuaternion, data: [half, 0, 0], step: true, timestamp: 1 });
        let q = ctx.cache.quaternion.unwrap();
        assert!((q[1] - 0.5).abs() < 1e-4);
        assert_eq!(ctx.cache.steps, 1);
    }

    #[test]
    fn test_invalidate_drops_stale_quaternion() {
        let mut ctx = context();
        ctx.absorb(&identity_quaternion());
        ctx.absorb(&sample(RecordKind::Accel, [0, 0, 10]));
        ctx.invalidate(HardwareMask::ACCEL, FeatureMask::empty());
        assert!(ctx.cache.quaternion.is_none());
        assert!(ctx.cache.accel.is_some());
    }
}
