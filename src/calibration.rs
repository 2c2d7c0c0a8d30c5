use crate::protocol::FixedPoint;
use crate::sysfs::{write_attr, Attribute, ControlInterface};
use crate::types::{OrientationMatrix, PhysicalSensor, ACCURACY_LOW, ACCURACY_UNRELIABLE};
use crate::Result;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// Calibration state of one physical engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationBias {
    /// Output units per LSB (rad/s, m/s² or µT).
    pub scale: f32,
    /// Body-frame bias in output units.
    pub bias: [f32; 3],
    /// A bias has been loaded or computed.
    pub available: bool,
    /// The device already removes the bias from the data it streams.
    pub applied: bool,
    pub accuracy: i8,
}

impl CalibrationBias {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            bias: [0.0; 3],
            available: false,
            applied: false,
            accuracy: ACCURACY_UNRELIABLE,
        }
    }

    /// Bias the host still has to subtract.
    pub fn effective_bias(&self) -> [f32; 3] {
        if self.available && !self.applied {
            self.bias
        } else {
            [0.0; 3]
        }
    }

    /// Bias reported alongside uncalibrated events.
    pub fn reported_bias(&self) -> [f32; 3] {
        if self.available {
            self.bias
        } else {
            [0.0; 3]
        }
    }

    pub fn accuracy(&self) -> i8 {
        if self.available {
            self.accuracy
        } else {
            ACCURACY_UNRELIABLE
        }
    }
}

/// Persisted bias vectors, body frame, Q16 output units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationBlob {
    pub gyro: [i32; 3],
    pub accel: [i32; 3],
    pub compass: [i32; 3],
}

/// Where calibration lives between runs. The format is the backend's
/// business.
pub trait CalibrationStorage: Send {
    /// `Ok(None)` when nothing was stored yet.
    fn load(&mut self) -> io::Result<Option<CalibrationBlob>>;

    fn store(&mut self, blob: &CalibrationBlob) -> io::Result<()>;
}

/// Storage that never remembers anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl CalibrationStorage for NoStorage {
    fn load(&mut self) -> io::Result<Option<CalibrationBlob>> {
        Ok(None)
    }

    fn store(&mut self, _blob: &CalibrationBlob) -> io::Result<()> {
        Ok(())
    }
}

/// Shared in-memory storage; clones see the same blob.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    blob: Arc<Mutex<Option<CalibrationBlob>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: CalibrationBlob) -> Self {
        Self {
            blob: Arc::new(Mutex::new(Some(blob))),
        }
    }

    pub fn blob(&self) -> Option<CalibrationBlob> {
        *self.blob.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CalibrationStorage for MemoryStorage {
    fn load(&mut self) -> io::Result<Option<CalibrationBlob>> {
        Ok(self.blob())
    }

    fn store(&mut self, blob: &CalibrationBlob) -> io::Result<()> {
        *self.blob.lock().unwrap_or_else(PoisonError::into_inner) = Some(*blob);
        Ok(())
    }
}

fn to_q16(v: [f32; 3]) -> [i32; 3] {
    v.map(|x| FixedPoint::Q16.from_f32(x))
}

fn from_q16(v: [i32; 3]) -> [f32; 3] {
    v.map(|x| FixedPoint::Q16.to_f32(x))
}

/// Bias cache for the three physical engines.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    gyro: CalibrationBias,
    accel: CalibrationBias,
    compass: CalibrationBias,
    /// Something worth writing back was computed this session.
    dirty: bool,
}

impl CalibrationStore {
    pub fn new(gyro_scale: f32, accel_scale: f32, compass_scale: f32) -> Self {
        Self {
            gyro: CalibrationBias::new(gyro_scale),
            accel: CalibrationBias::new(accel_scale),
            compass: CalibrationBias::new(compass_scale),
            dirty: false,
        }
    }

    pub fn get(&self, sensor: PhysicalSensor) -> &CalibrationBias {
        match sensor {
            PhysicalSensor::Gyro => &self.gyro,
            PhysicalSensor::Accel => &self.accel,
            PhysicalSensor::Compass => &self.compass,
        }
    }

    fn get_mut(&mut self, sensor: PhysicalSensor) -> &mut CalibrationBias {
        match sensor {
            PhysicalSensor::Gyro => &mut self.gyro,
            PhysicalSensor::Accel => &mut self.accel,
            PhysicalSensor::Compass => &mut self.compass,
        }
    }

    pub fn has_good_calibration(&self) -> bool {
        self.dirty
    }

    /// Load stored biases. Missing storage leaves every engine unavailable,
    /// which only lowers event accuracy.
    pub fn load_from(&mut self, storage: &mut dyn CalibrationStorage) {
        match storage.load() {
            Ok(Some(blob)) => {
                for (sensor, v) in [
                    (PhysicalSensor::Gyro, blob.gyro),
                    (PhysicalSensor::Accel, blob.accel),
                    (PhysicalSensor::Compass, blob.compass),
                ] {
                    let cal = self.get_mut(sensor);
                    cal.bias = from_q16(v);
                    cal.available = true;
                    cal.applied = false;
                    cal.accuracy = ACCURACY_LOW;
                }
                log::info!("loaded stored calibration");
            }
            Ok(None) => log::info!("no stored calibration, using zero bias"),
            Err(e) => log::warn!("calibration load failed, using zero bias: {}", e),
        }
    }

    /// Record a freshly computed bias.
    pub fn update(&mut self, sensor: PhysicalSensor, bias: [f32; 3], accuracy: i8) {
        let cal = self.get_mut(sensor);
        cal.bias = bias;
        cal.available = true;
        cal.applied = false;
        cal.accuracy = accuracy.clamp(ACCURACY_UNRELIABLE, crate::types::ACCURACY_HIGH);
        self.dirty = true;
        log::debug!("{:?} bias {:?} accuracy {}", sensor, bias, accuracy);
    }

    pub fn to_blob(&self) -> CalibrationBlob {
        CalibrationBlob {
            gyro: to_q16(self.gyro.reported_bias()),
            accel: to_q16(self.accel.reported_bias()),
            compass: to_q16(self.compass.reported_bias()),
        }
    }

    /// Write back when a good calibration was computed this session.
    pub fn flush(&mut self, storage: &mut dyn CalibrationStorage) {
        if !self.dirty {
            return;
        }
        match storage.store(&self.to_blob()) {
            Ok(()) => {
                self.dirty = false;
                log::info!("calibration stored");
            }
            Err(e) => log::warn!("calibration store failed: {}", e),
        }
    }

    /// Push a bias into the device registers.
    ///
    /// Accel offsets act on the streamed data, so the accel bias counts as
    /// applied afterwards. The gyro DMP bias only feeds the quaternion and
    /// the host keeps subtracting it from gyro samples. Compass bias stays
    /// on the host.
    pub fn write_to_device(
        &mut self,
        sensor: PhysicalSensor,
        orientation: &OrientationMatrix,
        ctl: &mut dyn ControlInterface,
    ) -> Result<()> {
        let cal = *self.get(sensor);
        if !cal.available || cal.scale == 0.0 {
            return Ok(());
        }
        // body frame output units -> chip frame counts
        let chip = orientation.apply_inverse(cal.bias).map(|v| v / cal.scale);
        match sensor {
            PhysicalSensor::Gyro => {
                let q16 = to_q16(chip);
                for (attr, v) in [
                    Attribute::InGyroXDmpBias,
                    Attribute::InGyroYDmpBias,
                    Attribute::InGyroZDmpBias,
                ]
                .into_iter()
                .zip(q16)
                {
                    write_attr(ctl, attr, v as i64)?;
                }
            }
            PhysicalSensor::Accel => {
                for (attr, v) in [
                    Attribute::InAccelXOffset,
                    Attribute::InAccelYOffset,
                    Attribute::InAccelZOffset,
                ]
                .into_iter()
                .zip(chip)
                {
                    write_attr(ctl, attr, v.round() as i64)?;
                }
                self.accel.applied = true;
            }
            PhysicalSensor::Compass => {}
        }
        Ok(())
    }
}
