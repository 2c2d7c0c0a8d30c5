//! Mapping from requested logical sensors to the physical engines and DMP
//! features that have to run for them.
//!
//! The local mask is always folded from scratch over the enabled types, so
//! an engine shared by two sensors stays on until the last of them goes.

use crate::types::{FeatureMask, HardwareMask, SensorMask, SensorType};
use crate::{MplError, Result};
use std::ops::{BitOr, BitOrAssign};

/// What the attached hardware can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// DMP firmware is loaded and usable.
    pub dmp: bool,
    pub compass: bool,
    /// Prefer the low-power quaternion for rotation vector without compass.
    pub low_power_quaternion: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            dmp: true,
            compass: true,
            low_power_quaternion: true,
        }
    }
}

/// Physical engines plus DMP features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalMask {
    pub hardware: HardwareMask,
    pub features: FeatureMask,
}

pub type Requirements = LocalMask;

impl LocalMask {
    pub const EMPTY: LocalMask = LocalMask {
        hardware: HardwareMask::empty(),
        features: FeatureMask::empty(),
    };

    pub fn new(hardware: HardwareMask, features: FeatureMask) -> Self {
        Self { hardware, features }
    }

    pub fn is_empty(&self) -> bool {
        self.hardware.is_empty() && self.features.is_empty()
    }

    pub fn contains(&self, other: LocalMask) -> bool {
        self.hardware.contains(other.hardware) && self.features.contains(other.features)
    }
}

impl Default for LocalMask {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BitOr for LocalMask {
    type Output = LocalMask;

    fn bitor(self, rhs: LocalMask) -> LocalMask {
        LocalMask {
            hardware: self.hardware | rhs.hardware,
            features: self.features | rhs.features,
        }
    }
}

impl BitOrAssign for LocalMask {
    fn bitor_assign(&mut self, rhs: LocalMask) {
        *self = *self | rhs;
    }
}

/// Static dependency table.
pub fn requirements_for(sensor: SensorType, caps: &Capabilities) -> Requirements {
    let motion = HardwareMask::ACCEL | HardwareMask::GYRO;
    match sensor {
        SensorType::Gyro | SensorType::RawGyro => {
            LocalMask::new(HardwareMask::GYRO, FeatureMask::empty())
        }
        SensorType::Accelerometer => LocalMask::new(HardwareMask::ACCEL, FeatureMask::empty()),
        SensorType::MagneticField | SensorType::RawMagneticField => {
            LocalMask::new(HardwareMask::COMPASS, FeatureMask::empty())
        }
        SensorType::Orientation => LocalMask::new(
            motion,
            FeatureMask::DISPL_ORIENTATION | FeatureMask::SIX_AXIS_QUATERNION,
        ),
        SensorType::RotationVector => {
            if caps.compass {
                LocalMask::new(
                    motion | HardwareMask::COMPASS,
                    FeatureMask::SIX_AXIS_QUATERNION,
                )
            } else if caps.low_power_quaternion {
                LocalMask::new(motion, FeatureMask::QUATERNION)
            } else {
                LocalMask::new(motion, FeatureMask::SIX_AXIS_QUATERNION)
            }
        }
        SensorType::GameRotationVector | SensorType::LinearAccel | SensorType::Gravity => {
            LocalMask::new(motion, FeatureMask::SIX_AXIS_QUATERNION)
        }
        SensorType::SignificantMotion => {
            LocalMask::new(HardwareMask::ACCEL, FeatureMask::SIGNIFICANT_MOTION)
        }
    }
}

/// Reject types the hardware cannot back. Nothing is mutated.
pub fn check_supported(sensor: SensorType, caps: &Capabilities) -> Result<()> {
    let req = requirements_for(sensor, caps);
    if req.hardware.contains(HardwareMask::COMPASS) && !caps.compass {
        return Err(MplError::Unsupported(format!(
            "{} needs a compass",
            sensor.name()
        )));
    }
    if !req.features.is_empty() && !caps.dmp {
        return Err(MplError::Unsupported(format!(
            "{} needs DMP features {:?}",
            sensor.name(),
            req.features
        )));
    }
    Ok(())
}

/// Minimal resource set for the enabled types.
///
/// `batched` marks types that asked for batching; batch mode is added when
/// any of them is enabled and the DMP can buffer.
pub fn compute_local_mask(master: SensorMask, batched: SensorMask, caps: &Capabilities) -> LocalMask {
    let mut local = master
        .types()
        .map(|t| requirements_for(t, caps))
        .fold(LocalMask::EMPTY, |acc, r| acc | r);

    // the full quaternion carries everything the low-power one does
    if local.features.contains(FeatureMask::SIX_AXIS_QUATERNION) {
        local.features.remove(FeatureMask::QUATERNION);
    }
    if caps.dmp && master.intersects(batched) {
        local.features.insert(FeatureMask::BATCH_MODE);
    }
    if !caps.dmp {
        local.features = FeatureMask::empty();
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caps() -> Capabilities {
        Capabilities::default()
    }

    #[test]
    fn test_orientation_only() {
        let local = compute_local_mask(SensorMask::ORIENTATION, SensorMask::empty(), &caps());
        assert_eq!(local.hardware, HardwareMask::ACCEL | HardwareMask::GYRO);
        assert_eq!(
            local.features,
            FeatureMask::DISPL_ORIENTATION | FeatureMask::SIX_AXIS_QUATERNION
        );
        let off = compute_local_mask(SensorMask::empty(), SensorMask::empty(), &caps());
        assert!(off.is_empty());
    }

    #[test]
    fn test_shared_engine_survives_partial_disable() {
        let both = SensorMask::GYRO | SensorMask::GAME_ROTATION_VECTOR;
        let local = compute_local_mask(both, SensorMask::empty(), &caps());
        assert!(local.hardware.contains(HardwareMask::GYRO));
        let after = compute_local_mask(SensorMask::GAME_ROTATION_VECTOR, SensorMask::empty(), &caps());
        assert!(after.hardware.contains(HardwareMask::GYRO));
        let after = compute_local_mask(SensorMask::GYRO, SensorMask::empty(), &caps());
        assert_eq!(after.hardware, HardwareMask::GYRO);
        assert!(after.features.is_empty());
    }

    #[test]
    fn test_rotation_vector_quaternion_choice() {
        let with_compass = requirements_for(SensorType::RotationVector, &caps());
        assert_eq!(with_compass.features, FeatureMask::SIX_AXIS_QUATERNION);
        assert!(with_compass.hardware.contains(HardwareMask::COMPASS));

        let no_compass = Capabilities { compass: false, ..caps() };
        let lp = requirements_for(SensorType::RotationVector, &no_compass);
        assert_eq!(lp.features, FeatureMask::QUATERNION);

        let no_lp = Capabilities { compass: false, low_power_quaternion: false, ..caps() };
        assert_eq!(
            requirements_for(SensorType::RotationVector, &no_lp).features,
            FeatureMask::SIX_AXIS_QUATERNION
        );
    }

    #[test]
    fn test_full_quaternion_supersedes_low_power() {
        let no_compass = Capabilities { compass: false, ..caps() };
        let local = compute_local_mask(
            SensorMask::ROTATION_VECTOR | SensorMask::GRAVITY,
            SensorMask::empty(),
            &no_compass,
        );
        assert!(local.features.contains(FeatureMask::SIX_AXIS_QUATERNION));
        assert!(!local.features.contains(FeatureMask::QUATERNION));
    }

    #[test]
    fn test_batch_mode_follows_enabled_batched_types() {
        let local = compute_local_mask(SensorMask::ACCELEROMETER, SensorMask::ACCELEROMETER, &caps());
        assert!(local.features.contains(FeatureMask::BATCH_MODE));
        let local = compute_local_mask(SensorMask::GYRO, SensorMask::ACCELEROMETER, &caps());
        assert!(!local.features.contains(FeatureMask::BATCH_MODE));
    }

    #[test]
    fn test_unsupported_without_hardware() {
        let bare = Capabilities { dmp: false, compass: false, low_power_quaternion: false };
        assert!(check_supported(SensorType::Gyro, &bare).is_ok());
        assert!(check_supported(SensorType::MagneticField, &bare).is_err());
        assert!(check_supported(SensorType::GameRotationVector, &bare).is_err());
        assert!(check_supported(SensorType::SignificantMotion, &bare).is_err());
    }

    fn arb_mask() -> impl Strategy<Value = SensorMask> {
        (0u32..(1 << 11)).prop_map(SensorMask::from_bits_truncate)
    }

    proptest! {
        #[test]
        fn prop_fold_matches_union_of_parts(a in arb_mask(), b in arb_mask()) {
            let c = caps();
            let whole = compute_local_mask(a | b, SensorMask::empty(), &c);
            let parts = compute_local_mask(a, SensorMask::empty(), &c)
                | compute_local_mask(b, SensorMask::empty(), &c);
            prop_assert_eq!(whole.hardware, parts.hardware);
            // removing the low-power quaternion is the only non-monotone step
            let mut parts_features = parts.features;
            if parts_features.contains(FeatureMask::SIX_AXIS_QUATERNION) {
                parts_features.remove(FeatureMask::QUATERNION);
            }
            prop_assert_eq!(whole.features, parts_features);
        }

        #[test]
        fn prop_never_both_quaternions(m in arb_mask(), compass in any::<bool>()) {
            let c = Capabilities { compass, ..caps() };
            let local = compute_local_mask(m, SensorMask::empty(), &c);
            prop_assert!(!local.features.contains(
                FeatureMask::QUATERNION | FeatureMask::SIX_AXIS_QUATERNION
            ));
        }

        #[test]
        fn prop_idempotent(m in arb_mask()) {
            let c = caps();
            prop_assert_eq!(
                compute_local_mask(m, SensorMask::empty(), &c),
                compute_local_mask(m | m, SensorMask::empty(), &c)
            );
        }
    }
}
