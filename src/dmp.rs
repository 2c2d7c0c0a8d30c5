//! DMP feature state machine.
//!
//! The cached model only ever moves after a control write succeeded, so on
//! error it describes the last state the device is known to be in.

use crate::sysfs::{read_attr, write_attr, Attribute, ControlInterface};
use crate::types::{FeatureMask, DMP_FEATURE_MASK};
use crate::{MplError, Result};

/// Feature bits in the order they are armed.
const FEATURE_ORDER: [FeatureMask; 7] = [
    FeatureMask::QUATERNION,
    FeatureMask::SIX_AXIS_QUATERNION,
    FeatureMask::PED_QUATERNION,
    FeatureMask::DISPL_ORIENTATION,
    FeatureMask::SIGNIFICANT_MOTION,
    FeatureMask::PEDOMETER,
    FeatureMask::BATCH_MODE,
];

/// Features that raise DMP event interrupts.
const EVENT_FEATURES: FeatureMask =
    FeatureMask::DISPL_ORIENTATION.union(FeatureMask::SIGNIFICANT_MOTION);

const BOTH_QUATERNIONS: FeatureMask =
    FeatureMask::QUATERNION.union(FeatureMask::SIX_AXIS_QUATERNION);

fn feature_attribute(feature: FeatureMask) -> Option<Attribute> {
    let attr = match feature {
        f if f == FeatureMask::QUATERNION => Attribute::QuaternionOn,
        f if f == FeatureMask::SIX_AXIS_QUATERNION => Attribute::SixAxisQuaternionOn,
        f if f == FeatureMask::PED_QUATERNION => Attribute::PedQuaternionOn,
        f if f == FeatureMask::DISPL_ORIENTATION => Attribute::DisplayOrientationOn,
        f if f == FeatureMask::SIGNIFICANT_MOTION => Attribute::SmdEnable,
        f if f == FeatureMask::PEDOMETER => Attribute::PedometerOn,
        f if f == FeatureMask::BATCH_MODE => Attribute::BatchMode,
        _ => return None,
    };
    Some(attr)
}

/// Significant-motion detector tuning written before the feature is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmdParams {
    pub motion_threshold: u32,
    pub delay_threshold: u32,
    pub delay_threshold2: u32,
}

impl Default for SmdParams {
    fn default() -> Self {
        Self {
            motion_threshold: 3000,
            delay_threshold: 5,
            delay_threshold2: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmpState {
    /// Firmware not loaded.
    Off,
    LoadedIdle,
    Armed(FeatureMask),
}

#[derive(Debug, Clone)]
pub struct DmpStateMachine {
    firmware_loaded: bool,
    master_on: bool,
    event_int_on: bool,
    armed: FeatureMask,
    smd: SmdParams,
}

impl DmpStateMachine {
    pub fn new(smd: SmdParams) -> Self {
        Self {
            firmware_loaded: false,
            master_on: false,
            event_int_on: false,
            armed: FeatureMask::empty(),
            smd,
        }
    }

    pub fn state(&self) -> DmpState {
        if !self.firmware_loaded {
            DmpState::Off
        } else if self.armed.is_empty() {
            DmpState::LoadedIdle
        } else {
            DmpState::Armed(self.armed)
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.firmware_loaded
    }

    pub fn is_master_on(&self) -> bool {
        self.master_on
    }

    pub fn armed(&self) -> FeatureMask {
        self.armed
    }

    /// Load the firmware image once. Repeated calls are no-ops as soon as
    /// the kernel reports it loaded.
    pub fn load_firmware(&mut self, ctl: &mut dyn ControlInterface, image: &[u8]) -> Result<()> {
        if self.firmware_loaded {
            return Ok(());
        }
        if read_attr(ctl, Attribute::FirmwareLoaded)? == 1 {
            log::info!("DMP firmware already loaded");
            self.firmware_loaded = true;
            return Ok(());
        }
        if image.is_empty() {
            return Err(MplError::Unsupported("no DMP firmware image".into()));
        }

        log::info!("loading DMP firmware ({} bytes)", image.len());
        ctl.write_bytes(Attribute::DmpFirmware, image)
            .map_err(|e| MplError::device(Attribute::DmpFirmware, e))?;
        match read_attr(ctl, Attribute::FirmwareLoaded)? {
            1 => {
                self.firmware_loaded = true;
                Ok(())
            }
            other => Err(MplError::device(
                Attribute::FirmwareLoaded,
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("firmware_loaded reads {} after load", other),
                ),
            )),
        }
    }

    /// Arm one feature. Arming one quaternion kind disarms the other first.
    pub fn enable_feature(&mut self, ctl: &mut dyn ControlInterface, feature: FeatureMask) -> Result<()> {
        self.check_single(feature)?;
        self.check_loaded()?;
        if self.armed.contains(feature) {
            return Ok(());
        }
        if BOTH_QUATERNIONS.contains(feature) {
            let other = BOTH_QUATERNIONS.difference(feature);
            if self.armed.contains(other) {
                self.disarm(ctl, other)?;
            }
        }
        self.set_master(ctl, true)?;
        self.arm(ctl, feature)?;
        self.sync_event_interrupt(ctl)
    }

    /// Disarm one feature; the DMP master goes off with the last feature.
    pub fn disable_feature(&mut self, ctl: &mut dyn ControlInterface, feature: FeatureMask) -> Result<()> {
        self.check_single(feature)?;
        if !self.armed.contains(feature) {
            return Ok(());
        }
        self.disarm(ctl, feature)?;
        self.sync_event_interrupt(ctl)?;
        if self.armed.is_empty() {
            self.set_master(ctl, false)?;
        }
        Ok(())
    }

    /// Move the armed set to `target`, disarming before arming.
    pub fn apply(&mut self, ctl: &mut dyn ControlInterface, target: FeatureMask) -> Result<()> {
        if !DMP_FEATURE_MASK.contains(target) {
            return Err(MplError::Unsupported(format!(
                "features {:?} cannot be armed",
                target.difference(DMP_FEATURE_MASK)
            )));
        }
        if target.contains(BOTH_QUATERNIONS) {
            return Err(MplError::InvalidArgument(
                "low-power and full quaternion are mutually exclusive".into(),
            ));
        }
        if !target.is_empty() {
            self.check_loaded()?;
        }
        // a failed arm can leave the master on with nothing armed
        if target == self.armed && self.master_on != target.is_empty() {
            return Ok(());
        }
        log::debug!("DMP features {:?} -> {:?}", self.armed, target);

        for f in FEATURE_ORDER {
            if self.armed.contains(f) && !target.contains(f) {
                self.disarm(ctl, f)?;
            }
        }
        if !target.is_empty() {
            self.set_master(ctl, true)?;
        }
        for f in FEATURE_ORDER {
            if target.contains(f) && !self.armed.contains(f) {
                self.arm(ctl, f)?;
            }
        }
        self.sync_event_interrupt(ctl)?;
        if target.is_empty() {
            self.set_master(ctl, false)?;
        }
        Ok(())
    }

    /// Rebuild the model from the device after an error.
    pub fn resync(&mut self, ctl: &mut dyn ControlInterface) -> Result<()> {
        let loaded = read_attr(ctl, Attribute::FirmwareLoaded)? == 1;
        let master = read_attr(ctl, Attribute::DmpOn)? != 0;
        let mut armed = FeatureMask::empty();
        for f in FEATURE_ORDER {
            if let Some(attr) = feature_attribute(f) {
                if read_attr(ctl, attr)? != 0 {
                    armed |= f;
                }
            }
        }
        let event_int = read_attr(ctl, Attribute::DmpEventIntOn)? != 0;

        self.firmware_loaded = loaded;
        self.master_on = master;
        self.armed = armed;
        self.event_int_on = event_int;
        log::info!("DMP resync: loaded={} master={} armed={:?}", loaded, master, armed);
        Ok(())
    }

    fn check_single(&self, feature: FeatureMask) -> Result<()> {
        if feature.bits().count_ones() != 1 || feature_attribute(feature).is_none() {
            return Err(MplError::InvalidArgument(format!(
                "{:?} is not a single DMP feature",
                feature
            )));
        }
        Ok(())
    }

    fn check_loaded(&self) -> Result<()> {
        if self.firmware_loaded {
            Ok(())
        } else {
            Err(MplError::Unsupported("DMP firmware not loaded".into()))
        }
    }

    fn set_master(&mut self, ctl: &mut dyn ControlInterface, on: bool) -> Result<()> {
        if self.master_on == on {
            return Ok(());
        }
        if on {
            write_attr(ctl, Attribute::DmpOn, 1)?;
            self.master_on = true;
            write_attr(ctl, Attribute::DmpIntOn, 1)?;
        } else {
            write_attr(ctl, Attribute::DmpIntOn, 0)?;
            write_attr(ctl, Attribute::DmpOn, 0)?;
            self.master_on = false;
        }
        Ok(())
    }

    fn sync_event_interrupt(&mut self, ctl: &mut dyn ControlInterface) -> Result<()> {
        let want = self.armed.intersects(EVENT_FEATURES);
        if want != self.event_int_on {
            write_attr(ctl, Attribute::DmpEventIntOn, want as i64)?;
            self.event_int_on = want;
        }
        Ok(())
    }

    fn arm(&mut self, ctl: &mut dyn ControlInterface, feature: FeatureMask) -> Result<()> {
        debug_assert!(self.master_on);
        if feature == FeatureMask::SIGNIFICANT_MOTION {
            write_attr(ctl, Attribute::SmdThreshold, self.smd.motion_threshold as i64)?;
            write_attr(ctl, Attribute::SmdDelayThreshold, self.smd.delay_threshold as i64)?;
            write_attr(ctl, Attribute::SmdDelayThreshold2, self.smd.delay_threshold2 as i64)?;
        }
        if let Some(attr) = feature_attribute(feature) {
            write_attr(ctl, attr, 1)?;
        }
        self.armed.insert(feature);
        Ok(())
    }

    fn disarm(&mut self, ctl: &mut dyn ControlInterface, feature: FeatureMask) -> Result<()> {
        if let Some(attr) = feature_attribute(feature) {
            write_attr(ctl, attr, 0)?;
        }
        self.armed.remove(feature);
        Ok(())
    }
}
