//! # mplsensor - motion co-processor event demultiplexer
//!
//! Sits between an InvenSense MPU/DMP kernel driver and a sensor framework.
//! Provides:
//! - Enable/disable bookkeeping for eleven logical sensors sharing gyro,
//!   accel, compass and the DMP co-processor
//! - Decoding of the interleaved binary motion stream into typed,
//!   calibrated, orientation-corrected events
//! - A callback path for DMP notifications and calibration results that is
//!   safe against the client thread
//! - C FFI for integration with a C/C++ sensor HAL
//!
//! ## Quick Start
//! ```no_run
//! use mplsensor::{MplConfig, MplSensor, NoCompass, NoStorage, SensorEvent, SensorType};
//!
//! let mut sensor = MplSensor::open(MplConfig::from_env(), NoCompass, NoStorage).unwrap();
//! sensor.enable(SensorType::GameRotationVector.handle(), true).unwrap();
//!
//! let mut events = [SensorEvent::new(SensorType::Gyro, 0, [0.0; 6], 0); 16];
//! loop {
//!     let n = sensor.read_events(&mut events).unwrap();
//!     for e in &events[..n] {
//!         println!("{:?} {:?}", e.sensor, &e.values[..4]);
//!     }
//! }
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod sysfs;
pub mod protocol;
pub mod demux;
pub mod mask;
pub mod dmp;
pub mod calibration;
pub mod compass;
pub mod builders;
pub mod descriptor;
pub mod sensor;
pub mod notify;
pub mod ffi;

pub use calibration::{CalibrationBlob, CalibrationStorage, MemoryStorage, NoStorage};
pub use compass::{CompassSensor, IntegratedCompass, NoCompass};
pub use config::MplConfig;
pub use descriptor::SensorDescriptor;
pub use dmp::{DmpState, SmdParams};
pub use error::MplError;
pub use mask::{Capabilities, LocalMask};
pub use notify::{
    AttributeEventSource, BootClock, ChannelEventSource, DmpEventReader, DmpEventSource, EventClock,
};
pub use sensor::{Backends, CallbackHandle, DataSource, MemorySource, MplSensor, ReaderSource};
pub use sysfs::{Attribute, ControlInterface, MemoryControl, SysfsAttributes, SysfsControl};
pub use types::*;

/// Result type alias for mplsensor operations.
pub type Result<T> = std::result::Result<T, MplError>;
