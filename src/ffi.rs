//! C FFI layer for mplsensor.
//!
//! Opaque handle-based API mirroring the sensor HAL entry points. Status
//! results are 0 or a negative errno. The generated C header is written to
//! `include/mplsensor.h` by cbindgen.

use crate::calibration::NoStorage;
use crate::compass::NoCompass;
use crate::config::MplConfig;
use crate::error::{LastError, EINVAL};
use crate::sensor::MplSensor;
use crate::types::{SensorEvent, SensorType};
use crate::Result;
use std::ffi::{c_char, c_int};

static LAST_ERROR: LastError = LastError::new();

/// Opaque sensor core handle for C consumers.
pub struct MplHandle(MplSensor);

/// Event in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MplEvent {
    /// Sensor handle (index of the logical sensor).
    pub handle: c_int,
    /// Framework sensor type id.
    pub sensor_type: c_int,
    /// Nanoseconds.
    pub timestamp: i64,
    pub values: [f32; 6],
    pub accuracy: i8,
}

impl From<SensorEvent> for MplEvent {
    fn from(e: SensorEvent) -> Self {
        MplEvent {
            handle: e.handle,
            sensor_type: e.sensor.framework_type(),
            timestamp: e.timestamp,
            values: e.values,
            accuracy: e.accuracy,
        }
    }
}

/// Sensor descriptor in C-compatible layout.
#[repr(C)]
pub struct MplSensorInfo {
    /// Null-terminated name.
    pub name: [c_char; 64],
    /// Null-terminated vendor.
    pub vendor: [c_char; 32],
    pub version: c_int,
    pub handle: c_int,
    pub sensor_type: c_int,
    pub max_range: f32,
    pub resolution: f32,
    pub power: f32,
    pub min_delay_us: c_int,
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    for (i, &b) in bytes[..len].iter().enumerate() {
        buf[i] = b as c_char;
    }
    buf
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            e.errno()
        }
    }
}

fn fd_or_minus_one(fd: Option<c_int>) -> c_int {
    fd.unwrap_or(-1)
}

/// Open the sensor core configured through `MPL_*` environment variables.
/// Returns NULL on error (check mpl_last_error()).
#[no_mangle]
pub extern "C" fn mpl_open() -> *mut MplHandle {
    match MplSensor::open(MplConfig::from_env(), NoCompass, NoStorage) {
        Ok(sensor) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(MplHandle(sensor)))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close the core, storing calibration computed during the session.
///
/// # Safety
/// `h` must be a pointer returned by `mpl_open`, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_close(h: *mut MplHandle) {
    if !h.is_null() {
        drop(Box::from_raw(h));
    }
}

/// Enable (`enabled != 0`) or disable a sensor.
///
/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_enable(h: *mut MplHandle, handle: c_int, enabled: c_int) -> c_int {
    if h.is_null() {
        return -EINVAL;
    }
    status((*h).0.enable(handle, enabled != 0))
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_set_delay(h: *mut MplHandle, handle: c_int, ns: i64) -> c_int {
    if h.is_null() {
        return -EINVAL;
    }
    status((*h).0.set_delay(handle, ns))
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_batch(
    h: *mut MplHandle,
    handle: c_int,
    flags: c_int,
    period_ns: i64,
    timeout_ns: i64,
) -> c_int {
    if h.is_null() {
        return -EINVAL;
    }
    status((*h).0.batch(handle, flags, period_ns, timeout_ns))
}

/// Read pending events into `out`. Returns the number written or a
/// negative errno.
///
/// # Safety
/// `out` must point to at least `count` `MplEvent` elements.
#[no_mangle]
pub unsafe extern "C" fn mpl_read_events(h: *mut MplHandle, out: *mut MplEvent, count: c_int) -> c_int {
    if h.is_null() || out.is_null() || count < 0 {
        return -EINVAL;
    }
    let mut events = vec![SensorEvent::new(SensorType::Gyro, 0, [0.0; 6], 0); count as usize];
    match (*h).0.read_events(&mut events) {
        Ok(n) => {
            for (i, e) in events.iter().take(n).enumerate() {
                out.add(i).write(MplEvent::from(*e));
            }
            n as c_int
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            e.errno()
        }
    }
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_has_pending_events(h: *const MplHandle) -> bool {
    !h.is_null() && (*h).0.has_pending_events()
}

/// Main stream descriptor, -1 if none.
///
/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_get_fd(h: *const MplHandle) -> c_int {
    if h.is_null() {
        return -1;
    }
    fd_or_minus_one((*h).0.fd())
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_get_accel_fd(h: *const MplHandle) -> c_int {
    if h.is_null() {
        return -1;
    }
    fd_or_minus_one((*h).0.accel_fd())
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_get_compass_fd(h: *const MplHandle) -> c_int {
    if h.is_null() {
        return -1;
    }
    fd_or_minus_one((*h).0.compass_fd())
}

/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn mpl_get_poll_time(h: *const MplHandle) -> c_int {
    if h.is_null() {
        return -1;
    }
    (*h).0.poll_time()
}

/// Write up to `len` descriptors into `list`. Returns the number of
/// sensors available, which may exceed `len`.
///
/// # Safety
/// `list` must point to at least `len` `MplSensorInfo` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn mpl_populate_sensor_list(
    h: *const MplHandle,
    list: *mut MplSensorInfo,
    len: c_int,
) -> c_int {
    if h.is_null() {
        return -EINVAL;
    }
    let descriptors = (*h).0.populate_sensor_list();
    if !list.is_null() {
        for (i, d) in descriptors.iter().take(len.max(0) as usize).enumerate() {
            list.add(i).write(MplSensorInfo {
                name: str_to_fixed(&d.name),
                vendor: str_to_fixed(&d.vendor),
                version: d.version,
                handle: d.handle,
                sensor_type: d.sensor_type,
                max_range: d.max_range,
                resolution: d.resolution,
                power: d.power,
                min_delay_us: d.min_delay_us,
            });
        }
    }
    descriptors.len() as c_int
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next mplsensor API call.
#[no_mangle]
pub extern "C" fn mpl_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}
