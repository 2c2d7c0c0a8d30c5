use crate::sysfs::Attribute;
use std::fmt;

pub const EIO: i32 = 5;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;

/// Errors surfaced by the sensor core.
///
/// Record-level protocol errors never appear here: the demultiplexer skips
/// unknown tags and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum MplError {
    #[error("invalid sensor handle {0}")]
    InvalidHandle(i32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("no such device: {0}")]
    NoDevice(String),

    #[error("control attribute {attribute:?} failed: {source}")]
    Device {
        attribute: Attribute,
        #[source]
        source: std::io::Error,
    },

    #[error("data read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl MplError {
    pub(crate) fn device(attribute: Attribute, source: std::io::Error) -> Self {
        MplError::Device { attribute, source }
    }

    /// Negative errno for the host framework.
    pub fn errno(&self) -> i32 {
        match self {
            MplError::InvalidHandle(_)
            | MplError::InvalidArgument(_)
            | MplError::Unsupported(_) => -EINVAL,
            MplError::NoDevice(_) => -ENODEV,
            MplError::Device { .. } | MplError::Io(_) => -EIO,
        }
    }

    /// True for errors rejected before any state was touched.
    pub fn is_configuration(&self) -> bool {
        self.errno() == -EINVAL
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &MplError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
