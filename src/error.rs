use std::fmt;

/// Failure kinds reported by the USB layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    Pipe,

    #[error("device disconnected")]
    NoDevice,

    #[error("entity not found")]
    NotFound,

    #[error("resource busy")]
    Busy,

    #[error("transfer overflow")]
    Overflow,

    #[error("I/O error")]
    Io,

    #[error("invalid parameter")]
    InvalidParam,

    #[error("access denied")]
    Access,

    #[error("{0}")]
    Other(String),
}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Pipe => TransportError::Pipe,
            rusb::Error::NoDevice => TransportError::NoDevice,
            rusb::Error::NotFound => TransportError::NotFound,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Overflow => TransportError::Overflow,
            rusb::Error::Io => TransportError::Io,
            rusb::Error::InvalidParam => TransportError::InvalidParam,
            rusb::Error::Access => TransportError::Access,
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// Errors that can occur when bringing up or streaming from the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("USB transfer failed: {0}")]
    Transport(#[from] TransportError),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("Device not found (VID=2833 PID=0001)")]
    DeviceNotFound,

    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Malformed HID report descriptor: {0}")]
    MalformedReportDescriptor(String),

    #[error("Failed to resolve string descriptor {0}")]
    StringResolution(u8),

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Telemetry transfer too short: expected {expected} bytes, got {actual}")]
    TelemetryTooShort { expected: usize, actual: usize },

    #[error("Feature report {report_id} too short: expected {expected} bytes, got {actual}")]
    InvalidFeatureReport {
        report_id: u8,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracking stream stopped")]
    StreamStopped,

    #[error("Timeout waiting for data")]
    Timeout,
}

impl From<rusb::Error> for TrackerError {
    fn from(err: rusb::Error) -> Self {
        TrackerError::Transport(err.into())
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

    pub fn set(&self, err: &TrackerError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(TransportError::from(rusb::Error::Timeout), TransportError::Timeout);
        assert_eq!(TransportError::from(rusb::Error::NoDevice), TransportError::NoDevice);
        assert!(matches!(
            TransportError::from(rusb::Error::Other),
            TransportError::Other(_)
        ));
    }

    #[test]
    fn test_tracker_error_from_rusb() {
        let err: TrackerError = rusb::Error::Pipe.into();
        assert!(matches!(err, TrackerError::Transport(TransportError::Pipe)));
    }
}
