//! # trackerdk - Rust driver for the Tracker DK head-tracking sensor
//!
//! Userspace driver built on rusb, with hidapi for feature reports. Provides:
//! - Device discovery and USB bring-up (descriptors, strings, HID report descriptor)
//! - Telemetry decoding of the packed 21-bit sensor triplets at 1 kHz
//! - Gyro integration with gravity tilt correction and optional prediction
//! - C FFI for integration with C/C++/Unity/Swift
//!
//! ## Quick Start
//! ```no_run
//! use trackerdk::{Device, TrackerConfig};
//! use std::time::Duration;
//!
//! let device = Device::open_first().unwrap();
//! println!("Bus: {}", device.bus_id());
//!
//! let stream = device.start_tracking(TrackerConfig::from_env()).unwrap();
//! for _ in 0..100 {
//!     let sample = stream.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("euler: {:?}", sample.euler_deg);
//! }
//! ```

pub mod error;
pub mod config;
pub mod types;
pub mod protocol;
pub mod transport;
pub mod descriptor;
pub mod report_descriptor;
pub mod telemetry;
pub mod fusion;
pub mod hid;
pub mod device;
pub mod stream;
pub mod ffi;

pub use config::{DecoderConfig, FusionConfig, TrackerConfig};
pub use device::{list_devices, Device};
pub use error::{TrackerError, TransportError};
pub use fusion::SensorFusion;
pub use stream::TrackerStream;
pub use telemetry::TelemetryDecoder;
pub use transport::UsbTransport;
pub use types::*;

/// Result type alias for trackerdk operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
