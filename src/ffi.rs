//! C FFI layer for trackerdk.
//!
//! Provides opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/trackerdk.h` by cbindgen.

use crate::config::{FusionConfig, TrackerConfig};
use crate::device::Device;
use crate::error::LastError;
use crate::fusion::SensorFusion;
use crate::stream::TrackerStream;
use crate::types::{HmdInfo, OrientationSample, SensorRange, SensorSample};
use nalgebra::{Quaternion, Vector3};
use std::ffi::{c_char, c_int};
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque device handle for C consumers.
pub struct TdDevice(Device);

/// Opaque tracking stream handle for C consumers.
pub struct TdStream(TrackerStream);

/// Opaque standalone fusion filter.
pub struct TdFusion(SensorFusion);

/// Quaternion in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdQuaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl From<Quaternion<f64>> for TdQuaternion {
    fn from(q: Quaternion<f64>) -> Self {
        Self {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        }
    }
}

/// One sensor sample in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TdSensorSample {
    /// Seconds since the previous sample.
    pub time_delta: f64,
    /// m/s².
    pub acceleration: [f64; 3],
    /// rad/s.
    pub rotation_rate: [f64; 3],
    pub magnetic_field: [f64; 3],
    /// Degrees Celsius.
    pub temperature: f64,
}

impl From<&TdSensorSample> for SensorSample {
    fn from(s: &TdSensorSample) -> Self {
        SensorSample {
            time_delta: s.time_delta,
            acceleration: Vector3::from(s.acceleration),
            rotation_rate: Vector3::from(s.rotation_rate),
            magnetic_field: Vector3::from(s.magnetic_field),
            temperature: s.temperature,
        }
    }
}

/// Fused orientation in C-compatible layout.
#[repr(C)]
pub struct TdOrientation {
    pub orientation: TdQuaternion,
    /// Predicted orientation. Only refreshed by rotating samples, so it can
    /// lag `orientation` after a reset or a tilt correction.
    pub predicted: TdQuaternion,
    /// Euler angles [roll, pitch, yaw] in degrees.
    pub euler_deg: [f64; 3],
    pub acceleration: [f64; 3],
    pub rotation_rate: [f64; 3],
    pub magnetic_field: [f64; 3],
    pub temperature: f64,
    /// Samples fused so far.
    pub stage: u64,
    /// Host steady-clock timestamp in seconds.
    pub host_timestamp_s: f64,
}

impl From<&OrientationSample> for TdOrientation {
    fn from(o: &OrientationSample) -> Self {
        TdOrientation {
            orientation: o.orientation.into(),
            predicted: o.predicted.into(),
            euler_deg: o.euler_deg,
            acceleration: o.sample.acceleration.into(),
            rotation_rate: o.sample.rotation_rate.into(),
            magnetic_field: o.sample.magnetic_field.into(),
            temperature: o.sample.temperature,
            stage: o.stage,
            host_timestamp_s: o.host_timestamp_s,
        }
    }
}

/// Fusion tuning in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TdFusionConfig {
    pub gain: f64,
    pub yaw_multiplier: f64,
    pub enable_gravity: bool,
    pub enable_prediction: bool,
    /// Prediction horizon in seconds.
    pub prediction_dt: f64,
}

impl From<FusionConfig> for TdFusionConfig {
    fn from(c: FusionConfig) -> Self {
        Self {
            gain: c.gain,
            yaw_multiplier: c.yaw_multiplier,
            enable_gravity: c.enable_gravity,
            enable_prediction: c.enable_prediction,
            prediction_dt: c.prediction_dt,
        }
    }
}

impl From<TdFusionConfig> for FusionConfig {
    fn from(c: TdFusionConfig) -> Self {
        Self {
            gain: c.gain,
            yaw_multiplier: c.yaw_multiplier,
            enable_gravity: c.enable_gravity,
            enable_prediction: c.enable_prediction,
            prediction_dt: c.prediction_dt,
        }
    }
}

/// Device info in C-compatible layout.
#[repr(C)]
pub struct TdDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Null-terminated bus identifier, e.g. "001:004".
    pub bus_id: [c_char; 32],
    pub bus_number: u8,
    pub address: u8,
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

fn c_char_to_string(buf: &[c_char]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let bytes: Vec<u8> = buf[..end].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).to_string()
}

/// List connected trackers.
///
/// Writes up to `max` entries into `out`. Returns the number of entries
/// written, or -1 on error.
///
/// # Safety
/// `out` must point to an array of at least `max` `TdDeviceInfo` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn td_list_devices(out: *mut TdDeviceInfo, max: c_int) -> c_int {
    match crate::device::list_devices() {
        Ok(devices) => {
            let count = devices.len().min(max.max(0) as usize);
            if !out.is_null() {
                for (i, dev) in devices.iter().take(count).enumerate() {
                    let info = TdDeviceInfo {
                        vendor_id: dev.vendor_id,
                        product_id: dev.product_id,
                        bus_id: str_to_fixed(&dev.bus_id),
                        bus_number: dev.bus_number,
                        address: dev.device_address,
                    };
                    out.add(i).write(info);
                }
            }
            count as c_int
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Open and bring up the first available tracker.
/// Returns NULL on error (check td_last_error()).
#[no_mangle]
pub extern "C" fn td_open_first() -> *mut TdDevice {
    match Device::open_first() {
        Ok(dev) => Box::into_raw(Box::new(TdDevice(dev))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Open a specific tracker by its info.
/// Returns NULL on error.
///
/// # Safety
/// `info` must point to a valid `TdDeviceInfo`, or be null.
#[no_mangle]
pub unsafe extern "C" fn td_open_device(info: *const TdDeviceInfo) -> *mut TdDevice {
    if info.is_null() {
        return std::ptr::null_mut();
    }
    let info = &*info;

    let dev_info = crate::types::DeviceInfo {
        vendor_id: info.vendor_id,
        product_id: info.product_id,
        bus_id: c_char_to_string(&info.bus_id),
        bus_number: info.bus_number,
        device_address: info.address,
    };

    match Device::open(&dev_info) {
        Ok(dev) => Box::into_raw(Box::new(TdDevice(dev))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close a device and free its resources.
///
/// # Safety
/// `dev` must be a pointer returned by `td_open_first` or `td_open_device`, or null.
#[no_mangle]
pub unsafe extern "C" fn td_close_device(dev: *mut TdDevice) {
    if !dev.is_null() {
        drop(Box::from_raw(dev));
    }
}

/// Copy the display info read during bring-up. Returns 0 on success, -1 if
/// the device did not report it.
///
/// # Safety
/// `dev` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn td_device_hmd_info(dev: *const TdDevice, out: *mut HmdInfo) -> c_int {
    if dev.is_null() || out.is_null() {
        return -1;
    }
    match (*dev).0.hmd_info() {
        Some(info) => {
            out.write(*info);
            0
        }
        None => -1,
    }
}

/// Copy the sensor range read during bring-up. Returns 0 on success, -1 if
/// the device did not report it.
///
/// # Safety
/// `dev` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn td_device_sensor_range(
    dev: *const TdDevice,
    out: *mut SensorRange,
) -> c_int {
    if dev.is_null() || out.is_null() {
        return -1;
    }
    match (*dev).0.sensor_range() {
        Some(range) => {
            out.write(*range);
            0
        }
        None => -1,
    }
}

/// Start tracking. Configuration is read from `TRACKERDK_*` environment
/// variables.
///
/// The device handle is consumed and must not be used or closed afterwards,
/// whether or not the call succeeds. Returns NULL on error.
///
/// # Safety
/// `dev` must be a pointer returned by `td_open_first` or `td_open_device`, or null.
#[no_mangle]
pub unsafe extern "C" fn td_start_tracking(dev: *mut TdDevice) -> *mut TdStream {
    if dev.is_null() {
        return std::ptr::null_mut();
    }
    let dev = Box::from_raw(dev);

    match dev.0.start_tracking(TrackerConfig::from_env()) {
        Ok(stream) => Box::into_raw(Box::new(TdStream(stream))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Receive the next orientation with timeout.
/// `timeout_ms`: timeout in milliseconds (0 = try without blocking, -1 = block forever).
/// Returns 0 on success, -1 on error/timeout.
///
/// # Safety
/// `stream` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn td_recv(
    stream: *mut TdStream,
    out: *mut TdOrientation,
    timeout_ms: c_int,
) -> c_int {
    if stream.is_null() || out.is_null() {
        return -1;
    }
    let stream = &*stream;

    let result = if timeout_ms == 0 {
        stream.0.try_recv().ok_or(crate::TrackerError::Timeout)
    } else if timeout_ms < 0 {
        stream.0.recv()
    } else {
        stream
            .0
            .recv_timeout(Duration::from_millis(timeout_ms as u64))
    };

    match result {
        Ok(sample) => {
            out.write(TdOrientation::from(&sample));
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Reset the stream's orientation to identity. Returns 0 on success, -1 if
/// the stream has stopped.
///
/// # Safety
/// `stream` must be a valid stream pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn td_reset_orientation(stream: *const TdStream) -> c_int {
    if stream.is_null() {
        return -1;
    }
    match (*stream).0.reset_orientation() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Check if the tracking stream is still active.
///
/// # Safety
/// `stream` must be a valid stream pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn td_stream_is_active(stream: *const TdStream) -> bool {
    if stream.is_null() {
        return false;
    }
    (*stream).0.is_active()
}

/// Stop a tracking stream and free its resources.
///
/// # Safety
/// `stream` must be a pointer returned by `td_start_tracking`, or null.
#[no_mangle]
pub unsafe extern "C" fn td_stop_tracking(stream: *mut TdStream) {
    if !stream.is_null() {
        drop(Box::from_raw(stream));
    }
}

/// Default fusion tuning.
#[no_mangle]
pub extern "C" fn td_fusion_default_config() -> TdFusionConfig {
    FusionConfig::default().into()
}

/// Create a standalone fusion filter. A null `config` uses the defaults.
///
/// # Safety
/// `config` must point to a valid `TdFusionConfig`, or be null.
#[no_mangle]
pub unsafe extern "C" fn td_fusion_create(config: *const TdFusionConfig) -> *mut TdFusion {
    let config = if config.is_null() {
        FusionConfig::default()
    } else {
        (*config).into()
    };
    Box::into_raw(Box::new(TdFusion(SensorFusion::new(config))))
}

/// Fold one sensor sample into the filter.
///
/// # Safety
/// `fusion` and `sample` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn td_fusion_handle_sample(
    fusion: *mut TdFusion,
    sample: *const TdSensorSample,
) {
    if fusion.is_null() || sample.is_null() {
        return;
    }
    (*fusion).0.handle_sample(&SensorSample::from(&*sample));
}

/// Current (and predicted) orientation of the filter. Either output may be null.
///
/// # Safety
/// `fusion` must be a valid fusion pointer or null; outputs must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn td_fusion_orientation(
    fusion: *const TdFusion,
    orientation: *mut TdQuaternion,
    predicted: *mut TdQuaternion,
) -> c_int {
    if fusion.is_null() {
        return -1;
    }
    let fusion = &(*fusion).0;
    if !orientation.is_null() {
        orientation.write(fusion.orientation().into());
    }
    if !predicted.is_null() {
        predicted.write(fusion.predicted_orientation().into());
    }
    0
}

/// Reset the filter's orientation to identity.
///
/// # Safety
/// `fusion` must be a valid fusion pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn td_fusion_reset(fusion: *mut TdFusion) {
    if !fusion.is_null() {
        (*fusion).0.reset();
    }
}

/// Free a fusion filter.
///
/// # Safety
/// `fusion` must be a pointer returned by `td_fusion_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn td_fusion_free(fusion: *mut TdFusion) {
    if !fusion.is_null() {
        drop(Box::from_raw(fusion));
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next failing trackerdk call.
#[no_mangle]
pub extern "C" fn td_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_string_round_trip() {
        let buf: [c_char; 8] = str_to_fixed("001:004-long");
        assert_eq!(buf[7], 0);
        assert_eq!(c_char_to_string(&buf), "001:004");
    }

    #[test]
    fn test_fusion_handle() {
        unsafe {
            let mut config = td_fusion_default_config();
            config.enable_gravity = false;
            let fusion = td_fusion_create(&config);
            assert!(!fusion.is_null());

            let sample = TdSensorSample {
                time_delta: 0.001,
                acceleration: [0.0; 3],
                rotation_rate: [0.0, 1.0, 0.0],
                magnetic_field: [0.0; 3],
                temperature: 20.0,
            };
            for _ in 0..100 {
                td_fusion_handle_sample(fusion, &sample);
            }

            let mut q = TdQuaternion { x: 0.0, y: 0.0, z: 0.0, w: 0.0 };
            assert_eq!(td_fusion_orientation(fusion, &mut q, std::ptr::null_mut()), 0);
            assert!((q.y - 0.05f64.sin()).abs() < 1e-9);
            assert!((q.w - 0.05f64.cos()).abs() < 1e-9);

            td_fusion_reset(fusion);
            td_fusion_orientation(fusion, &mut q, std::ptr::null_mut());
            assert_eq!(q, TdQuaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 });

            td_fusion_free(fusion);
        }
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            assert_eq!(td_fusion_orientation(std::ptr::null(), std::ptr::null_mut(), std::ptr::null_mut()), -1);
            assert!(!td_stream_is_active(std::ptr::null()));
            assert_eq!(td_reset_orientation(std::ptr::null()), -1);
            assert!(td_start_tracking(std::ptr::null_mut()).is_null());
        }
    }
}
