use nalgebra::{Quaternion, Vector3};

/// One physical sensor reading, already scaled to SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Seconds elapsed since the previous sample.
    pub time_delta: f64,
    /// Acceleration in m/s².
    pub acceleration: Vector3<f64>,
    /// Angular rate in rad/s.
    pub rotation_rate: Vector3<f64>,
    /// Magnetic field, world axis ordering.
    pub magnetic_field: Vector3<f64>,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
}

impl Default for SensorSample {
    fn default() -> Self {
        Self {
            time_delta: 0.0,
            acceleration: Vector3::zeros(),
            rotation_rate: Vector3::zeros(),
            magnetic_field: Vector3::zeros(),
            temperature: 0.0,
        }
    }
}

/// Fused orientation emitted by the tracking stream after every sample.
#[derive(Debug, Clone, Copy)]
pub struct OrientationSample {
    /// Integrated orientation.
    pub orientation: Quaternion<f64>,
    /// Short-horizon predicted orientation. Only refreshed by samples with
    /// nonzero angular rate, before tilt correction; it can lag `orientation`
    /// even with prediction disabled.
    pub predicted: Quaternion<f64>,
    /// Euler angles [roll, pitch, yaw] of `orientation` in degrees.
    pub euler_deg: [f64; 3],
    /// Sensor sample that produced this estimate.
    pub sample: SensorSample,
    /// Number of samples fused so far.
    pub stage: u64,
    /// Host steady-clock timestamp in seconds since the stream started.
    pub host_timestamp_s: f64,
}

/// Tracker found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Bus/address identifier, e.g. `001:004`.
    pub bus_id: String,
    pub bus_number: u8,
    pub device_address: u8,
}

/// Sensor range feature report (report ID 4).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorRange {
    pub command_id: u16,
    /// Accelerometer range code (g).
    pub accel_scale: u8,
    /// Gyroscope range code (deg/s).
    pub gyro_scale: u16,
    /// Magnetometer range code (milligauss).
    pub mag_scale: u16,
}

/// Display geometry feature report (report ID 9).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmdInfo {
    pub command_id: u16,
    pub distortion_type: u8,
    pub resolution_horizontal: u16,
    pub resolution_vertical: u16,
    /// Screen size in meters.
    pub screen_size_horizontal: f64,
    pub screen_size_vertical: f64,
    pub screen_center_vertical: f64,
    pub lens_separation: f64,
    /// Left/right eye-to-screen distance in meters.
    pub eye_to_screen_distance: [f64; 2],
    pub distortion_k: [f32; 6],
}

bitflags::bitflags! {
    /// Flags carried by the sensor config feature report (report ID 2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct SensorConfigFlags: u8 {
        const RAW_MODE          = 1 << 0;
        const CALIBRATION_TEST  = 1 << 1;
        const USE_CALIBRATION   = 1 << 2;
        const AUTO_CALIBRATION  = 1 << 3;
        const MOTION_KEEP_ALIVE = 1 << 4;
        const COMMAND_KEEP_ALIVE = 1 << 5;
        const SENSOR_COORDINATES = 1 << 6;
    }
}

/// Sensor config feature report (report ID 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    pub command_id: u16,
    pub flags: SensorConfigFlags,
    pub packet_interval: u8,
    pub keep_alive_interval_ms: u16,
}
