use crate::types::{HmdInfo, SensorConfig, SensorConfigFlags, SensorRange};
use crate::TrackerError;

// -- USB identifiers --
pub const VID: u16 = 0x2833;
pub const PID: u16 = 0x0001;

// -- Standard requests --
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;

// -- GET_DESCRIPTOR wValue high bytes --
pub const DESCRIPTOR_DEVICE: u16 = 0x0100;
pub const DESCRIPTOR_CONFIGURATION: u16 = 0x0200;
pub const DESCRIPTOR_STRING: u16 = 0x0300;
pub const DESCRIPTOR_HID_REPORT: u16 = 0x2200;

/// Upper bound requested for a configuration descriptor bundle.
pub const CONFIGURATION_BUFFER_SIZE: usize = 2048;
/// Upper bound requested for a string descriptor.
pub const STRING_BUFFER_SIZE: usize = 256;

// -- HID class requests --
pub const HID_GET_REPORT: u8 = 0x01;
pub const HID_SET_REPORT: u8 = 0x09;
/// wValue high byte selecting a feature report.
pub const HID_REPORT_TYPE_FEATURE: u16 = 0x0300;

// -- Feature report IDs --
pub const REPORT_SENSOR_CONFIG: u8 = 2;
pub const REPORT_SENSOR_RANGE: u8 = 4;
pub const REPORT_KEEP_ALIVE: u8 = 8;
pub const REPORT_HMD_INFO: u8 = 9;

// -- Feature report sizes --
pub const SENSOR_CONFIG_SIZE: usize = 8;
pub const SENSOR_RANGE_SIZE: usize = 8;
pub const KEEP_ALIVE_SIZE: usize = 4;
pub const HMD_INFO_SIZE: usize = 56;

/// Keep-alive interval requested from the device, in milliseconds.
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u16 = 10_000;

/// Build a feature-report wValue.
pub fn feature_report_value(report_id: u8) -> u16 {
    HID_REPORT_TYPE_FEATURE | report_id as u16
}

fn require_len(data: &[u8], report_id: u8, expected: usize) -> crate::Result<()> {
    if data.len() < expected {
        return Err(TrackerError::InvalidFeatureReport {
            report_id,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Micrometers on the wire, meters in the API.
fn micrometers(data: &[u8], offset: usize) -> f64 {
    le_u32(data, offset) as f64 * 1e-6
}

impl SensorRange {
    /// Parse an 8-byte sensor range report.
    ///
    /// Layout: `[report_id, cmd_lo, cmd_hi, accel, gyro_lo, gyro_hi, mag_lo, mag_hi]`
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        require_len(data, REPORT_SENSOR_RANGE, SENSOR_RANGE_SIZE)?;
        Ok(SensorRange {
            command_id: le_u16(data, 1),
            accel_scale: data[3],
            gyro_scale: le_u16(data, 4),
            mag_scale: le_u16(data, 6),
        })
    }
}

impl HmdInfo {
    /// Parse the 56-byte display info report.
    ///
    /// Layout:
    /// - `[1..3]`: command id
    /// - `[3]`: distortion type
    /// - `[4..8]`: horizontal/vertical resolution (u16)
    /// - `[8..24]`: screen size h/v, vertical center, lens separation (u32 µm)
    /// - `[24..32]`: eye-to-screen distances (u32 µm)
    /// - `[32..56]`: six IEEE-754 distortion coefficients
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        require_len(data, REPORT_HMD_INFO, HMD_INFO_SIZE)?;

        let mut distortion_k = [0f32; 6];
        for (i, k) in distortion_k.iter_mut().enumerate() {
            *k = f32::from_bits(le_u32(data, 32 + 4 * i));
        }

        Ok(HmdInfo {
            command_id: le_u16(data, 1),
            distortion_type: data[3],
            resolution_horizontal: le_u16(data, 4),
            resolution_vertical: le_u16(data, 6),
            screen_size_horizontal: micrometers(data, 8),
            screen_size_vertical: micrometers(data, 12),
            screen_center_vertical: micrometers(data, 16),
            lens_separation: micrometers(data, 20),
            eye_to_screen_distance: [micrometers(data, 24), micrometers(data, 28)],
            distortion_k,
        })
    }
}

impl SensorConfig {
    /// Parse the 8-byte sensor config report.
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        require_len(data, REPORT_SENSOR_CONFIG, SENSOR_CONFIG_SIZE)?;
        Ok(SensorConfig {
            command_id: le_u16(data, 1),
            flags: SensorConfigFlags::from_bits_retain(data[3]),
            packet_interval: data[4],
            keep_alive_interval_ms: le_u16(data, 5),
        })
    }

    /// Encode back into the wire layout for SET_REPORT.
    pub fn encode(&self) -> [u8; SENSOR_CONFIG_SIZE] {
        let mut buf = [0u8; SENSOR_CONFIG_SIZE];
        buf[0] = REPORT_SENSOR_CONFIG;
        buf[1..3].copy_from_slice(&self.command_id.to_le_bytes());
        buf[3] = self.flags.bits();
        buf[4] = self.packet_interval;
        buf[5..7].copy_from_slice(&self.keep_alive_interval_ms.to_le_bytes());
        buf
    }
}

/// Build the keep-alive feature report payload.
/// Format: `[0x00, 0x00, interval_lo, interval_hi]`
pub fn build_keep_alive(interval_ms: u16) -> [u8; KEEP_ALIVE_SIZE] {
    let [lo, hi] = interval_ms.to_le_bytes();
    [0, 0, lo, hi]
}

/// Convert an orientation quaternion to Euler angles [roll, pitch, yaw] in degrees.
///
/// The tracker frame is Y-up: yaw turns about Y, pitch about X, roll about Z.
pub fn quaternion_to_euler(w: f64, x: f64, y: f64, z: f64) -> [f64; 3] {
    let roll = (2.0 * (x * y + w * z)).atan2(1.0 - 2.0 * (x * x + z * z));
    let pitch = (2.0 * (w * x - y * z)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (x * z + w * y)).atan2(1.0 - 2.0 * (x * x + y * y));
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}
