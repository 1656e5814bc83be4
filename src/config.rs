//! Runtime configuration.
//!
//! Every struct has compiled-in defaults matching the tracker firmware, and a
//! `from_env()` constructor that overrides individual fields from
//! `TRACKERDK_*` environment variables.

use std::time::Duration;

/// Tuning of the orientation filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Proportional gain of the gravity tilt correction.
    pub gain: f64,
    /// Multiplier applied to the vertical (yaw) angular rate.
    pub yaw_multiplier: f64,
    pub enable_gravity: bool,
    pub enable_prediction: bool,
    /// Prediction horizon in seconds.
    pub prediction_dt: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gain: 0.05,
            yaw_multiplier: 1.0,
            enable_gravity: true,
            enable_prediction: false,
            prediction_dt: 0.03,
        }
    }
}

impl FusionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            gain: read_env_f64("TRACKERDK_GAIN", d.gain),
            yaw_multiplier: read_env_f64("TRACKERDK_YAW_MULT", d.yaw_multiplier),
            enable_gravity: read_env_bool("TRACKERDK_GRAVITY", d.enable_gravity),
            enable_prediction: read_env_bool("TRACKERDK_PREDICTION", d.enable_prediction),
            prediction_dt: read_env_f64("TRACKERDK_PREDICTION_DT", d.prediction_dt),
        }
    }
}

/// Unit scale constants applied by the telemetry decoder on top of the
/// fixed 1e-4 raw-to-SI factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    pub accel_scale: f64,
    pub gyro_scale: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            accel_scale: 1.0,
            gyro_scale: 10.0,
        }
    }
}

impl DecoderConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            accel_scale: read_env_f64("TRACKERDK_ACCEL_SCALE", d.accel_scale),
            gyro_scale: read_env_f64("TRACKERDK_GYRO_SCALE", d.gyro_scale),
        }
    }
}

/// Settings for a tracking session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub fusion: FusionConfig,
    pub decoder: DecoderConfig,
    /// Interval written to the device in the keep-alive report.
    pub keep_alive_interval: Duration,
    /// Elapsed time after which the stream re-sends the keep-alive.
    pub keep_alive_trigger: Duration,
    /// Timeout of a single interrupt read.
    pub read_timeout: Duration,
    /// Capacity of the orientation channel.
    pub channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            decoder: DecoderConfig::default(),
            keep_alive_interval: Duration::from_millis(
                crate::protocol::DEFAULT_KEEP_ALIVE_INTERVAL_MS as u64,
            ),
            keep_alive_trigger: Duration::from_secs(5),
            read_timeout: Duration::from_millis(100),
            channel_capacity: 64,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let keep_alive_ms = read_env_u16(
            "TRACKERDK_KEEP_ALIVE_MS",
            d.keep_alive_interval_ms(),
        );
        Self {
            fusion: FusionConfig::from_env(),
            decoder: DecoderConfig::from_env(),
            keep_alive_interval: Duration::from_millis(keep_alive_ms as u64),
            ..d
        }
    }

    /// Keep-alive interval in the device's u16 millisecond encoding.
    pub fn keep_alive_interval_ms(&self) -> u16 {
        self.keep_alive_interval.as_millis().min(u16::MAX as u128) as u16
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn read_env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let fusion = FusionConfig::default();
        assert_eq!(fusion.gain, 0.05);
        assert_eq!(fusion.yaw_multiplier, 1.0);
        assert!(fusion.enable_gravity);
        assert!(!fusion.enable_prediction);
        assert_eq!(fusion.prediction_dt, 0.03);

        let tracker = TrackerConfig::default();
        assert_eq!(tracker.keep_alive_interval_ms(), 10_000);
        assert_eq!(tracker.keep_alive_trigger, Duration::from_secs(5));
        assert_eq!(tracker.decoder.gyro_scale, 10.0);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" ON "), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_from_env_overrides() {
        // Variable names unique to this test so parallel tests are unaffected.
        std::env::set_var("TRACKERDK_TEST_F64", "0.25");
        std::env::set_var("TRACKERDK_TEST_BAD_F64", "NaN");
        std::env::set_var("TRACKERDK_TEST_U16", "70000");
        assert_eq!(read_env_f64("TRACKERDK_TEST_F64", 1.0), 0.25);
        assert_eq!(read_env_f64("TRACKERDK_TEST_BAD_F64", 1.0), 1.0);
        assert_eq!(read_env_u16("TRACKERDK_TEST_U16", 5), 5);
        assert_eq!(read_env_f64("TRACKERDK_TEST_UNSET", 2.0), 2.0);
    }

    #[test]
    fn test_keep_alive_interval_saturates() {
        let config = TrackerConfig {
            keep_alive_interval: Duration::from_secs(600),
            ..Default::default()
        };
        assert_eq!(config.keep_alive_interval_ms(), u16::MAX);
    }
}
