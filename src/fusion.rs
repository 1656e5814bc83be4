//! Orientation filter.
//!
//! Integrates angular rate into an orientation quaternion, corrects tilt
//! drift against gravity while the tracker is near-stationary, and optionally
//! extrapolates a short-horizon predicted orientation.
//!
//! The frame is Y-up: gravity reads as `(0, +9.81, 0)` when level.

use crate::config::FusionConfig;
use crate::types::SensorSample;
use nalgebra::{Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};

const STANDARD_GRAVITY: f64 = 9.81;
const GRAVITY_EPSILON: f64 = 0.4;
const ANGULAR_RATE_EPSILON: f64 = 0.1;
/// Consecutive static samples needed before a tilt measurement.
const TILT_PERIOD: u32 = 50;
/// Tilt measurements at or below this angle are not recorded.
const MAX_TILT_ERROR: f64 = 0.05;
/// Recorded tilt at or below this angle is not corrected.
const MIN_TILT_ERROR: f64 = 0.01;
/// Tilt above this angle early in the session is removed in one step.
const SNAP_TILT_ERROR: f64 = 0.4;
const SNAP_STAGE_LIMIT: u64 = 2000;
const RENORMALIZE_PERIOD: u64 = 5000;
const PREDICTION_MIN_RATE: f64 = 0.001;

const MAG_FILTER_SIZE: usize = 10;
const ACCEL_FILTER_SIZE: usize = 20;
const ANGULAR_RATE_FILTER_SIZE: usize = 20;

/// Savitzky-Golay taps for lags 0..8. Lag 5 has zero weight.
const SAVITZKY_GOLAY_8: [f64; 8] = [
    0.41667, 0.33333, 0.25, 0.1667, 0.08333, 0.0, -0.08333, -0.1667,
];

/// Fixed-capacity circular buffer of 3-vectors. Unfilled slots read as zero.
#[derive(Debug, Clone)]
pub struct SensorFilter {
    elements: Vec<Vector3<f64>>,
    last: usize,
}

impl SensorFilter {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            elements: vec![Vector3::zeros(); size],
            last: size - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, v: Vector3<f64>) {
        self.last = (self.last + 1) % self.elements.len();
        self.elements[self.last] = v;
    }

    /// Element pushed `i` pushes ago; wraps around the capacity.
    pub fn prev(&self, i: usize) -> Vector3<f64> {
        let size = self.elements.len();
        self.elements[(self.last + size - i % size) % size]
    }

    /// Mean over the full capacity.
    pub fn mean(&self) -> Vector3<f64> {
        self.elements.iter().sum::<Vector3<f64>>() / self.elements.len() as f64
    }

    /// Smoothed current value from the last eight entries.
    pub fn savitzky_golay_smooth8(&self) -> Vector3<f64> {
        SAVITZKY_GOLAY_8
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w != 0.0)
            .map(|(lag, &w)| self.prev(lag) * w)
            .sum()
    }
}

/// Hard/soft-iron magnetometer correction: `matrix * (raw - offset)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagCalibration {
    pub offset: Vector3<f64>,
    pub matrix: Matrix3<f64>,
}

impl MagCalibration {
    pub fn identity() -> Self {
        Self {
            offset: Vector3::zeros(),
            matrix: Matrix3::identity(),
        }
    }

    pub fn apply(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * (raw - self.offset)
    }
}

impl Default for MagCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

/// Rotation by `rate * dt` about the direction of `rate`.
fn delta_rotation(rate: &Vector3<f64>, rate_len: f64, dt: f64) -> Quaternion<f64> {
    let axis = rate / rate_len;
    let half = rate_len * dt * 0.5;
    let s = half.sin();
    Quaternion::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
}

/// Stateful orientation estimator for one tracker.
#[derive(Debug, Clone)]
pub struct SensorFusion {
    config: FusionConfig,
    mag_calibration: MagCalibration,

    q: Quaternion<f64>,
    qp: Quaternion<f64>,
    acceleration: Vector3<f64>,
    angular_rate: Vector3<f64>,
    magnetic_field: Vector3<f64>,
    stage: u64,

    mag_filter: SensorFilter,
    accel_world_filter: SensorFilter,
    angular_rate_filter: SensorFilter,

    tilt_cond_count: u32,
    tilt_error_angle: f64,
    tilt_error_axis: Unit<Vector3<f64>>,
    tilt_recordings: u64,
}

impl SensorFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            mag_calibration: MagCalibration::identity(),
            q: Quaternion::identity(),
            qp: Quaternion::identity(),
            acceleration: Vector3::zeros(),
            angular_rate: Vector3::zeros(),
            magnetic_field: Vector3::zeros(),
            stage: 0,
            mag_filter: SensorFilter::new(MAG_FILTER_SIZE),
            accel_world_filter: SensorFilter::new(ACCEL_FILTER_SIZE),
            angular_rate_filter: SensorFilter::new(ANGULAR_RATE_FILTER_SIZE),
            tilt_cond_count: 0,
            tilt_error_angle: 0.0,
            tilt_error_axis: Vector3::y_axis(),
            tilt_recordings: 0,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FusionConfig) {
        self.config = config;
    }

    pub fn set_mag_calibration(&mut self, calibration: MagCalibration) {
        self.mag_calibration = calibration;
    }

    /// Fold one sensor sample into the estimate.
    pub fn handle_sample(&mut self, sample: &SensorSample) {
        let dt = sample.time_delta;

        let mut rate = sample.rotation_rate;
        rate.y *= self.config.yaw_multiplier;
        self.angular_rate = rate;
        self.acceleration = sample.acceleration;
        self.magnetic_field = self.mag_calibration.apply(&sample.magnetic_field);

        let rate_len = rate.norm();
        let accel_len = sample.acceleration.norm();

        let accel_world = self.rotation().transform_vector(&sample.acceleration);

        self.stage += 1;

        self.mag_filter.push(self.magnetic_field);
        self.accel_world_filter.push(accel_world);
        self.angular_rate_filter.push(rate);

        if rate_len > 0.0 {
            self.q *= delta_rotation(&rate, rate_len, dt);
            self.qp = self.q;

            if self.config.enable_prediction {
                let smoothed = self.angular_rate_filter.savitzky_golay_smooth8();
                let smoothed_len = smoothed.norm();
                if smoothed_len > PREDICTION_MIN_RATE {
                    self.qp =
                        self.q * delta_rotation(&smoothed, smoothed_len, self.config.prediction_dt);
                }
            }
        }

        if self.stage % RENORMALIZE_PERIOD == 0 {
            self.renormalize();
        }

        if self.config.enable_gravity {
            self.correct_tilt(accel_len, rate_len);
        }
    }

    fn correct_tilt(&mut self, accel_len: f64, rate_len: f64) {
        if (accel_len - STANDARD_GRAVITY).abs() < GRAVITY_EPSILON
            && rate_len < ANGULAR_RATE_EPSILON
        {
            self.tilt_cond_count += 1;
        } else {
            self.tilt_cond_count = 0;
        }

        if self.tilt_cond_count >= TILT_PERIOD {
            self.tilt_cond_count = 0;
            self.record_tilt();
        }

        if self.tilt_error_angle > MIN_TILT_ERROR {
            if self.tilt_error_angle > SNAP_TILT_ERROR && self.stage < SNAP_STAGE_LIMIT {
                self.rotate_world(-self.tilt_error_angle);
                log::debug!(
                    "snapped {:.3} rad of initial tilt at stage {}",
                    self.tilt_error_angle,
                    self.stage
                );
                self.tilt_error_angle = 0.0;
            } else {
                let step = -self.config.gain
                    * self.tilt_error_angle
                    * 0.005
                    * (5.0 * rate_len + 1.0);
                self.rotate_world(step);
                self.tilt_error_angle += step;
            }
        }
    }

    fn record_tilt(&mut self) {
        let mean = self.accel_world_filter.mean();
        let axis = Vector3::new(mean.z, 0.0, -mean.x);
        let Some(axis) = Unit::try_new(axis, f64::EPSILON) else {
            return;
        };
        let angle = Vector3::y().angle(&mean);
        if angle > MAX_TILT_ERROR {
            log::trace!("tilt error {:.4} rad recorded at stage {}", angle, self.stage);
            self.tilt_error_angle = angle;
            self.tilt_error_axis = axis;
            self.tilt_recordings += 1;
        }
    }

    /// Pre-multiply `Q` by a rotation about the tilt axis.
    fn rotate_world(&mut self, angle: f64) {
        let correction = UnitQuaternion::from_axis_angle(&self.tilt_error_axis, angle);
        self.q = correction.into_inner() * self.q;
    }

    fn renormalize(&mut self) {
        if self.q.norm() > 0.0 {
            self.q = self.q.normalize();
        }
    }

    fn rotation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::new_unchecked(self.q)
    }

    /// Set the orientation back to identity. Filters and tilt state persist.
    pub fn reset(&mut self) {
        self.q = Quaternion::identity();
    }

    pub fn orientation(&self) -> Quaternion<f64> {
        self.q
    }

    /// Predicted orientation.
    ///
    /// Refreshed only by samples with a nonzero angular rate: copied from
    /// [`orientation`](Self::orientation) after integration, then advanced by
    /// the smoothed rate when prediction is on. Tilt correction runs after
    /// that copy, and [`reset`](Self::reset) leaves it alone, so it keeps its
    /// last value until the next rotating sample.
    pub fn predicted_orientation(&self) -> Quaternion<f64> {
        self.qp
    }

    /// Residual tilt error in radians.
    pub fn tilt_error(&self) -> f64 {
        self.tilt_error_angle
    }

    /// Number of tilt measurements recorded so far.
    pub fn tilt_recordings(&self) -> u64 {
        self.tilt_recordings
    }

    /// Samples fused so far.
    pub fn stage(&self) -> u64 {
        self.stage
    }

    /// Euler angles [roll, pitch, yaw] of the orientation in degrees.
    pub fn euler_angles(&self) -> [f64; 3] {
        crate::protocol::quaternion_to_euler(self.q.w, self.q.i, self.q.j, self.q.k)
    }

    pub fn acceleration(&self) -> Vector3<f64> {
        self.acceleration
    }

    /// Angular rate after the yaw multiplier.
    pub fn angular_rate(&self) -> Vector3<f64> {
        self.angular_rate
    }

    /// Calibrated magnetic field of the last sample.
    pub fn magnetic_field(&self) -> Vector3<f64> {
        self.magnetic_field
    }

    /// Mean calibrated magnetic field over the recent window.
    pub fn mean_magnetic_field(&self) -> Vector3<f64> {
        self.mag_filter.mean()
    }
}

impl Default for SensorFusion {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}
