//! Interrupt-transfer telemetry decoding.
//!
//! Each transfer packs up to three accelerometer/gyroscope samples as 21-bit
//! signed integers, one magnetometer reading and a temperature. The decoder
//! turns them into [`SensorSample`]s and repairs short runs of lost samples
//! using the 16-bit sample timestamp.

use crate::config::DecoderConfig;
use crate::types::SensorSample;
use crate::{Result, TrackerError};
use nalgebra::Vector3;

/// Seconds per timestamp tick.
pub const TIME_UNIT: f64 = 0.001;

/// Minimum payload length of a tracker message.
pub const MESSAGE_SIZE: usize = 62;

/// Largest dropped-sample gap that is still repaired with a catch-up sample.
pub const MAX_CATCH_UP_GAP: i32 = 254;

const SAMPLE_BLOCK_OFFSET: usize = 8;
const SAMPLE_BLOCK_SIZE: usize = 16;
const MAG_OFFSET: usize = 56;
const RAW_SCALE: f64 = 1e-4;
const TEMPERATURE_SCALE: f64 = 1e-2;

/// Sign-extend a 21-bit two's complement value.
pub fn sign_extend_21(raw: u32) -> i32 {
    ((raw << 11) as i32) >> 11
}

/// Unpack three 21-bit signed values from 8 bytes.
///
/// Bit layout, most significant first: 21 bits of value 0, 21 bits of value
/// 1, 21 bits of value 2, one unused low bit.
pub fn unpack_sensor_triplet(b: &[u8; 8]) -> [i32; 3] {
    let b: [u32; 8] = b.map(u32::from);
    let x = (b[0] << 13) | (b[1] << 5) | ((b[2] & 0xF8) >> 3);
    let y = ((b[2] & 0x07) << 18) | (b[3] << 10) | (b[4] << 2) | ((b[5] & 0xC0) >> 6);
    let z = ((b[5] & 0x3F) << 15) | (b[6] << 7) | (b[7] >> 1);
    [sign_extend_21(x), sign_extend_21(y), sign_extend_21(z)]
}

/// Raw accelerometer and gyroscope readings of one packed block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    pub accel: [i32; 3],
    pub gyro: [i32; 3],
}

/// One interrupt transfer, unscaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerMessage {
    pub report_id: u8,
    /// Number of valid samples as reported by the device.
    pub sample_count: u8,
    pub timestamp: u16,
    pub last_command_id: u16,
    /// Centi-degrees Celsius.
    pub temperature: i16,
    pub samples: [RawSample; 3],
    /// Magnetometer in device order X, Y, Z.
    pub mag: [i16; 3],
}

impl TrackerMessage {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < MESSAGE_SIZE {
            return Err(TrackerError::TelemetryTooShort {
                expected: MESSAGE_SIZE,
                actual: payload.len(),
            });
        }

        let u16_at = |o: usize| u16::from_le_bytes([payload[o], payload[o + 1]]);
        let i16_at = |o: usize| i16::from_le_bytes([payload[o], payload[o + 1]]);
        let triplet = |o: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[o..o + 8]);
            unpack_sensor_triplet(&bytes)
        };

        let mut samples = [RawSample::default(); 3];
        for (i, sample) in samples.iter_mut().enumerate() {
            let base = SAMPLE_BLOCK_OFFSET + SAMPLE_BLOCK_SIZE * i;
            sample.accel = triplet(base);
            sample.gyro = triplet(base + 8);
        }

        Ok(Self {
            report_id: payload[0],
            sample_count: payload[1],
            timestamp: u16_at(2),
            last_command_id: u16_at(4),
            temperature: i16_at(6),
            samples,
            mag: [
                i16_at(MAG_OFFSET),
                i16_at(MAG_OFFSET + 2),
                i16_at(MAG_OFFSET + 4),
            ],
        })
    }

    /// Samples to decode from this message. Counts above 2 decode all three.
    pub fn iterations(&self) -> usize {
        if self.sample_count > 2 {
            3
        } else {
            self.sample_count as usize
        }
    }
}

/// Ticks between two 16-bit timestamps, accounting for one wraparound.
pub fn timestamp_delta(last: u16, current: u16) -> u32 {
    if current < last {
        current as u32 + 65536 - last as u32
    } else {
        (current - last) as u32
    }
}

#[derive(Debug, Clone, Copy)]
struct TransferTiming {
    timestamp: u16,
    sample_count: u8,
}

/// Stateful decoder for one device's telemetry stream.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    config: DecoderConfig,
    previous: Option<TransferTiming>,
    /// Last decoded sample, reused for catch-up.
    last: SensorSample,
}

impl TelemetryDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            previous: None,
            last: SensorSample::default(),
        }
    }

    /// Last decoded sample values.
    pub fn last_sample(&self) -> &SensorSample {
        &self.last
    }

    /// Decode one transfer into zero to four samples.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<SensorSample>> {
        let message = TrackerMessage::parse(payload)?;
        let mut out = Vec::with_capacity(4);

        if let Some(prev) = self.previous {
            let delta = timestamp_delta(prev.timestamp, message.timestamp) as i32;
            let gap = delta - prev.sample_count as i32;
            if gap > 0 && gap <= MAX_CATCH_UP_GAP {
                log::trace!("recovering {} dropped sample tick(s)", gap);
                out.push(SensorSample {
                    time_delta: gap as f64 * TIME_UNIT,
                    ..self.last
                });
            }
        }

        let temperature = message.temperature as f64 * TEMPERATURE_SCALE;
        let [mx, my, mz] = message.mag.map(|v| v as f64 * RAW_SCALE);
        let magnetic_field = Vector3::new(mx, mz, my);

        for raw in &message.samples[..message.iterations()] {
            let sample = SensorSample {
                time_delta: TIME_UNIT,
                acceleration: self.scale(raw.accel, self.config.accel_scale),
                rotation_rate: self.scale(raw.gyro, self.config.gyro_scale),
                magnetic_field,
                temperature,
            };
            out.push(sample);
            self.last = sample;
        }

        self.previous = Some(TransferTiming {
            timestamp: message.timestamp,
            sample_count: message.sample_count,
        });
        Ok(out)
    }

    fn scale(&self, raw: [i32; 3], unit: f64) -> Vector3<f64> {
        Vector3::from(raw.map(|v| v as f64 * RAW_SCALE * unit))
    }
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}


#[cfg(test)]
mod tests {
    use super::test_data::*;
    use super::*;

    #[test]
    fn test_sign_extend_21() {
        assert_eq!(sign_extend_21(0x1F_FFFF), -1);
        assert_eq!(sign_extend_21(0x00_0001), 1);
        assert_eq!(sign_extend_21(0x10_0000), -1_048_576);
        assert_eq!(sign_extend_21(0x0F_FFFF), 1_048_575);
    }

    #[test]
    fn test_unpack_sensor_triplet() {
        assert_eq!(unpack_sensor_triplet(&[0xFF; 8]), [-1, -1, -1]);
        assert_eq!(unpack_sensor_triplet(&[0; 8]), [0, 0, 0]);

        // value0 = 1 lives in bit 3 of byte 2.
        assert_eq!(unpack_sensor_triplet(&[0, 0, 0x08, 0, 0, 0, 0, 0]), [1, 0, 0]);
        // value2 = 1 lives in bit 1 of byte 7.
        assert_eq!(unpack_sensor_triplet(&[0, 0, 0, 0, 0, 0, 0, 0x02]), [0, 0, 1]);

        let values = [98_100, -250, 1_048_575];
        assert_eq!(unpack_sensor_triplet(&pack_triplet(values)), values);
    }

    #[test]
    fn test_parse_message() {
        let mut data = message(3, 0x1234, [1, 2, 3], [-4, -5, -6]);
        data[4..6].copy_from_slice(&7u16.to_le_bytes());
        data[56..58].copy_from_slice(&100i16.to_le_bytes());
        data[58..60].copy_from_slice(&(-200i16).to_le_bytes());
        data[60..62].copy_from_slice(&300i16.to_le_bytes());

        let msg = TrackerMessage::parse(&data).unwrap();
        assert_eq!(msg.report_id, 1);
        assert_eq!(msg.sample_count, 3);
        assert_eq!(msg.timestamp, 0x1234);
        assert_eq!(msg.last_command_id, 7);
        assert_eq!(msg.temperature, 2512);
        assert_eq!(msg.samples[2].accel, [1, 2, 3]);
        assert_eq!(msg.samples[2].gyro, [-4, -5, -6]);
        assert_eq!(msg.mag, [100, -200, 300]);
    }

    #[test]
    fn test_message_too_short() {
        let err = TrackerMessage::parse(&[0u8; 40]).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::TelemetryTooShort { expected: 62, actual: 40 }
        ));
    }

    #[test]
    fn test_iterations_clamped() {
        for (count, expected) in [(0, 0), (1, 1), (2, 2), (3, 3), (7, 3), (255, 3)] {
            let msg = TrackerMessage::parse(&message(count, 0, [0; 3], [0; 3])).unwrap();
            assert_eq!(msg.iterations(), expected);
        }
    }

    #[test]
    fn test_decode_scaling() {
        let mut data = message(1, 100, [98_100, 0, -5_000], [0, 1_000, 0]);
        data[56..58].copy_from_slice(&1_000i16.to_le_bytes());
        data[58..60].copy_from_slice(&2_000i16.to_le_bytes());
        data[60..62].copy_from_slice(&3_000i16.to_le_bytes());

        let mut decoder = TelemetryDecoder::default();
        let samples = decoder.decode(&data).unwrap();
        assert_eq!(samples.len(), 1);

        let s = samples[0];
        assert_eq!(s.time_delta, TIME_UNIT);
        assert!((s.acceleration.x - 9.81).abs() < 1e-9);
        assert!((s.acceleration.z + 0.5).abs() < 1e-9);
        // Gyro scale defaults to 10.
        assert!((s.rotation_rate.y - 1.0).abs() < 1e-9);
        // Y and Z are swapped into world order.
        assert!((s.magnetic_field.x - 0.1).abs() < 1e-9);
        assert!((s.magnetic_field.y - 0.3).abs() < 1e-9);
        assert!((s.magnetic_field.z - 0.2).abs() < 1e-9);
        assert!((s.temperature - 25.12).abs() < 1e-9);
    }

    #[test]
    fn test_no_catch_up_on_first_transfer() {
        let mut decoder = TelemetryDecoder::default();
        let samples = decoder.decode(&message(2, 500, [1; 3], [1; 3])).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.time_delta == TIME_UNIT));
    }

    #[test]
    fn test_contiguous_transfers_have_no_catch_up() {
        let mut decoder = TelemetryDecoder::default();
        decoder.decode(&message(2, 100, [1; 3], [0; 3])).unwrap();
        let samples = decoder.decode(&message(2, 102, [1; 3], [0; 3])).unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_timestamp_wraparound_catch_up() {
        assert_eq!(timestamp_delta(65530, 10), 16);
        assert_eq!(timestamp_delta(10, 65530), 65520);

        let mut decoder = TelemetryDecoder::default();
        decoder.decode(&message(2, 65530, [10_000, 0, 0], [0; 3])).unwrap();
        let samples = decoder.decode(&message(1, 10, [20_000, 0, 0], [0; 3])).unwrap();

        assert_eq!(samples.len(), 2);
        let catch_up = samples[0];
        assert!((catch_up.time_delta - 14.0 * TIME_UNIT).abs() < 1e-12);
        // Catch-up reuses the previous transfer's values.
        assert!((catch_up.acceleration.x - 1.0).abs() < 1e-9);
        assert!((samples[1].acceleration.x - 2.0).abs() < 1e-9);
        assert_eq!(samples[1].time_delta, TIME_UNIT);
    }

    #[test]
    fn test_large_gap_not_repaired() {
        let mut decoder = TelemetryDecoder::default();
        decoder.decode(&message(1, 0, [0; 3], [0; 3])).unwrap();
        let samples = decoder.decode(&message(1, 256, [0; 3], [0; 3])).unwrap();
        assert_eq!(samples.len(), 1);

        let samples = decoder.decode(&message(1, 256 + 255, [0; 3], [0; 3])).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0].time_delta - 0.254).abs() < 1e-12);
    }

    #[test]
    fn test_zero_sample_transfer_keeps_previous_values() {
        let mut decoder = TelemetryDecoder::default();
        decoder.decode(&message(1, 10, [30_000, 0, 0], [0; 3])).unwrap();

        let samples = decoder.decode(&message(0, 11, [0; 3], [0; 3])).unwrap();
        assert!(samples.is_empty());
        assert!((decoder.last_sample().acceleration.x - 3.0).abs() < 1e-9);

        // Gap of 4 after a zero-count transfer is filled with the retained values.
        let samples = decoder.decode(&message(1, 15, [0; 3], [0; 3])).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0].acceleration.x - 3.0).abs() < 1e-9);
        assert!((samples[0].time_delta - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_custom_scales() {
        let mut decoder = TelemetryDecoder::new(DecoderConfig {
            accel_scale: 2.0,
            gyro_scale: 1.0,
        });
        let samples = decoder.decode(&message(1, 0, [10_000, 0, 0], [10_000, 0, 0])).unwrap();
        assert!((samples[0].acceleration.x - 2.0).abs() < 1e-9);
        assert!((samples[0].rotation_rate.x - 1.0).abs() < 1e-9);
    }
}
