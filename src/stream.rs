use crate::config::TrackerConfig;
use crate::error::TransportError;
use crate::fusion::SensorFusion;
use crate::hid::{ControlFeatureReports, FeatureReports};
use crate::telemetry::TelemetryDecoder;
use crate::transport::UsbTransport;
use crate::types::OrientationSample;
use crate::{Result, TrackerError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Requests from the caller to the reader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    /// Set the fused orientation back to identity.
    ResetOrientation,
}

/// Where the telemetry comes from on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamEndpoint {
    pub interface: u8,
    pub endpoint: u8,
    /// Interrupt transfer length, including the report ID byte.
    pub report_length: usize,
}

/// Handle to an active tracking session.
///
/// A background thread owns the transport, reads telemetry transfers one at
/// a time, decodes and fuses them, and publishes an [`OrientationSample`]
/// per sensor sample.
pub struct TrackerStream {
    receiver: Receiver<OrientationSample>,
    commands: Sender<StreamCommand>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TrackerStream {
    /// Start the reader thread. The interface must already be claimed; it is
    /// released when the thread exits.
    pub(crate) fn start<T: UsbTransport + 'static>(
        transport: T,
        endpoint: StreamEndpoint,
        config: TrackerConfig,
    ) -> Result<TrackerStream> {
        let (sender, receiver) = crossbeam_channel::bounded(config.channel_capacity.max(1));
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("trackerdk-reader".into())
            .spawn(move || {
                let reader = Reader {
                    transport,
                    endpoint,
                    decoder: TelemetryDecoder::new(config.decoder),
                    fusion: SensorFusion::new(config.fusion),
                    config,
                };
                reader.run(sender, command_rx, stop_clone);
            })?;

        Ok(TrackerStream {
            receiver,
            commands,
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Receive the next orientation (blocks until available).
    pub fn recv(&self) -> Result<OrientationSample> {
        self.receiver
            .recv()
            .map_err(|_| TrackerError::StreamStopped)
    }

    /// Try to receive an orientation without blocking.
    pub fn try_recv(&self) -> Option<OrientationSample> {
        self.receiver.try_recv().ok()
    }

    /// Receive an orientation with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<OrientationSample> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => TrackerError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => TrackerError::StreamStopped,
        })
    }

    /// Reset the fused orientation to identity. Applied before the next
    /// transfer is fused.
    pub fn reset_orientation(&self) -> Result<()> {
        self.commands
            .send(StreamCommand::ResetOrientation)
            .map_err(|_| TrackerError::StreamStopped)
    }

    /// Check if the reader thread is still running.
    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop the stream and wait for the reader thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TrackerStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the reader thread.
struct Reader<T: UsbTransport> {
    transport: T,
    endpoint: StreamEndpoint,
    decoder: TelemetryDecoder,
    fusion: SensorFusion,
    config: TrackerConfig,
}

impl<T: UsbTransport> Reader<T> {
    fn run(
        mut self,
        sender: Sender<OrientationSample>,
        commands: Receiver<StreamCommand>,
        stop_flag: Arc<AtomicBool>,
    ) {
        let epoch = Instant::now();
        let mut last_keep_alive = Instant::now();
        let keep_alive_ms = self.config.keep_alive_interval_ms();

        log::info!(
            "Tracker reader started (endpoint {:#04x}, {} byte transfers)",
            self.endpoint.endpoint,
            self.endpoint.report_length
        );

        'read: loop {
            if stop_flag.load(Ordering::Relaxed) {
                log::info!("Tracker reader stopping (stop flag set)");
                break;
            }

            for command in commands.try_iter() {
                match command {
                    StreamCommand::ResetOrientation => {
                        log::debug!("Orientation reset");
                        self.fusion.reset();
                    }
                }
            }

            if last_keep_alive.elapsed() > self.config.keep_alive_trigger {
                last_keep_alive = Instant::now();
                let reports = ControlFeatureReports::new(&self.transport, self.endpoint.interface);
                if let Err(e) = reports.set_keep_alive(keep_alive_ms) {
                    log::warn!("Keep-alive failed: {} (retrying on next interval)", e);
                }
            }

            let data = match self.transport.read_interrupt(
                self.endpoint.endpoint,
                self.endpoint.report_length,
                self.config.read_timeout,
            ) {
                Ok(data) => data,
                Err(TransportError::Timeout) => continue,
                Err(e) => {
                    log::warn!("Interrupt transfer failed: {}, stopping reader", e);
                    break;
                }
            };

            let samples = match self.decoder.decode(&data) {
                Ok(samples) => samples,
                Err(e) => {
                    log::debug!("Skipping transfer: {}", e);
                    continue;
                }
            };

            for sample in samples {
                self.fusion.handle_sample(&sample);
                let orientation = OrientationSample {
                    orientation: self.fusion.orientation(),
                    predicted: self.fusion.predicted_orientation(),
                    euler_deg: self.fusion.euler_angles(),
                    sample,
                    stage: self.fusion.stage(),
                    host_timestamp_s: epoch.elapsed().as_secs_f64(),
                };

                if let Err(e) = sender.try_send(orientation) {
                    match e {
                        crossbeam_channel::TrySendError::Full(_) => {
                            log::trace!("Orientation channel full, dropping sample");
                        }
                        crossbeam_channel::TrySendError::Disconnected(_) => {
                            log::info!("Orientation channel disconnected, stopping reader");
                            break 'read;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.transport.release_interface(self.endpoint.interface) {
            log::warn!("Release interface {}: {}", self.endpoint.interface, e);
        }
        stop_flag.store(true, Ordering::Relaxed);
        drop(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, REPORT_KEEP_ALIVE};
    use crate::telemetry::test_data::message;
    use crate::transport::mock::MockTransport;
    use crate::transport::ControlSetup;
    use rusb::Direction;

    const ENDPOINT: StreamEndpoint = StreamEndpoint {
        interface: 0,
        endpoint: 0x81,
        report_length: 63,
    };

    fn drain(stream: &TrackerStream) -> Vec<OrientationSample> {
        let mut out = Vec::new();
        while let Ok(sample) = stream.recv_timeout(Duration::from_secs(5)) {
            out.push(sample);
        }
        out
    }

    #[test]
    fn test_stream_fuses_until_transfer_failure() {
        let mock = MockTransport::new();
        mock.push_interrupt(Ok(message(2, 100, [0, 98_100, 0], [0, 1_000, 0])));
        mock.push_interrupt(Err(TransportError::Timeout));
        mock.push_interrupt(Ok(message(2, 102, [0, 98_100, 0], [0, 1_000, 0])));
        mock.push_interrupt(Ok(vec![0u8; 10]));
        // Queue exhausted: the mock reports NoDevice.

        let stream = TrackerStream::start(mock.clone(), ENDPOINT, TrackerConfig::default()).unwrap();
        let samples = drain(&stream);

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3].stage, 4);
        assert!(samples.windows(2).all(|w| w[1].host_timestamp_s >= w[0].host_timestamp_s));
        // 4 ms at 1 rad/s about Y.
        let yaw = samples[3].euler_deg[2];
        assert!((yaw - 0.004f64.to_degrees()).abs() < 1e-6);

        assert!(!stream.is_active());
        assert_eq!(mock.state.lock().unwrap().released, vec![0]);
        assert!(matches!(stream.recv(), Err(TrackerError::StreamStopped)));
    }

    #[test]
    fn test_stream_sends_keep_alive() {
        let mock = MockTransport::new();
        mock.push_interrupt(Err(TransportError::Timeout));
        mock.push_interrupt(Err(TransportError::Timeout));

        let config = TrackerConfig {
            keep_alive_trigger: Duration::ZERO,
            keep_alive_interval: Duration::from_millis(2_000),
            ..Default::default()
        };
        let stream = TrackerStream::start(mock.clone(), ENDPOINT, config).unwrap();
        assert!(drain(&stream).is_empty());

        let writes = mock.writes();
        assert!(!writes.is_empty());
        let (setup, data) = &writes[0];
        assert_eq!(setup.value, 0x0308);
        assert_eq!(data, &vec![0x00, 0x00, 0xD0, 0x07]);
    }

    #[test]
    fn test_reset_orientation_restarts_from_identity() {
        let timeout = Duration::from_secs(5);
        let mock = MockTransport::new();
        mock.hold_interrupts(true);
        mock.push_interrupt(Ok(message(2, 100, [0; 3], [0, 1_000, 0])));

        let stream = TrackerStream::start(mock.clone(), ENDPOINT, TrackerConfig::default()).unwrap();
        stream.recv_timeout(timeout).unwrap();
        let before = stream.recv_timeout(timeout).unwrap();
        assert!((before.euler_deg[2] - 0.002f64.to_degrees()).abs() < 1e-6);

        stream.reset_orientation().unwrap();
        mock.push_interrupt(Ok(message(2, 102, [0; 3], [0, 1_000, 0])));
        mock.push_interrupt(Ok(message(2, 104, [0; 3], [0, 1_000, 0])));
        mock.hold_interrupts(false);

        let after = drain(&stream);
        assert_eq!(after.len(), 4);
        // The reset lands before the first or the second transfer; without
        // it six samples would have been integrated.
        let yaw = after[3].euler_deg[2];
        assert!(yaw > 0.0015f64.to_degrees(), "yaw {}", yaw);
        assert!(yaw < 0.0045f64.to_degrees(), "yaw {}", yaw);
    }

    #[test]
    fn test_keep_alive_failure_keeps_streaming() {
        let timeout = Duration::from_secs(5);
        let mock = MockTransport::new();
        mock.fail_write(
            ControlSetup::class_interface(
                Direction::Out,
                protocol::HID_SET_REPORT,
                protocol::feature_report_value(REPORT_KEEP_ALIVE),
                0,
            ),
            TransportError::Pipe,
        );
        mock.hold_interrupts(true);
        mock.push_interrupt(Ok(message(2, 100, [0, 98_100, 0], [0; 3])));
        mock.push_interrupt(Ok(message(2, 102, [0, 98_100, 0], [0; 3])));

        let config = TrackerConfig {
            keep_alive_trigger: Duration::ZERO,
            ..Default::default()
        };
        let stream = TrackerStream::start(mock.clone(), ENDPOINT, config).unwrap();
        for _ in 0..4 {
            stream.recv_timeout(timeout).unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(stream.is_active());

        mock.hold_interrupts(false);
        assert!(drain(&stream).is_empty());
        assert!(mock.failed_writes() >= 2, "{} attempts", mock.failed_writes());
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_stop_releases_interface() {
        let mock = MockTransport::new();
        for _ in 0..1000 {
            mock.push_interrupt(Err(TransportError::Timeout));
        }
        let stream = TrackerStream::start(mock.clone(), ENDPOINT, TrackerConfig::default()).unwrap();
        stream.stop();
        assert_eq!(mock.state.lock().unwrap().released, vec![0]);
    }
}
