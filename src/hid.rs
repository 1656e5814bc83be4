use crate::protocol::{
    self, HMD_INFO_SIZE, REPORT_HMD_INFO, REPORT_KEEP_ALIVE, REPORT_SENSOR_CONFIG,
    REPORT_SENSOR_RANGE, SENSOR_CONFIG_SIZE, SENSOR_RANGE_SIZE,
};
use crate::transport::{ControlSetup, UsbTransport};
use crate::types::{HmdInfo, SensorConfig, SensorRange};
use crate::Result;
use hidapi::HidDevice;
use rusb::Direction;

/// HID feature report access.
///
/// Reports are exchanged whole: byte 0 is the report ID slot, followed by
/// the report body.
pub trait FeatureReports {
    /// GET_REPORT for a feature report of up to `length` bytes.
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>>;

    /// SET_REPORT for a feature report.
    fn set_feature_report(&self, report_id: u8, data: &[u8]) -> Result<()>;

    /// Read the display geometry report.
    fn read_hmd_info(&self) -> Result<HmdInfo> {
        let data = self.get_feature_report(REPORT_HMD_INFO, HMD_INFO_SIZE)?;
        HmdInfo::parse(&data)
    }

    /// Read the sensor range report.
    fn read_sensor_range(&self) -> Result<SensorRange> {
        let data = self.get_feature_report(REPORT_SENSOR_RANGE, SENSOR_RANGE_SIZE)?;
        SensorRange::parse(&data)
    }

    fn read_sensor_config(&self) -> Result<SensorConfig> {
        let data = self.get_feature_report(REPORT_SENSOR_CONFIG, SENSOR_CONFIG_SIZE)?;
        SensorConfig::parse(&data)
    }

    fn write_sensor_config(&self, config: &SensorConfig) -> Result<()> {
        self.set_feature_report(REPORT_SENSOR_CONFIG, &config.encode())
    }

    /// Ask the device to keep streaming for `interval_ms` milliseconds.
    fn set_keep_alive(&self, interval_ms: u16) -> Result<()> {
        self.set_feature_report(REPORT_KEEP_ALIVE, &protocol::build_keep_alive(interval_ms))
    }
}

/// Feature reports over HID class control requests on the claimed interface.
pub struct ControlFeatureReports<'a, T: UsbTransport + ?Sized> {
    transport: &'a T,
    interface: u8,
}

impl<'a, T: UsbTransport + ?Sized> ControlFeatureReports<'a, T> {
    pub fn new(transport: &'a T, interface: u8) -> Self {
        Self {
            transport,
            interface,
        }
    }
}

impl<T: UsbTransport + ?Sized> FeatureReports for ControlFeatureReports<'_, T> {
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>> {
        let setup = ControlSetup::class_interface(
            Direction::In,
            protocol::HID_GET_REPORT,
            protocol::feature_report_value(report_id),
            self.interface,
        );
        Ok(self.transport.read_control(&setup, length)?)
    }

    fn set_feature_report(&self, report_id: u8, data: &[u8]) -> Result<()> {
        let setup = ControlSetup::class_interface(
            Direction::Out,
            protocol::HID_SET_REPORT,
            protocol::feature_report_value(report_id),
            self.interface,
        );
        self.transport.write_control(&setup, data)?;
        Ok(())
    }
}

/// Feature reports through hidapi, for hosts where the kernel HID driver
/// keeps the interface.
///
/// hidapi takes the report ID from byte 0 of the buffer, so it is written
/// into that slot on both directions.
pub struct HidapiFeatureReports {
    device: HidDevice,
}

impl HidapiFeatureReports {
    pub fn new(device: HidDevice) -> Self {
        Self { device }
    }

    /// Open the first tracker hidapi can see.
    pub fn open_first() -> Result<Self> {
        let api = hidapi::HidApi::new()?;
        let device = api.open(protocol::VID, protocol::PID)?;
        Ok(Self::new(device))
    }

    /// Consume and return the inner HID device handle.
    pub fn into_device(self) -> HidDevice {
        self.device
    }
}

impl FeatureReports for HidapiFeatureReports {
    fn get_feature_report(&self, report_id: u8, length: usize) -> Result<Vec<u8>> {
        let mut buf = hidapi_request_buffer(report_id, length);
        let len = self.device.get_feature_report(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    fn set_feature_report(&self, report_id: u8, data: &[u8]) -> Result<()> {
        self.device
            .send_feature_report(&hidapi_write_buffer(report_id, data))?;
        Ok(())
    }
}

/// Zeroed GET_REPORT buffer with the report ID in byte 0.
fn hidapi_request_buffer(report_id: u8, length: usize) -> Vec<u8> {
    let mut buf = vec![0u8; length.max(1)];
    buf[0] = report_id;
    buf
}

/// SET_REPORT buffer: the report ID replaces byte 0 of `data`.
fn hidapi_write_buffer(report_id: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len().max(1));
    buf.push(report_id);
    buf.extend_from_slice(data.get(1..).unwrap_or_default());
    buf
}
