//! Tracker discovery and USB bring-up.
//!
//! [`Device::bring_up`] runs the whole configuration sequence on an opened
//! transport; [`Device::start_tracking`] hands the transport to the reader
//! thread.

use crate::config::TrackerConfig;
use crate::descriptor::{self, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use crate::error::TransportError;
use crate::hid::{ControlFeatureReports, FeatureReports};
use crate::protocol::{
    self, DESCRIPTOR_HID_REPORT, PID, REQUEST_GET_DESCRIPTOR, REQUEST_SET_CONFIGURATION, VID,
};
use crate::report_descriptor::HidReportDescriptor;
use crate::stream::{StreamEndpoint, TrackerStream};
use crate::transport::{ControlSetup, RusbTransport, UsbTransport};
use crate::types::{DeviceInfo, HmdInfo, SensorConfig, SensorRange};
use crate::{Result, TrackerError};

/// List all connected trackers.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let context = rusb::Context::new()?;
    let devices = RusbTransport::find_devices(&context, VID, PID)?;

    Ok(devices
        .iter()
        .map(|d| DeviceInfo {
            vendor_id: VID,
            product_id: PID,
            bus_id: format!("{:03}:{:03}", d.bus_number(), d.address()),
            bus_number: d.bus_number(),
            device_address: d.address(),
        })
        .collect())
}

/// An opened, configured tracker ready for streaming.
pub struct Device<T: UsbTransport = RusbTransport> {
    transport: T,
    bus_id: String,
    descriptor: DeviceDescriptor,
    report_descriptor: HidReportDescriptor,
    interface: u8,
    endpoint: u8,
    report_length: usize,
    hmd_info: Option<HmdInfo>,
    sensor_range: Option<SensorRange>,
    sensor_config: Option<SensorConfig>,
}

impl Device<RusbTransport> {
    /// Open the first available tracker.
    pub fn open_first() -> Result<Device> {
        let context = rusb::Context::new()?;
        let device = RusbTransport::find_devices(&context, VID, PID)?
            .into_iter()
            .next()
            .ok_or(TrackerError::DeviceNotFound)?;

        let transport = RusbTransport::open(&device)?;
        let bus_id = transport.bus_id();
        Device::bring_up(transport, bus_id)
    }

    /// Open a specific tracker by DeviceInfo.
    pub fn open(info: &DeviceInfo) -> Result<Device> {
        let context = rusb::Context::new()?;
        let device = RusbTransport::find_devices(&context, VID, PID)?
            .into_iter()
            .find(|d| d.bus_number() == info.bus_number && d.address() == info.device_address)
            .ok_or(TrackerError::DeviceNotFound)?;

        let transport = RusbTransport::open(&device)?;
        Device::bring_up(transport, info.bus_id.clone())
    }
}

impl<T: UsbTransport> Device<T> {
    /// Run the bring-up sequence on an opened transport.
    ///
    /// 1. Port reset
    /// 2. Device descriptor tree, with every string resolved
    /// 3. SET_CONFIGURATION with the first configuration
    /// 4. Claim the HID interface
    /// 5. Display info, sensor config and sensor range reads (informational)
    /// 6. Keep-alive
    /// 7. HID report descriptor and telemetry report selection
    pub fn bring_up(mut transport: T, bus_id: String) -> Result<Self> {
        transport.reset()?;

        let descriptor = descriptor::fetch_device_descriptor(&transport)?;
        let configuration = descriptor.configurations.first().ok_or_else(|| {
            TrackerError::UnsupportedDevice("device has no configuration".into())
        })?;

        let setup = ControlSetup::standard_out(
            REQUEST_SET_CONFIGURATION,
            configuration.configuration_value as u16,
            0,
        );
        match transport.write_control(&setup, &[]) {
            Ok(_) => {}
            Err(TransportError::Busy) => {
                log::warn!("SET_CONFIGURATION busy, keeping the active configuration")
            }
            Err(e) => return Err(e.into()),
        }

        let (interface, hid_report_length) = hid_interface(configuration.interfaces.first())?;
        let endpoint = telemetry_endpoint(interface)?;
        let interface_number = interface.interface_number;
        let endpoint_address = endpoint.address;

        transport.detach_kernel_driver(interface_number);
        transport.claim_interface(interface_number)?;

        let (hmd_info, sensor_config, sensor_range) = {
            let reports = ControlFeatureReports::new(&transport, interface_number);
            let hmd_info = informational("display info", reports.read_hmd_info());
            let sensor_config = informational("sensor config", reports.read_sensor_config());
            let sensor_range = informational("sensor range", reports.read_sensor_range());
            if let Err(e) = reports.set_keep_alive(protocol::DEFAULT_KEEP_ALIVE_INTERVAL_MS) {
                log::warn!("Initial keep-alive failed: {}", e);
            }
            (hmd_info, sensor_config, sensor_range)
        };

        let setup = ControlSetup::standard_in(
            REQUEST_GET_DESCRIPTOR,
            DESCRIPTOR_HID_REPORT,
            interface_number as u16,
        )
        .to_interface();
        let data = transport.read_control(&setup, hid_report_length as usize)?;
        let report_descriptor = HidReportDescriptor::parse(&data)?;

        let input_size = report_descriptor.input_report_size().ok_or_else(|| {
            TrackerError::UnsupportedDevice("report descriptor declares no input report".into())
        })?;

        log::info!(
            "Opened tracker {} '{}' serial={} ({} byte telemetry on endpoint {:#04x})",
            bus_id,
            descriptor.product,
            descriptor.serial_number,
            input_size,
            endpoint_address
        );

        Ok(Device {
            transport,
            bus_id,
            descriptor,
            report_descriptor,
            interface: interface_number,
            endpoint: endpoint_address,
            report_length: input_size + 1,
            hmd_info,
            sensor_range,
            sensor_config,
        })
    }

    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn report_descriptor(&self) -> &HidReportDescriptor {
        &self.report_descriptor
    }

    pub fn interface_number(&self) -> u8 {
        self.interface
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint
    }

    /// Interrupt transfer length, report ID byte included.
    pub fn report_length(&self) -> usize {
        self.report_length
    }

    pub fn hmd_info(&self) -> Option<&HmdInfo> {
        self.hmd_info.as_ref()
    }

    pub fn sensor_range(&self) -> Option<&SensorRange> {
        self.sensor_range.as_ref()
    }

    pub fn sensor_config(&self) -> Option<&SensorConfig> {
        self.sensor_config.as_ref()
    }

    /// Feature report access on the claimed interface.
    pub fn feature_reports(&self) -> ControlFeatureReports<'_, T> {
        ControlFeatureReports::new(&self.transport, self.interface)
    }
}

impl<T: UsbTransport + 'static> Device<T> {
    /// Start the tracking thread. The device is consumed; the interface is
    /// released when the stream ends.
    pub fn start_tracking(self, config: TrackerConfig) -> Result<TrackerStream> {
        let endpoint = StreamEndpoint {
            interface: self.interface,
            endpoint: self.endpoint,
            report_length: self.report_length,
        };
        TrackerStream::start(self.transport, endpoint, config)
    }
}

/// The tracker exposes its telemetry on a HID interface.
fn hid_interface(interface: Option<&InterfaceDescriptor>) -> Result<(&InterfaceDescriptor, u16)> {
    let interface = interface.ok_or_else(|| {
        TrackerError::UnsupportedDevice("configuration has no interface".into())
    })?;
    let hid = interface.hid.as_ref().ok_or_else(|| {
        TrackerError::UnsupportedDevice(format!(
            "interface {} is not HID (class {})",
            interface.interface_number, interface.interface_class
        ))
    })?;
    Ok((interface, hid.descriptor_length))
}

fn telemetry_endpoint(interface: &InterfaceDescriptor) -> Result<&EndpointDescriptor> {
    interface
        .interrupt_in_endpoint()
        .or_else(|| interface.endpoints.first())
        .ok_or_else(|| {
            TrackerError::UnsupportedDevice(format!(
                "interface {} has no endpoint",
                interface.interface_number
            ))
        })
}

fn informational<V: std::fmt::Debug>(what: &str, result: Result<V>) -> Option<V> {
    match result {
        Ok(value) => {
            log::info!("{}: {:?}", what, value);
            Some(value)
        }
        Err(e) => {
            log::warn!("Reading {} failed: {} (continuing)", what, e);
            None
        }
    }
}
