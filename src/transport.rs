//! USB transport capability.
//!
//! The core never talks to libusb directly. Everything above this module goes
//! through [`UsbTransport`], which has a libusb implementation
//! ([`RusbTransport`]) and an in-memory one for tests.

use crate::error::TransportError;
use rusb::{Direction, Recipient, RequestType};
use std::time::Duration;

/// Default timeout for control transfers.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Setup stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub direction: Direction,
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    /// Standard device-to-host request addressed to the device.
    pub fn standard_in(request: u8, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::In,
            request_type: RequestType::Standard,
            recipient: Recipient::Device,
            request,
            value,
            index,
        }
    }

    /// Standard host-to-device request addressed to the device.
    pub fn standard_out(request: u8, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::Out,
            ..Self::standard_in(request, value, index)
        }
    }

    /// Re-address the request to an interface.
    pub fn to_interface(self) -> Self {
        Self {
            recipient: Recipient::Interface,
            ..self
        }
    }

    /// HID class request addressed to an interface.
    pub fn class_interface(direction: Direction, request: u8, value: u16, interface: u8) -> Self {
        Self {
            direction,
            request_type: RequestType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: interface as u16,
        }
    }

    /// bmRequestType byte for this setup packet.
    pub fn bm_request_type(&self) -> u8 {
        rusb::request_type(self.direction, self.request_type, self.recipient)
    }
}

/// Host USB stack operations consumed by the driver.
///
/// Control and interrupt reads take `&self` so that independent requests
/// (string descriptor fan-out) can be issued from several threads at once.
pub trait UsbTransport: Send + Sync {
    /// Device-to-host control transfer. Returns at most `length` bytes.
    fn read_control(&self, setup: &ControlSetup, length: usize) -> TransportResult<Vec<u8>>;

    /// Host-to-device control transfer. Returns the number of bytes written.
    fn write_control(&self, setup: &ControlSetup, data: &[u8]) -> TransportResult<usize>;

    /// Interrupt IN transfer on `endpoint`.
    fn read_interrupt(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> TransportResult<Vec<u8>>;

    fn claim_interface(&mut self, interface: u8) -> TransportResult<()>;

    fn release_interface(&mut self, interface: u8) -> TransportResult<()>;

    /// Port reset of the device.
    fn reset(&mut self) -> TransportResult<()>;

    /// Detach an OS driver bound to `interface` before claiming it.
    fn detach_kernel_driver(&mut self, _interface: u8) {}
}

/// libusb-backed transport.
pub struct RusbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
    timeout: Duration,
}

impl RusbTransport {
    /// List devices matching the vendor and product ID.
    pub fn find_devices(
        context: &rusb::Context,
        vendor_id: u16,
        product_id: u16,
    ) -> TransportResult<Vec<rusb::Device<rusb::Context>>> {
        use rusb::UsbContext;

        let devices = context.devices()?;
        Ok(devices
            .iter()
            .filter(|d| {
                d.device_descriptor()
                    .map(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Open a device handle.
    pub fn open(device: &rusb::Device<rusb::Context>) -> TransportResult<Self> {
        let handle = device.open()?;
        Ok(Self {
            handle,
            timeout: CONTROL_TIMEOUT,
        })
    }

    /// Bus/address identifier, e.g. `001:004`.
    pub fn bus_id(&self) -> String {
        let device = self.handle.device();
        format!("{:03}:{:03}", device.bus_number(), device.address())
    }
}

impl UsbTransport for RusbTransport {
    fn read_control(&self, setup: &ControlSetup, length: usize) -> TransportResult<Vec<u8>> {
        log::trace!(
            "control IN: type={:#04x} request={:#04x} value={:#06x} index={} len={}",
            setup.bm_request_type(),
            setup.request,
            setup.value,
            setup.index,
            length
        );
        let mut buffer = vec![0u8; length];
        let len = self.handle.read_control(
            setup.bm_request_type(),
            setup.request,
            setup.value,
            setup.index,
            &mut buffer,
            self.timeout,
        )?;
        buffer.truncate(len);
        Ok(buffer)
    }

    fn write_control(&self, setup: &ControlSetup, data: &[u8]) -> TransportResult<usize> {
        log::trace!(
            "control OUT: type={:#04x} request={:#04x} value={:#06x} index={} len={}",
            setup.bm_request_type(),
            setup.request,
            setup.value,
            setup.index,
            data.len()
        );
        Ok(self.handle.write_control(
            setup.bm_request_type(),
            setup.request,
            setup.value,
            setup.index,
            data,
            self.timeout,
        )?)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> TransportResult<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        let len = self.handle.read_interrupt(endpoint, &mut buffer, timeout)?;
        buffer.truncate(len);
        Ok(buffer)
    }

    fn claim_interface(&mut self, interface: u8) -> TransportResult<()> {
        Ok(self.handle.claim_interface(interface)?)
    }

    fn release_interface(&mut self, interface: u8) -> TransportResult<()> {
        Ok(self.handle.release_interface(interface)?)
    }

    fn reset(&mut self) -> TransportResult<()> {
        Ok(self.handle.reset()?)
    }

    fn detach_kernel_driver(&mut self, interface: u8) {
        match self.handle.kernel_driver_active(interface) {
            Ok(true) => match self.handle.detach_kernel_driver(interface) {
                Ok(()) => log::info!("Detached kernel driver from interface {}", interface),
                Err(e) => log::warn!("Detach interface {}: {} (continuing)", interface, e),
            },
            Ok(false) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::debug!("kernel_driver_active({}): {}", interface, e),
        }
    }
}
