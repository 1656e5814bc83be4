//! USB standard descriptors and the GET_DESCRIPTOR bring-up fan-out.
//!
//! Parsers take the raw buffer returned by a GET_DESCRIPTOR control transfer.
//! Every fixed `bLength`/`bDescriptorType` pair is checked; a mismatch or a
//! truncated buffer is a [`TrackerError::MalformedDescriptor`].
//!
//! Parsed descriptors carry the string *indices* they reference. Names are
//! filled in by [`fetch_device_descriptor`], which only returns once every
//! index has resolved.

use crate::protocol::{
    CONFIGURATION_BUFFER_SIZE, DESCRIPTOR_CONFIGURATION, DESCRIPTOR_DEVICE, DESCRIPTOR_STRING,
    REQUEST_GET_DESCRIPTOR, STRING_BUFFER_SIZE,
};
use crate::transport::{ControlSetup, UsbTransport};
use crate::{Result, TrackerError};
use std::collections::HashMap;

pub const DEVICE_DESCRIPTOR_LENGTH: u8 = 18;
pub const DEVICE_DESCRIPTOR_TYPE: u8 = 1;
pub const CONFIGURATION_DESCRIPTOR_LENGTH: u8 = 9;
pub const CONFIGURATION_DESCRIPTOR_TYPE: u8 = 2;
pub const STRING_DESCRIPTOR_TYPE: u8 = 3;
pub const INTERFACE_DESCRIPTOR_LENGTH: u8 = 9;
pub const INTERFACE_DESCRIPTOR_TYPE: u8 = 4;
pub const ENDPOINT_DESCRIPTOR_LENGTH: u8 = 7;
pub const ENDPOINT_DESCRIPTOR_TYPE: u8 = 5;
pub const HID_DESCRIPTOR_LENGTH: u8 = 9;
pub const HID_DESCRIPTOR_TYPE: u8 = 33;

pub const INTERFACE_CLASS_HID: u8 = 3;

/// Little-endian cursor over a descriptor buffer.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], offset: usize, what: &'static str) -> Self {
        Self { data, offset, what }
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.offset).ok_or_else(|| {
            TrackerError::MalformedDescriptor(format!(
                "{} truncated at byte {} (buffer is {} bytes)",
                self.what,
                self.offset,
                self.data.len()
            ))
        })?;
        self.offset += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    /// Check a fixed header byte.
    fn expect(&mut self, field: &str, expected: u8) -> Result<()> {
        let actual = self.u8()?;
        if actual != expected {
            return Err(TrackerError::MalformedDescriptor(format!(
                "{} {}: expected {}, got {}",
                self.what, field, expected, actual
            )));
        }
        Ok(())
    }
}

/// Standard device descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub usb_version: rusb::Version,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: rusb::Version,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub configuration_count: u8,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub configurations: Vec<ConfigurationDescriptor>,
}

impl DeviceDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, 0, "device descriptor");
        r.expect("bLength", DEVICE_DESCRIPTOR_LENGTH)?;
        r.expect("bDescriptorType", DEVICE_DESCRIPTOR_TYPE)?;
        Ok(DeviceDescriptor {
            usb_version: rusb::Version::from_bcd(r.u16()?),
            device_class: r.u8()?,
            device_sub_class: r.u8()?,
            device_protocol: r.u8()?,
            max_packet_size: r.u8()?,
            vendor_id: r.u16()?,
            product_id: r.u16()?,
            device_release: rusb::Version::from_bcd(r.u16()?),
            manufacturer_index: r.u8()?,
            product_index: r.u8()?,
            serial_number_index: r.u8()?,
            configuration_count: r.u8()?,
            manufacturer: String::new(),
            product: String::new(),
            serial_number: String::new(),
            configurations: Vec::new(),
        })
    }
}

bitflags::bitflags! {
    /// bmAttributes of a configuration descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigAttributes: u8 {
        const REMOTE_WAKEUP = 1 << 5;
        const SELF_POWERED  = 1 << 6;
        /// Reserved, always set by compliant devices.
        const BUS_POWERED   = 1 << 7;
    }
}

/// Configuration descriptor together with the interfaces packed after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: ConfigAttributes,
    /// In units of 2 mA.
    pub max_power: u8,
    pub name: String,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ConfigurationDescriptor {
    /// Parse a full configuration bundle (configuration, interfaces, class
    /// descriptors, endpoints) as returned by GET_DESCRIPTOR(CONFIGURATION).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, 0, "configuration descriptor");
        // bLength is not checked: some devices report extended headers.
        let header_length = r.u8()?;
        r.expect("bDescriptorType", CONFIGURATION_DESCRIPTOR_TYPE)?;
        let total_length = r.u16()?;
        let interface_count = r.u8()?;
        let configuration_value = r.u8()?;
        let configuration_index = r.u8()?;
        let attributes = ConfigAttributes::from_bits_retain(r.u8()?);
        let max_power = r.u8()?;

        let mut offset = (header_length as usize).max(CONFIGURATION_DESCRIPTOR_LENGTH as usize);
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let interface = InterfaceDescriptor::parse(data, offset)?;
            offset += interface.encoded_len();
            interfaces.push(interface);
        }

        let end = (total_length as usize).min(data.len());
        if offset + 1 < end && data[offset + 1] == CONFIGURATION_DESCRIPTOR_TYPE {
            return Err(TrackerError::UnsupportedDevice(format!(
                "second configuration packed at byte {}",
                offset
            )));
        }

        Ok(ConfigurationDescriptor {
            total_length,
            configuration_value,
            configuration_index,
            attributes,
            max_power,
            name: String::new(),
            interfaces,
        })
    }

    /// Maximum current draw in milliamps.
    pub fn max_power_ma(&self) -> u16 {
        self.max_power as u16 * 2
    }
}

/// Interface descriptor with its optional HID class descriptor and endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub interface_index: u8,
    pub name: String,
    pub hid: Option<HidDescriptor>,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let mut r = Reader::new(data, offset, "interface descriptor");
        r.expect("bLength", INTERFACE_DESCRIPTOR_LENGTH)?;
        r.expect("bDescriptorType", INTERFACE_DESCRIPTOR_TYPE)?;
        let interface_number = r.u8()?;
        let alternate_setting = r.u8()?;
        let endpoint_count = r.u8()?;
        let interface_class = r.u8()?;
        let interface_sub_class = r.u8()?;
        let interface_protocol = r.u8()?;
        let interface_index = r.u8()?;

        let mut offset = r.offset;
        let hid = if interface_class == INTERFACE_CLASS_HID {
            let hid = HidDescriptor::parse(data, offset)?;
            offset += HID_DESCRIPTOR_LENGTH as usize;
            Some(hid)
        } else {
            None
        };

        let mut endpoints = Vec::with_capacity(endpoint_count as usize);
        for _ in 0..endpoint_count {
            endpoints.push(EndpointDescriptor::parse(data, offset)?);
            offset += ENDPOINT_DESCRIPTOR_LENGTH as usize;
        }

        Ok(InterfaceDescriptor {
            interface_number,
            alternate_setting,
            interface_class,
            interface_sub_class,
            interface_protocol,
            interface_index,
            name: String::new(),
            hid,
            endpoints,
        })
    }

    /// Bytes this interface occupies in a configuration bundle.
    pub fn encoded_len(&self) -> usize {
        let hid = if self.hid.is_some() {
            HID_DESCRIPTOR_LENGTH as usize
        } else {
            0
        };
        INTERFACE_DESCRIPTOR_LENGTH as usize
            + hid
            + self.endpoints.len() * ENDPOINT_DESCRIPTOR_LENGTH as usize
    }

    /// First interrupt IN endpoint, where HID input reports arrive.
    pub fn interrupt_in_endpoint(&self) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|ep| {
            ep.direction() == rusb::Direction::In
                && ep.transfer_type() == rusb::TransferType::Interrupt
        })
    }
}

/// HID class descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HidDescriptor {
    pub hid_version: rusb::Version,
    pub country_code: u8,
    /// Type of the class descriptor that follows (0x22 = report descriptor).
    pub descriptor_type: u8,
    pub descriptor_length: u16,
}

impl HidDescriptor {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let mut r = Reader::new(data, offset, "HID descriptor");
        r.expect("bLength", HID_DESCRIPTOR_LENGTH)?;
        r.expect("bDescriptorType", HID_DESCRIPTOR_TYPE)?;
        let hid_version = rusb::Version::from_bcd(r.u16()?);
        let country_code = r.u8()?;
        let descriptor_count = r.u8()?;
        if descriptor_count != 1 {
            return Err(TrackerError::UnsupportedDevice(format!(
                "HID interface declares {} class descriptors",
                descriptor_count
            )));
        }
        Ok(HidDescriptor {
            hid_version,
            country_code,
            descriptor_type: r.u8()?,
            descriptor_length: r.u16()?,
        })
    }
}

/// Endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let mut r = Reader::new(data, offset, "endpoint descriptor");
        r.expect("bLength", ENDPOINT_DESCRIPTOR_LENGTH)?;
        r.expect("bDescriptorType", ENDPOINT_DESCRIPTOR_TYPE)?;
        Ok(EndpointDescriptor {
            address: r.u8()?,
            attributes: r.u8()?,
            max_packet_size: r.u16()?,
            interval: r.u8()?,
        })
    }

    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    pub fn direction(&self) -> rusb::Direction {
        if self.address & 0x80 != 0 {
            rusb::Direction::In
        } else {
            rusb::Direction::Out
        }
    }

    pub fn transfer_type(&self) -> rusb::TransferType {
        match self.attributes & 0x03 {
            0 => rusb::TransferType::Control,
            1 => rusb::TransferType::Isochronous,
            2 => rusb::TransferType::Bulk,
            _ => rusb::TransferType::Interrupt,
        }
    }
}

/// Decode a string descriptor (UTF-16LE payload after the 2-byte header).
pub fn parse_string_descriptor(data: &[u8]) -> Result<String> {
    let mut r = Reader::new(data, 0, "string descriptor");
    let length = r.u8()? as usize;
    r.expect("bDescriptorType", STRING_DESCRIPTOR_TYPE)?;
    let end = length.clamp(2, data.len());
    let units: Vec<u16> = data[2..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string())
}

/// Fetch and decode a single string descriptor.
pub fn fetch_string<T: UsbTransport + ?Sized>(transport: &T, index: u8) -> Result<String> {
    let setup = ControlSetup::standard_in(
        REQUEST_GET_DESCRIPTOR,
        DESCRIPTOR_STRING | index as u16,
        0,
    );
    let data = transport
        .read_control(&setup, STRING_BUFFER_SIZE)
        .map_err(|e| {
            log::warn!("String descriptor {} fetch failed: {}", index, e);
            TrackerError::StringResolution(index)
        })?;
    parse_string_descriptor(&data).map_err(|e| {
        log::warn!("String descriptor {} malformed: {}", index, e);
        TrackerError::StringResolution(index)
    })
}

/// Resolve a set of string indices concurrently.
///
/// One scoped worker per distinct non-zero index; results are gathered as
/// they complete. The first failure is returned and every other result is
/// discarded. Index 0 means "no string" and maps to an empty name.
pub fn resolve_strings<T: UsbTransport + ?Sized>(
    transport: &T,
    indices: &[u8],
) -> Result<HashMap<u8, String>> {
    let mut unique: Vec<u8> = indices.iter().copied().filter(|&i| i != 0).collect();
    unique.sort_unstable();
    unique.dedup();

    let mut names = HashMap::with_capacity(unique.len() + 1);
    names.insert(0, String::new());
    if unique.is_empty() {
        return Ok(names);
    }

    std::thread::scope(|scope| -> Result<HashMap<u8, String>> {
        let (sender, receiver) = crossbeam_channel::bounded(unique.len());
        for &index in &unique {
            let sender = sender.clone();
            scope.spawn(move || {
                let _ = sender.send((index, fetch_string(transport, index)));
            });
        }
        drop(sender);

        for (index, result) in receiver.iter() {
            names.insert(index, result?);
        }
        Ok(names)
    })
}

/// Fetch the device descriptor, every configuration bundle, and all names
/// they reference. No partial tree is ever returned.
pub fn fetch_device_descriptor<T: UsbTransport + ?Sized>(transport: &T) -> Result<DeviceDescriptor> {
    let setup = ControlSetup::standard_in(REQUEST_GET_DESCRIPTOR, DESCRIPTOR_DEVICE, 0);
    let data = transport.read_control(&setup, DEVICE_DESCRIPTOR_LENGTH as usize)?;
    let mut device = DeviceDescriptor::parse(&data)?;

    for index in 0..device.configuration_count {
        let setup = ControlSetup::standard_in(
            REQUEST_GET_DESCRIPTOR,
            DESCRIPTOR_CONFIGURATION | index as u16,
            0,
        );
        let data = transport.read_control(&setup, CONFIGURATION_BUFFER_SIZE)?;
        device.configurations.push(ConfigurationDescriptor::parse(&data)?);
    }

    let mut indices = vec![
        device.manufacturer_index,
        device.product_index,
        device.serial_number_index,
    ];
    for config in &device.configurations {
        indices.push(config.configuration_index);
        indices.extend(config.interfaces.iter().map(|i| i.interface_index));
    }

    let names = resolve_strings(transport, &indices)?;
    let name = |index: u8| names.get(&index).cloned().unwrap_or_default();

    device.manufacturer = name(device.manufacturer_index);
    device.product = name(device.product_index);
    device.serial_number = name(device.serial_number_index);
    for config in &mut device.configurations {
        config.name = name(config.configuration_index);
        for interface in &mut config.interfaces {
            interface.name = name(interface.interface_index);
        }
    }

    log::debug!(
        "Descriptor tree: {:04x}:{:04x} '{}' '{}' serial='{}' ({} configuration(s))",
        device.vendor_id,
        device.product_id,
        device.manufacturer,
        device.product,
        device.serial_number,
        device.configurations.len()
    );

    Ok(device)
}


#[cfg(test)]
mod tests {
    use super::test_data::*;
    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;

    fn get_descriptor(value: u16) -> ControlSetup {
        ControlSetup::standard_in(REQUEST_GET_DESCRIPTOR, value, 0)
    }

    fn scripted_transport() -> MockTransport {
        scripted_descriptors(0x1234)
    }

    #[test]
    fn test_parse_device_descriptor() {
        let desc = DeviceDescriptor::parse(&device_descriptor()).unwrap();
        assert_eq!(desc.vendor_id, 0x2833);
        assert_eq!(desc.product_id, 0x0001);
        assert_eq!(desc.usb_version, rusb::Version(2, 0, 0));
        assert_eq!(desc.device_release, rusb::Version(1, 0, 5));
        assert_eq!(desc.max_packet_size, 64);
        assert_eq!(desc.manufacturer_index, 1);
        assert_eq!(desc.serial_number_index, 3);
        assert_eq!(desc.configuration_count, 1);
    }

    #[test]
    fn test_parse_configuration_round_trip() {
        let config = ConfigurationDescriptor::parse(&configuration_descriptor(0x1234)).unwrap();
        assert_eq!(config.total_length, 34);
        assert_eq!(config.configuration_value, 1);
        assert_eq!(config.configuration_index, 4);
        assert_eq!(config.attributes, ConfigAttributes::BUS_POWERED);
        assert_eq!(config.max_power_ma(), 100);
        assert_eq!(config.interfaces.len(), 1);

        let interface = &config.interfaces[0];
        assert_eq!(interface.interface_number, 0);
        assert_eq!(interface.interface_class, INTERFACE_CLASS_HID);
        assert_eq!(interface.interface_index, 5);
        assert_eq!(interface.encoded_len(), 25);

        let hid = interface.hid.unwrap();
        assert_eq!(hid.hid_version, rusb::Version(1, 1, 1));
        assert_eq!(hid.descriptor_type, 0x22);
        assert_eq!(hid.descriptor_length, 0x1234);

        let ep = interface.endpoints[0];
        assert_eq!(ep.address, 0x81);
        assert_eq!(ep.attributes, 0x03);
        assert_eq!(ep.max_packet_size, 62);
        assert_eq!(ep.interval, 1);
        assert_eq!(ep.number(), 1);
        assert_eq!(interface.interrupt_in_endpoint(), Some(&ep));
    }

    #[test]
    fn test_parse_non_hid_interface_skips_class_descriptor() {
        let data = [9, 4, 2, 0, 2, 0xFF, 0, 0, 0, 7, 5, 0x02, 0x02, 0, 2, 0, 7, 5, 0x82, 0x02, 0, 2, 0];
        let interface = InterfaceDescriptor::parse(&data, 0).unwrap();
        assert!(interface.hid.is_none());
        assert_eq!(interface.endpoints.len(), 2);
        assert_eq!(interface.endpoints[1].max_packet_size, 512);
        assert_eq!(interface.endpoints[1].direction(), rusb::Direction::In);
        assert_eq!(interface.encoded_len(), 23);
        assert!(interface.interrupt_in_endpoint().is_none());
    }

    #[test]
    fn test_endpoint_wrong_type_is_malformed() {
        let err = EndpointDescriptor::parse(&[7, 4, 0x81, 3, 62, 0, 1], 0).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_truncated_configuration_is_malformed() {
        let data = configuration_descriptor(64);
        let err = ConfigurationDescriptor::parse(&data[..20]).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_multiple_hid_class_descriptors_unsupported() {
        let mut data = hid_descriptor(64);
        data[5] = 2;
        let err = HidDescriptor::parse(&data, 0).unwrap_err();
        assert!(matches!(err, TrackerError::UnsupportedDevice(_)));
    }

    #[test]
    fn test_packed_second_configuration_unsupported() {
        let mut data = configuration_descriptor(64);
        let second = configuration_descriptor(64);
        data.extend(&second);
        let total = (data.len() as u16).to_le_bytes();
        data[2] = total[0];
        data[3] = total[1];
        let err = ConfigurationDescriptor::parse(&data).unwrap_err();
        assert!(matches!(err, TrackerError::UnsupportedDevice(_)));
    }

    #[test]
    fn test_parse_string_descriptor() {
        assert_eq!(
            parse_string_descriptor(&string_descriptor("Tracker DK ")).unwrap(),
            "Tracker DK"
        );
        assert!(parse_string_descriptor(&[4, 2, 0, 0]).is_err());
    }

    #[test]
    fn test_fetch_device_descriptor_resolves_all_names() {
        let mock = scripted_transport();
        let device = fetch_device_descriptor(&mock).unwrap();
        assert_eq!(device.manufacturer, "Oculus VR, Inc.");
        assert_eq!(device.product, "Tracker DK");
        assert_eq!(device.serial_number, "ABCD1234");
        assert_eq!(device.configurations.len(), 1);
        assert_eq!(device.configurations[0].name, "Default");
        assert_eq!(device.configurations[0].interfaces[0].name, "HID");
    }

    #[test]
    fn test_fetch_device_descriptor_fails_on_any_string() {
        let mock = scripted_transport();
        mock.on_read(
            get_descriptor(DESCRIPTOR_STRING | 5),
            Err(TransportError::Pipe),
        );
        let err = fetch_device_descriptor(&mock).unwrap_err();
        assert!(matches!(err, TrackerError::StringResolution(5)));
    }

    #[test]
    fn test_fetch_device_descriptor_transport_failure() {
        let mock = MockTransport::new();
        mock.on_read(get_descriptor(DESCRIPTOR_DEVICE), Err(TransportError::NoDevice));
        let err = fetch_device_descriptor(&mock).unwrap_err();
        assert!(matches!(err, TrackerError::Transport(TransportError::NoDevice)));
    }

    #[test]
    fn test_resolve_strings_index_zero_is_empty() {
        let mock = MockTransport::new();
        let names = resolve_strings(&mock, &[0, 0]).unwrap();
        assert_eq!(names.get(&0).map(String::as_str), Some(""));
        assert_eq!(names.len(), 1);
    }
}
