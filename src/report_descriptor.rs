//! HID Report Descriptor parser.
//!
//! Walks the short-item byte stream with a collection stack and a
//! [`ParserContext`] holding the global and local item registers. The result
//! is a collection tree plus a flat list of every report that was declared.

use crate::{Result, TrackerError};
use std::collections::BTreeMap;

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;
const ITEM_TYPE_LOCAL: u8 = 2;

const LONG_ITEM_PREFIX: u8 = 0xFE;

// Main item tags
const MAIN_INPUT: u8 = 0x8;
const MAIN_OUTPUT: u8 = 0x9;
const MAIN_COLLECTION: u8 = 0xA;
const MAIN_FEATURE: u8 = 0xB;
const MAIN_END_COLLECTION: u8 = 0xC;

// Global item tags
const GLOBAL_USAGE_PAGE: u8 = 0x0;
const GLOBAL_LOGICAL_MINIMUM: u8 = 0x1;
const GLOBAL_LOGICAL_MAXIMUM: u8 = 0x2;
const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xA;
const GLOBAL_POP: u8 = 0xB;

// Local item tags
const LOCAL_USAGE: u8 = 0x0;

/// Collection type codes from the Collection main item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectionKind {
    Physical,
    Application,
    Logical,
    Report,
    NamedArray,
    UsageSwitch,
    UsageModifier,
    /// Vendor-defined or reserved code.
    Unknown(u8),
}

impl From<u8> for CollectionKind {
    fn from(code: u8) -> Self {
        match code {
            0x00 => CollectionKind::Physical,
            0x01 => CollectionKind::Application,
            0x02 => CollectionKind::Logical,
            0x03 => CollectionKind::Report,
            0x04 => CollectionKind::NamedArray,
            0x05 => CollectionKind::UsageSwitch,
            0x06 => CollectionKind::UsageModifier,
            other => CollectionKind::Unknown(other),
        }
    }
}

/// One Input/Output/Feature main item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidField {
    /// Extended usage: usage page in the high 16 bits.
    pub usage: u32,
    pub logical_minimum: i32,
    pub logical_maximum: i32,
    /// Bits per element.
    pub report_size: u32,
    pub report_count: u32,
}

impl HidField {
    /// Whole bytes this field contributes to its report.
    pub fn byte_len(&self) -> usize {
        (self.report_size / 8) as usize * self.report_count as usize
    }
}

/// Fields declared under one report ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidReport {
    pub report_id: u8,
    pub inputs: Vec<HidField>,
    pub outputs: Vec<HidField>,
    pub features: Vec<HidField>,
    /// Input report payload size in bytes, excluding the report ID byte.
    pub total_size: usize,
}

impl HidReport {
    fn new(report_id: u8) -> Self {
        Self {
            report_id,
            ..Default::default()
        }
    }

    fn input_size(&self) -> usize {
        self.inputs.iter().map(HidField::byte_len).sum()
    }
}

/// Collection node. Holds at most one child per collection kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidCollection {
    pub children: BTreeMap<CollectionKind, HidCollection>,
    /// Indices into [`HidReportDescriptor::reports`].
    pub reports: Vec<usize>,
}

impl HidCollection {
    pub fn child(&self, kind: CollectionKind) -> Option<&HidCollection> {
        self.children.get(&kind)
    }

    /// Nesting depth of the deepest collection below this node.
    pub fn depth(&self) -> usize {
        self.children.values().map(|c| c.depth() + 1).max().unwrap_or(0)
    }
}

/// Parsed report descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidReportDescriptor {
    pub root: HidCollection,
    /// Every report in declaration order.
    pub reports: Vec<HidReport>,
}

/// Global item registers, saved and restored by Push/Pop.
#[derive(Debug, Clone, Copy, Default)]
struct GlobalState {
    usage_page: u32,
    logical_minimum: i32,
    logical_maximum: i32,
    report_size: u32,
    report_count: u32,
}

/// Running parse state threaded through every item.
#[derive(Debug, Default)]
struct ParserContext {
    global: GlobalState,
    global_stack: Vec<GlobalState>,
    /// Local usage register, cleared after each main item.
    usage: u32,
    /// Open collections; the root is always at index 0.
    stack: Vec<(CollectionKind, HidCollection)>,
    reports: Vec<HidReport>,
    current_report: Option<usize>,
}

impl ParserContext {
    fn new() -> Self {
        Self {
            stack: vec![(CollectionKind::Application, HidCollection::default())],
            ..Default::default()
        }
    }

    fn field(&self) -> HidField {
        HidField {
            usage: self.usage,
            logical_minimum: self.global.logical_minimum,
            logical_maximum: self.global.logical_maximum,
            report_size: self.global.report_size,
            report_count: self.global.report_count,
        }
    }

    fn active_collection(&mut self) -> &mut HidCollection {
        // The root entry is never popped.
        let last = self.stack.len() - 1;
        &mut self.stack[last].1
    }

    fn start_report(&mut self, report_id: u8) -> usize {
        let index = self.reports.len();
        self.reports.push(HidReport::new(report_id));
        self.active_collection().reports.push(index);
        self.current_report = Some(index);
        index
    }

    /// Active report, opening an implicit ID-0 report for descriptors that
    /// never declare a Report ID.
    fn report(&mut self) -> &mut HidReport {
        let index = match self.current_report {
            Some(index) => index,
            None => self.start_report(0),
        };
        &mut self.reports[index]
    }

    fn main_item(&mut self, tag: u8, data: u32) -> Result<()> {
        match tag {
            MAIN_INPUT => {
                let field = self.field();
                self.report().inputs.push(field);
            }
            MAIN_OUTPUT => {
                let field = self.field();
                self.report().outputs.push(field);
            }
            MAIN_FEATURE => {
                let field = self.field();
                self.report().features.push(field);
            }
            MAIN_COLLECTION => {
                let kind = CollectionKind::from(data as u8);
                self.stack.push((kind, HidCollection::default()));
            }
            MAIN_END_COLLECTION => {
                if self.stack.len() <= 1 {
                    return Err(TrackerError::MalformedReportDescriptor(
                        "End Collection without matching Collection".into(),
                    ));
                }
                if let Some((kind, node)) = self.stack.pop() {
                    self.active_collection().children.insert(kind, node);
                }
            }
            other => log::trace!("ignoring main item tag {:#x}", other),
        }
        self.usage = 0;
        Ok(())
    }

    fn global_item(&mut self, tag: u8, data: u32, size: usize) -> Result<()> {
        match tag {
            GLOBAL_USAGE_PAGE => self.global.usage_page = data,
            GLOBAL_LOGICAL_MINIMUM => self.global.logical_minimum = sign_extend(data, size),
            GLOBAL_LOGICAL_MAXIMUM => self.global.logical_maximum = sign_extend(data, size),
            GLOBAL_REPORT_SIZE => self.global.report_size = data,
            GLOBAL_REPORT_ID => {
                self.start_report(data as u8);
            }
            GLOBAL_REPORT_COUNT => self.global.report_count = data,
            GLOBAL_PUSH => self.global_stack.push(self.global),
            GLOBAL_POP => {
                self.global = self.global_stack.pop().ok_or_else(|| {
                    TrackerError::MalformedReportDescriptor("Pop without matching Push".into())
                })?;
            }
            other => log::trace!("ignoring global item tag {:#x}", other),
        }
        Ok(())
    }

    fn local_item(&mut self, tag: u8, data: u32, size: usize) {
        match tag {
            LOCAL_USAGE if size == 4 => self.usage = data,
            LOCAL_USAGE => self.usage = (self.usage_page() << 16) | data,
            other => log::trace!("ignoring local item tag {:#x}", other),
        }
    }

    fn usage_page(&self) -> u32 {
        self.global.usage_page & 0xFFFF
    }

    fn finish(mut self) -> Result<HidReportDescriptor> {
        if self.stack.len() != 1 {
            return Err(TrackerError::MalformedReportDescriptor(format!(
                "{} collection(s) left open",
                self.stack.len() - 1
            )));
        }
        for report in &mut self.reports {
            report.total_size = report.input_size();
        }
        let (_, root) = self.stack.remove(0);
        Ok(HidReportDescriptor {
            root,
            reports: self.reports,
        })
    }
}

/// Sign-extend item data of `size` bytes.
fn sign_extend(data: u32, size: usize) -> i32 {
    match size {
        1 => data as u8 as i8 as i32,
        2 => data as u16 as i16 as i32,
        _ => data as i32,
    }
}

impl HidReportDescriptor {
    /// Parse a raw report descriptor.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut ctx = ParserContext::new();
        let mut o = 0;

        while o < data.len() {
            let prefix = data[o];
            o += 1;

            if prefix == LONG_ITEM_PREFIX {
                return Err(TrackerError::MalformedReportDescriptor(format!(
                    "long item at byte {} is not supported",
                    o - 1
                )));
            }

            let tag = prefix >> 4;
            let item_type = (prefix >> 2) & 0x3;
            let size = match prefix & 0x3 {
                3 => 4,
                n => n as usize,
            };

            let bytes = data.get(o..o + size).ok_or_else(|| {
                TrackerError::MalformedReportDescriptor(format!(
                    "item at byte {} needs {} data byte(s), {} left",
                    o - 1,
                    size,
                    data.len() - o
                ))
            })?;
            let value = bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);
            o += size;

            match item_type {
                ITEM_TYPE_MAIN => ctx.main_item(tag, value)?,
                ITEM_TYPE_GLOBAL => ctx.global_item(tag, value, size)?,
                ITEM_TYPE_LOCAL => ctx.local_item(tag, value, size),
                _ => log::trace!("ignoring reserved item type at byte {}", o - size - 1),
            }
        }

        ctx.finish()
    }

    pub fn report(&self, index: usize) -> Option<&HidReport> {
        self.reports.get(index)
    }

    /// Find a report by its ID.
    pub fn find_report(&self, report_id: u8) -> Option<&HidReport> {
        self.reports.iter().find(|r| r.report_id == report_id)
    }

    /// Reports listed directly under a collection node.
    pub fn reports_in<'a>(
        &'a self,
        collection: &'a HidCollection,
    ) -> impl Iterator<Item = &'a HidReport> + 'a {
        collection.reports.iter().filter_map(|&i| self.reports.get(i))
    }

    /// Report carrying the streaming telemetry.
    ///
    /// The tracker declares it as the first report of the logical collection
    /// nested in the application collection. Descriptors laid out differently
    /// fall back to the first report that has input fields.
    pub fn telemetry_report(&self) -> Option<&HidReport> {
        self.root
            .child(CollectionKind::Application)
            .and_then(|app| app.child(CollectionKind::Logical))
            .and_then(|logical| self.reports_in(logical).next())
            .or_else(|| self.reports.iter().find(|r| !r.inputs.is_empty()))
    }

    /// Input payload size of the telemetry report, excluding the ID byte.
    pub fn input_report_size(&self) -> Option<usize> {
        self.telemetry_report().map(|r| r.total_size)
    }
}

#[cfg(test)]
pub(crate) mod test_data {
    /// Report descriptor shaped like the tracker's: one vendor input report
    /// of 62 bytes plus the feature reports, inside Application → Logical.
    pub fn tracker_report_descriptor() -> Vec<u8> {
        vec![
            0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
            0x09, 0x01, // Usage (1)
            0xA1, 0x01, // Collection (Application)
            0xA1, 0x02, //   Collection (Logical)
            0x85, 0x01, //     Report ID (1)
            0x15, 0x00, //     Logical Minimum (0)
            0x26, 0xFF, 0x00, //     Logical Maximum (255)
            0x75, 0x08, //     Report Size (8)
            0x95, 0x3E, //     Report Count (62)
            0x09, 0x02, //     Usage (2)
            0x81, 0x02, //     Input (Data, Var, Abs)
            0x85, 0x02, //     Report ID (2)
            0x95, 0x07, //     Report Count (7)
            0x09, 0x03, //     Usage (3)
            0xB1, 0x02, //     Feature
            0xC0, //   End Collection
            0xC0, // End Collection
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::test_data::*;
    use super::*;

    #[test]
    fn test_parse_tracker_descriptor() {
        let desc = HidReportDescriptor::parse(&tracker_report_descriptor()).unwrap();
        assert_eq!(desc.reports.len(), 2);
        assert_eq!(desc.root.depth(), 2);

        let report = desc.telemetry_report().unwrap();
        assert_eq!(report.report_id, 1);
        assert_eq!(report.total_size, 62);
        assert_eq!(report.inputs.len(), 1);
        assert_eq!(desc.input_report_size(), Some(62));

        let input = report.inputs[0];
        assert_eq!(input.usage, 0xFF00_0002);
        assert_eq!(input.logical_minimum, 0);
        assert_eq!(input.logical_maximum, 255);
        assert_eq!(input.report_size, 8);
        assert_eq!(input.report_count, 62);

        let feature = desc.find_report(2).unwrap();
        assert_eq!(feature.features.len(), 1);
        assert_eq!(feature.features[0].report_count, 7);
        assert_eq!(feature.total_size, 0);

        let logical = desc
            .root
            .child(CollectionKind::Application)
            .and_then(|c| c.child(CollectionKind::Logical))
            .unwrap();
        let ids: Vec<u8> = desc.reports_in(logical).map(|r| r.report_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_balanced_collections_return_to_root() {
        let data = [0xA1, 0x00, 0xA1, 0x03, 0xC0, 0xA1, 0x04, 0xC0, 0xC0];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        let physical = desc.root.child(CollectionKind::Physical).unwrap();
        assert!(physical.child(CollectionKind::Report).is_some());
        assert!(physical.child(CollectionKind::NamedArray).is_some());
    }

    #[test]
    fn test_missing_end_collection_is_malformed() {
        let mut data = tracker_report_descriptor();
        data.pop();
        let err = HidReportDescriptor::parse(&data).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedReportDescriptor(_)));
    }

    #[test]
    fn test_extra_end_collection_is_malformed() {
        let err = HidReportDescriptor::parse(&[0xA1, 0x01, 0xC0, 0xC0]).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedReportDescriptor(_)));
    }

    #[test]
    fn test_long_item_is_malformed() {
        let err = HidReportDescriptor::parse(&[0xFE, 0x02, 0x10, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedReportDescriptor(_)));
    }

    #[test]
    fn test_truncated_item_is_malformed() {
        let err = HidReportDescriptor::parse(&[0x05, 0x01, 0x26, 0xFF]).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedReportDescriptor(_)));
    }

    #[test]
    fn test_report_total_size() {
        let data = [
            0x85, 0x05, // Report ID (5)
            0x75, 0x10, // Report Size (16)
            0x95, 0x03, // Report Count (3)
            0x81, 0x02, // Input
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        assert_eq!(desc.find_report(5).unwrap().total_size, 6);
    }

    #[test]
    fn test_total_size_sums_inputs_only() {
        let data = [
            0x85, 0x01, // Report ID (1)
            0x75, 0x08, 0x95, 0x02, 0x81, 0x02, // 2 x 8 bit input
            0x75, 0x10, 0x95, 0x04, 0x81, 0x02, // 4 x 16 bit input
            0x95, 0x09, 0x91, 0x02, // 9 x 16 bit output
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        let report = desc.find_report(1).unwrap();
        assert_eq!(report.total_size, 10);
        assert_eq!(report.outputs.len(), 1);
    }

    #[test]
    fn test_implicit_report_without_report_id() {
        let data = [0x75, 0x08, 0x95, 0x04, 0x81, 0x02];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        assert_eq!(desc.reports.len(), 1);
        assert_eq!(desc.reports[0].report_id, 0);
        assert_eq!(desc.reports[0].total_size, 4);
        assert_eq!(desc.root.reports, vec![0]);
        assert_eq!(desc.telemetry_report().unwrap().report_id, 0);
    }

    #[test]
    fn test_logical_minimum_sign_extended() {
        let data = [
            0x15, 0x81, // Logical Minimum (-127)
            0x26, 0xFF, 0x7F, // Logical Maximum (32767)
            0x75, 0x10, 0x95, 0x01, 0x81, 0x02,
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        let field = desc.reports[0].inputs[0];
        assert_eq!(field.logical_minimum, -127);
        assert_eq!(field.logical_maximum, 32767);
    }

    #[test]
    fn test_usage_cleared_after_main_item() {
        let data = [
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x30, // Usage (X)
            0x75, 0x08, 0x95, 0x01, 0x81, 0x02, // Input
            0x81, 0x02, // Input, no usage
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        let inputs = &desc.reports[0].inputs;
        assert_eq!(inputs[0].usage, 0x0001_0030);
        assert_eq!(inputs[1].usage, 0);
    }

    #[test]
    fn test_push_pop_restores_globals() {
        let data = [
            0x75, 0x08, // Report Size (8)
            0xA4, // Push
            0x75, 0x20, // Report Size (32)
            0x95, 0x01, 0x81, 0x02, // Input (4 bytes)
            0xB4, // Pop
            0x81, 0x02, // Input (1 byte, count was 0 at push)
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        let inputs = &desc.reports[0].inputs;
        assert_eq!(inputs[0].report_size, 32);
        assert_eq!(inputs[1].report_size, 8);
        assert_eq!(inputs[1].report_count, 0);
    }

    #[test]
    fn test_pop_without_push_is_malformed() {
        let err = HidReportDescriptor::parse(&[0xB4]).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedReportDescriptor(_)));
    }

    #[test]
    fn test_unknown_collection_and_tags_ignored() {
        let data = [
            0xA1, 0x80, // Collection (vendor 0x80)
            0x35, 0x00, // Physical Minimum, ignored
            0x19, 0x01, // Usage Minimum, ignored
            0xC0,
        ];
        let desc = HidReportDescriptor::parse(&data).unwrap();
        assert!(desc.root.child(CollectionKind::Unknown(0x80)).is_some());
    }
}
