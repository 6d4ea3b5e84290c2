//! HID report construction and descriptors

pub mod builder;
pub mod descriptor;

pub use builder::{report_descriptor, HidReportBuilder, ReportKind};
pub use descriptor::{combined_report_map, input_report_lengths};
