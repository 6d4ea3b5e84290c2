//! HID report descriptors served through the Report Map characteristic.
//!
//! Both descriptors carry report IDs so a single Report Map can describe the
//! keyboard (ID 1) and the mouse (ID 2).

use std::collections::BTreeMap;

use crate::errors::{BlehidError, BlehidResult};

/// Report ID used for keyboard input reports
pub const KEYBOARD_REPORT_ID: u8 = 1;

/// Report ID used for mouse input reports
pub const MOUSE_REPORT_ID: u8 = 2;

/// Keyboard: 8 modifier bits, a reserved byte, 5 LED outputs, 6 key slots.
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, //   Report ID (1)
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant)
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (Application)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

/// Mouse: 3 buttons, relative X/Y and a wheel.
pub const MOUSE_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, MOUSE_REPORT_ID, //   Report ID (2)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x03, //     Usage Maximum (Button 3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant)
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Keyboard and mouse descriptors concatenated into one Report Map
pub fn combined_report_map() -> Vec<u8> {
    let mut map = Vec::with_capacity(KEYBOARD_REPORT_DESCRIPTOR.len() + MOUSE_REPORT_DESCRIPTOR.len());
    map.extend_from_slice(KEYBOARD_REPORT_DESCRIPTOR);
    map.extend_from_slice(MOUSE_REPORT_DESCRIPTOR);
    map
}

// ----------------------------------------------------------------------------
// Descriptor Parsing
// ----------------------------------------------------------------------------

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;

const MAIN_INPUT: u8 = 0x8;

const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xA;
const GLOBAL_POP: u8 = 0xB;

const LONG_ITEM_PREFIX: u8 = 0xFE;

#[derive(Debug, Clone, Copy, Default)]
struct GlobalState {
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

/// Input report payload lengths in bytes, keyed by report ID.
///
/// Descriptors without a Report ID item report under ID 0. The lengths
/// exclude the report ID prefix byte.
pub fn input_report_lengths(descriptor: &[u8]) -> BlehidResult<BTreeMap<u8, usize>> {
    let mut bits: BTreeMap<u8, u64> = BTreeMap::new();
    let mut state = GlobalState::default();
    let mut stack: Vec<GlobalState> = Vec::new();

    let mut i = 0;
    while i < descriptor.len() {
        let prefix = descriptor[i];

        if prefix == LONG_ITEM_PREFIX {
            let size = *descriptor
                .get(i + 1)
                .ok_or_else(|| truncated(i))? as usize;
            i += 3 + size;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = descriptor
            .get(i + 1..i + 1 + size)
            .ok_or_else(|| truncated(i))?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | *byte as u32);

        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;

        match (item_type, tag) {
            (ITEM_TYPE_MAIN, MAIN_INPUT) => {
                *bits.entry(state.report_id).or_insert(0) +=
                    state.report_size as u64 * state.report_count as u64;
            }
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_SIZE) => state.report_size = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_COUNT) => state.report_count = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_REPORT_ID) => {
                state.report_id = u8::try_from(value).map_err(|_| BlehidError::Input {
                    reason: format!("report id {} out of range at offset {}", value, i),
                })?;
            }
            (ITEM_TYPE_GLOBAL, GLOBAL_PUSH) => stack.push(state),
            (ITEM_TYPE_GLOBAL, GLOBAL_POP) => {
                state = stack.pop().ok_or_else(|| BlehidError::Input {
                    reason: format!("pop without push at offset {}", i),
                })?;
            }
            _ => {}
        }

        i += 1 + size;
    }

    Ok(bits
        .into_iter()
        .map(|(id, bits)| (id, bits.div_ceil(8) as usize))
        .collect())
}

fn truncated(offset: usize) -> BlehidError {
    BlehidError::Input {
        reason: format!("truncated descriptor item at offset {}", offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_input_length() {
        let lengths = input_report_lengths(KEYBOARD_REPORT_DESCRIPTOR).unwrap();
        assert_eq!(lengths.get(&KEYBOARD_REPORT_ID), Some(&8));
        assert_eq!(lengths.len(), 1);
    }

    #[test]
    fn test_mouse_input_length() {
        let lengths = input_report_lengths(MOUSE_REPORT_DESCRIPTOR).unwrap();
        assert_eq!(lengths.get(&MOUSE_REPORT_ID), Some(&4));
    }

    #[test]
    fn test_combined_map_keeps_both_reports() {
        let lengths = input_report_lengths(&combined_report_map()).unwrap();
        assert_eq!(lengths.get(&KEYBOARD_REPORT_ID), Some(&8));
        assert_eq!(lengths.get(&MOUSE_REPORT_ID), Some(&4));
    }

    #[test]
    fn test_push_pop_and_no_report_id() {
        let descriptor = [
            0x75, 0x08, // Report Size (8)
            0x95, 0x02, // Report Count (2)
            0xA4, // Push
            0x95, 0x04, // Report Count (4)
            0x81, 0x02, // Input: 32 bits
            0xB4, // Pop
            0x81, 0x02, // Input: 16 bits
        ];
        let lengths = input_report_lengths(&descriptor).unwrap();
        assert_eq!(lengths.get(&0), Some(&6));
    }

    #[test]
    fn test_malformed_descriptors() {
        assert!(input_report_lengths(&[0x75]).is_err());
        assert!(input_report_lengths(&[0xB4]).is_err());
    }
}
