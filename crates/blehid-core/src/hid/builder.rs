//! Stateful HID report builder
//!
//! Keyboard report (8 bytes):
//! ```text
//! Byte 0: Modifier bitfield (Left Ctrl .. Right GUI)
//! Byte 1: Reserved
//! Byte 2-7: Up to 6 pressed key usages, or ErrorRollOver in every slot
//! ```
//!
//! Mouse report (4 bytes): buttons, X, Y, wheel.

use crate::input::{InputEvent, KeyboardEvent, MouseEvent};
use crate::types::{HidReport, InputSource};

use super::descriptor::{
    KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_ID, MOUSE_REPORT_DESCRIPTOR, MOUSE_REPORT_ID,
};

pub const KEYBOARD_REPORT_SIZE: usize = 8;
pub const MOUSE_REPORT_SIZE: usize = 4;

const MAX_PRESSED_KEYS: usize = 6;
const USAGE_ERROR_ROLL_OVER: u8 = 0x01;
const USAGE_MODIFIER_FIRST: u8 = 0xE0;
const USAGE_MODIFIER_LAST: u8 = 0xE7;

/// Report layouts the builder produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Keyboard,
    Mouse,
}

impl ReportKind {
    pub fn report_id(&self) -> u8 {
        match self {
            ReportKind::Keyboard => KEYBOARD_REPORT_ID,
            ReportKind::Mouse => MOUSE_REPORT_ID,
        }
    }

    pub fn report_size(&self) -> usize {
        match self {
            ReportKind::Keyboard => KEYBOARD_REPORT_SIZE,
            ReportKind::Mouse => MOUSE_REPORT_SIZE,
        }
    }
}

/// Report descriptor describing the layout of `kind`
pub fn report_descriptor(kind: ReportKind) -> &'static [u8] {
    match kind {
        ReportKind::Keyboard => KEYBOARD_REPORT_DESCRIPTOR,
        ReportKind::Mouse => MOUSE_REPORT_DESCRIPTOR,
    }
}

/// Tracks held keys, modifiers and buttons across events
#[derive(Debug, Clone, Default)]
pub struct HidReportBuilder {
    modifiers: u8,
    /// Held non-modifier usages in press order
    pressed: Vec<u8>,
}

impl HidReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, event: &InputEvent) -> HidReport {
        match event {
            InputEvent::Keyboard(event) => self.keyboard_report(event),
            InputEvent::Mouse(event) => self.mouse_report(event),
        }
    }

    /// Apply a key transition and return the resulting keyboard report
    pub fn keyboard_report(&mut self, event: &KeyboardEvent) -> HidReport {
        let usage = event.key_code;
        if (USAGE_MODIFIER_FIRST..=USAGE_MODIFIER_LAST).contains(&usage) {
            let bit = 1 << (usage - USAGE_MODIFIER_FIRST);
            if event.pressed {
                self.modifiers |= bit;
            } else {
                self.modifiers &= !bit;
            }
        } else if usage != 0 {
            if event.pressed {
                if !self.pressed.contains(&usage) {
                    self.pressed.push(usage);
                }
            } else {
                self.pressed.retain(|&held| held != usage);
            }
        }

        self.current_keyboard_report(event.modifiers)
    }

    /// Mouse report for `event`; horizontal scroll is not representable
    pub fn mouse_report(&mut self, event: &MouseEvent) -> HidReport {
        let data = vec![
            event.buttons & 0x07,
            clamp_axis(event.dx),
            clamp_axis(event.dy),
            clamp_axis(event.scroll),
        ];
        HidReport::input(MOUSE_REPORT_ID, data, InputSource::Mouse)
    }

    pub fn has_pressed_keys(&self) -> bool {
        self.modifiers != 0 || !self.pressed.is_empty()
    }

    /// Forget all held keys and return an empty keyboard report
    pub fn release_all(&mut self) -> HidReport {
        self.modifiers = 0;
        self.pressed.clear();
        self.current_keyboard_report(0)
    }

    fn current_keyboard_report(&self, extra_modifiers: u8) -> HidReport {
        let mut data = vec![0u8; KEYBOARD_REPORT_SIZE];
        data[0] = self.modifiers | extra_modifiers;
        if self.pressed.len() > MAX_PRESSED_KEYS {
            data[2..].fill(USAGE_ERROR_ROLL_OVER);
        } else {
            data[2..2 + self.pressed.len()].copy_from_slice(&self.pressed);
        }
        HidReport::input(KEYBOARD_REPORT_ID, data, InputSource::Keyboard)
    }
}

fn clamp_axis(value: i32) -> u8 {
    value.clamp(-127, 127) as i8 as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::descriptor::input_report_lengths;

    #[test]
    fn test_modifier_and_key() {
        let mut builder = HidReportBuilder::new();
        builder.keyboard_report(&KeyboardEvent::press(0xE1));
        let report = builder.keyboard_report(&KeyboardEvent::press(0x04));
        assert_eq!(report.data, vec![0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(report.report_id, KEYBOARD_REPORT_ID);

        builder.keyboard_report(&KeyboardEvent::release(0x04));
        let report = builder.keyboard_report(&KeyboardEvent::release(0xE1));
        assert_eq!(report.data, vec![0; 8]);
        assert!(!builder.has_pressed_keys());
    }

    #[test]
    fn test_roll_over() {
        let mut builder = HidReportBuilder::new();
        let mut report = builder.release_all();
        for usage in 0x04..0x0B {
            report = builder.keyboard_report(&KeyboardEvent::press(usage));
        }
        assert_eq!(&report.data[2..], &[USAGE_ERROR_ROLL_OVER; 6]);

        let report = builder.keyboard_report(&KeyboardEvent::release(0x04));
        assert_eq!(&report.data[2..], &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]);
    }

    #[test]
    fn test_mouse_clamping() {
        let mut builder = HidReportBuilder::new();
        let report = builder.mouse_report(&MouseEvent::movement(500, -500).with_buttons(0xFF).with_scroll(-1));
        assert_eq!(report.data, vec![0x07, 127, (-127i8) as u8, 0xFF]);
        assert_eq!(report.report_id, MOUSE_REPORT_ID);
    }

    #[test]
    fn test_reports_match_descriptor_lengths() {
        for kind in [ReportKind::Keyboard, ReportKind::Mouse] {
            let lengths = input_report_lengths(report_descriptor(kind)).unwrap();
            assert_eq!(lengths.get(&kind.report_id()), Some(&kind.report_size()));
        }

        let mut builder = HidReportBuilder::new();
        assert_eq!(builder.keyboard_report(&KeyboardEvent::press(0x04)).len(), 8);
        assert_eq!(builder.mouse_report(&MouseEvent::movement(1, 1)).len(), 4);
    }
}
