//! Input events and the report pipeline
//!
//! Input sources produce a `futures::Stream` of [`InputEvent`]s. The
//! [`InputPipeline`] turns them into HID reports and hands them to a
//! [`ReportSink`], usually the GATT transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::BlehidResult;
use crate::hid::builder::HidReportBuilder;
use crate::types::{HidReport, Timestamp};

/// HID usage of the left shift key
pub const USAGE_LEFT_SHIFT: u8 = 0xE1;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// A key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub timestamp: Timestamp,
    /// HID usage on the Keyboard/Keypad page
    pub key_code: u8,
    /// Platform scan code, informational only
    pub scan_code: u16,
    pub pressed: bool,
    pub extended: bool,
    /// Modifier bits held in addition to tracked modifier keys
    pub modifiers: u8,
}

impl KeyboardEvent {
    pub fn press(key_code: u8) -> Self {
        Self {
            timestamp: Timestamp::now(),
            key_code,
            scan_code: 0,
            pressed: true,
            extended: false,
            modifiers: 0,
        }
    }

    pub fn release(key_code: u8) -> Self {
        Self {
            pressed: false,
            ..Self::press(key_code)
        }
    }
}

/// Relative pointer movement, wheel and button state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseEvent {
    pub timestamp: Timestamp,
    pub dx: i32,
    pub dy: i32,
    pub scroll: i32,
    /// Not representable in the mouse report; dropped by the builder
    pub h_scroll: i32,
    /// Bit 0 = left, bit 1 = right, bit 2 = middle
    pub buttons: u8,
}

impl MouseEvent {
    pub fn movement(dx: i32, dy: i32) -> Self {
        Self {
            timestamp: Timestamp::now(),
            dx,
            dy,
            scroll: 0,
            h_scroll: 0,
            buttons: 0,
        }
    }

    pub fn with_buttons(mut self, buttons: u8) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn with_scroll(mut self, scroll: i32) -> Self {
        self.scroll = scroll;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    Keyboard(KeyboardEvent),
    Mouse(MouseEvent),
}

impl From<KeyboardEvent> for InputEvent {
    fn from(event: KeyboardEvent) -> Self {
        InputEvent::Keyboard(event)
    }
}

impl From<MouseEvent> for InputEvent {
    fn from(event: MouseEvent) -> Self {
        InputEvent::Mouse(event)
    }
}

// ----------------------------------------------------------------------------
// Text Input
// ----------------------------------------------------------------------------

/// HID usage for a US-layout character and whether shift is needed
fn usage_for_char(c: char) -> Option<(u8, bool)> {
    let usage = match c {
        'a'..='z' => (0x04 + (c as u8 - b'a'), false),
        'A'..='Z' => (0x04 + (c as u8 - b'A'), true),
        '1'..='9' => (0x1E + (c as u8 - b'1'), false),
        '0' => (0x27, false),
        '!' => (0x1E, true),
        '@' => (0x1F, true),
        '#' => (0x20, true),
        '$' => (0x21, true),
        '%' => (0x22, true),
        '^' => (0x23, true),
        '&' => (0x24, true),
        '*' => (0x25, true),
        '(' => (0x26, true),
        ')' => (0x27, true),
        '\n' => (0x28, false),
        '\t' => (0x2B, false),
        ' ' => (0x2C, false),
        '-' => (0x2D, false),
        '_' => (0x2D, true),
        '=' => (0x2E, false),
        '+' => (0x2E, true),
        '[' => (0x2F, false),
        '{' => (0x2F, true),
        ']' => (0x30, false),
        '}' => (0x30, true),
        '\\' => (0x31, false),
        '|' => (0x31, true),
        ';' => (0x33, false),
        ':' => (0x33, true),
        '\'' => (0x34, false),
        '"' => (0x34, true),
        '`' => (0x35, false),
        '~' => (0x35, true),
        ',' => (0x36, false),
        '<' => (0x36, true),
        '.' => (0x37, false),
        '>' => (0x37, true),
        '/' => (0x38, false),
        '?' => (0x38, true),
        _ => return None,
    };
    Some(usage)
}

/// Press/release sequence typing `text` on a US layout.
///
/// Characters without a usage are skipped.
pub fn text_to_key_events(text: &str) -> Vec<KeyboardEvent> {
    let mut events = Vec::with_capacity(text.len() * 2);
    for c in text.chars() {
        let Some((usage, shift)) = usage_for_char(c) else {
            debug!("No HID usage for {:?}, skipping", c);
            continue;
        };
        if shift {
            events.push(KeyboardEvent::press(USAGE_LEFT_SHIFT));
        }
        events.push(KeyboardEvent::press(usage));
        events.push(KeyboardEvent::release(usage));
        if shift {
            events.push(KeyboardEvent::release(USAGE_LEFT_SHIFT));
        }
    }
    events
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// Destination for built HID reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send_report(&self, report: HidReport) -> BlehidResult<()>;
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events: u64,
    pub reports_sent: u64,
    pub failures: u64,
}

/// Drives input events through the report builder into a sink
pub struct InputPipeline {
    builder: HidReportBuilder,
    sink: Arc<dyn ReportSink>,
}

impl InputPipeline {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            builder: HidReportBuilder::new(),
            sink,
        }
    }

    /// Consume `events` until the stream ends or `cancel` fires.
    ///
    /// Sink failures are logged and counted; the pipeline keeps going. Held
    /// keys are released before returning.
    pub async fn run<S>(&mut self, events: S, cancel: &CancellationToken) -> PipelineStats
    where
        S: Stream<Item = InputEvent> + Send,
    {
        let mut stats = PipelineStats::default();
        let mut events = std::pin::pin!(events);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            stats.events += 1;
            let report = self.builder.build(&event);
            trace!("Built report {} for {:?}", report.to_hex(), event);
            self.deliver(report, &mut stats).await;
        }

        if self.builder.has_pressed_keys() {
            let release = self.builder.release_all();
            self.deliver(release, &mut stats).await;
        }

        debug!(
            "Input pipeline finished: {} events, {} reports, {} failures",
            stats.events, stats.reports_sent, stats.failures
        );
        stats
    }

    async fn deliver(&self, report: HidReport, stats: &mut PipelineStats) {
        match self.sink.send_report(report).await {
            Ok(()) => stats.reports_sent += 1,
            Err(e) => {
                stats.failures += 1;
                warn!("Failed to deliver HID report: {}", e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
