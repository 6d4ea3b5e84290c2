//! HID over GATT protocol constants

use uuid::Uuid;

pub use blehid_core::config::HID_SERVICE_UUID;

// ----------------------------------------------------------------------------
// Characteristic UUIDs
// ----------------------------------------------------------------------------

/// HID Report characteristic (Read + Notify)
pub const REPORT_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00002A4D_0000_1000_8000_00805F9B34FB);

/// HID Report Map characteristic (Read)
pub const REPORT_MAP_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002A4B_0000_1000_8000_00805F9B34FB);

/// HID Information characteristic (Read)
pub const HID_INFORMATION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002A4A_0000_1000_8000_00805F9B34FB);

/// HID Control Point characteristic (Write Without Response)
pub const HID_CONTROL_POINT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002A4C_0000_1000_8000_00805F9B34FB);

/// Every characteristic the HID service must expose
pub const HID_CHARACTERISTICS: [Uuid; 4] = [
    REPORT_CHARACTERISTIC_UUID,
    REPORT_MAP_CHARACTERISTIC_UUID,
    HID_INFORMATION_CHARACTERISTIC_UUID,
    HID_CONTROL_POINT_CHARACTERISTIC_UUID,
];

/// bcdHID 1.11, country code 0, flags RemoteWake | NormallyConnectable
pub const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x03];

/// Short name used in logs
pub fn characteristic_name(uuid: &Uuid) -> &'static str {
    match *uuid {
        REPORT_CHARACTERISTIC_UUID => "Report",
        REPORT_MAP_CHARACTERISTIC_UUID => "Report Map",
        HID_INFORMATION_CHARACTERISTIC_UUID => "HID Information",
        HID_CONTROL_POINT_CHARACTERISTIC_UUID => "HID Control Point",
        _ => "Unknown",
    }
}

// ----------------------------------------------------------------------------
// Control Point
// ----------------------------------------------------------------------------

/// Commands a host writes to the HID Control Point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPointCommand {
    Suspend,
    ExitSuspend,
}

impl ControlPointCommand {
    /// Parse a Control Point write; only the first byte is significant
    pub fn parse(value: &[u8]) -> Option<Self> {
        match value.first()? {
            0x00 => Some(ControlPointCommand::Suspend),
            0x01 => Some(ControlPointCommand::ExitSuspend),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlPointCommand::Suspend => "suspend",
            ControlPointCommand::ExitSuspend => "exit_suspend",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(
            REPORT_CHARACTERISTIC_UUID.to_string(),
            "00002a4d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(characteristic_name(&HID_CONTROL_POINT_CHARACTERISTIC_UUID), "HID Control Point");
        assert_eq!(characteristic_name(&HID_SERVICE_UUID), "Unknown");
    }

    #[test]
    fn test_control_point_parsing() {
        assert_eq!(ControlPointCommand::parse(&[0x00]), Some(ControlPointCommand::Suspend));
        assert_eq!(ControlPointCommand::parse(&[0x01, 0xFF]), Some(ControlPointCommand::ExitSuspend));
        assert_eq!(ControlPointCommand::parse(&[0x02]), None);
        assert_eq!(ControlPointCommand::parse(&[]), None);
    }
}
