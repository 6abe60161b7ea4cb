//! WPS vendor-IE attribute parsing (OUI 00:50:F2, type 4).
//!
//! Attributes are big-endian 2-byte-type / 2-byte-length TLVs.

use crate::model::{WpsDetails, WpsState};

const ATTR_DEVICE_NAME: u16 = 0x1011;
const ATTR_MANUFACTURER: u16 = 0x1021;
const ATTR_MODEL_NAME: u16 = 0x1023;
const ATTR_WPS_STATE: u16 = 0x1044;
const ATTR_VERSION: u16 = 0x104A;
const ATTR_AP_SETUP_LOCKED: u16 = 0x1057;
const ATTR_CONFIG_METHODS: u16 = 0x1008;

fn config_method_labels(methods: u16) -> Vec<String> {
    const TABLE: &[(u16, &str)] = &[
        (0x0001, "USBA"),
        (0x0002, "Ethernet"),
        (0x0004, "Label"),
        (0x0008, "Display"),
        (0x0040, "NFC"),
        (0x0080, "PushButton"),
        (0x0100, "Keypad"),
        (0x0280, "VirtualPushButton"),
    ];
    TABLE
        .iter()
        .filter(|(bit, _)| methods & bit == *bit)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Parse the attribute stream of a WPS vendor IE (the bytes after the
/// 4-byte OUI+type prefix). Unknown attributes are skipped; a truncated
/// TLV ends the walk.
pub fn parse(data: &[u8]) -> WpsDetails {
    let mut details = WpsDetails::default();
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let attr = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4;
        if offset + len > data.len() {
            break;
        }
        let value = &data[offset..offset + len];
        match attr {
            ATTR_MANUFACTURER => {
                details.manufacturer = String::from_utf8_lossy(value).into_owned();
            }
            ATTR_MODEL_NAME => {
                details.model = String::from_utf8_lossy(value).into_owned();
            }
            ATTR_DEVICE_NAME => {
                details.device_name = String::from_utf8_lossy(value).into_owned();
            }
            ATTR_WPS_STATE => {
                details.state = match value.first() {
                    Some(0x01) => WpsState::Unconfigured,
                    Some(0x02) => WpsState::Configured,
                    _ => WpsState::Unknown,
                };
            }
            ATTR_VERSION => {
                details.version = match value.first() {
                    Some(0x10) => "1.0".to_string(),
                    Some(&v) if v >= 0x20 => "2.0".to_string(),
                    _ => String::new(),
                };
            }
            ATTR_AP_SETUP_LOCKED => {
                details.locked = value.first().is_some_and(|&b| b != 0);
            }
            ATTR_CONFIG_METHODS => {
                if value.len() >= 2 {
                    details.config_methods =
                        config_method_labels(u16::from_be_bytes([value[0], value[1]]));
                }
            }
            _ => {}
        }
        offset += len;
    }
    details
}

#[cfg(test)]
pub(crate) fn build_attr(attr: u16, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&attr.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
    buf
}
