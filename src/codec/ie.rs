//! Information Element walking.
//!
//! IEs are a tag-length-value stream after the fixed management-frame
//! fields. Tag order is preserved exactly as seen on the wire — the
//! device fingerprint is a digest over that order, so it is never
//! sorted or deduplicated.

use crate::model::{Security, Standard, WpsDetails};

use super::{rsn, wps};

/// Placeholder SSID for hidden networks (zero-length or NUL-leading).
pub const HIDDEN_SSID: &str = "<HIDDEN>";

const TAG_SSID: u8 = 0;
const TAG_DS_PARAMS: u8 = 3;
const TAG_HT_CAPABILITIES: u8 = 45;
const TAG_RSN: u8 = 48;
const TAG_MOBILITY_DOMAIN: u8 = 54;
const TAG_HT_OPERATION: u8 = 61;
const TAG_RM_CAPABILITIES: u8 = 70;
const TAG_EXT_CAPABILITIES: u8 = 127;
const TAG_VHT_CAPABILITIES: u8 = 191;
const TAG_VHT_OPERATION: u8 = 192;
const TAG_VENDOR: u8 = 221;
const TAG_EXTENSION: u8 = 255;

const EXT_ID_HE_CAPABILITIES: u8 = 35;
const EXT_ID_EHT_CAPABILITIES: u8 = 108;

const OUI_MICROSOFT: [u8; 3] = [0x00, 0x50, 0xF2];
const OUI_APPLE: [u8; 3] = [0x00, 0x17, 0xF2];
const VENDOR_TYPE_WPA: u8 = 1;
const VENDOR_TYPE_WPS: u8 = 4;

/// Everything a single IE walk produces.
#[derive(Debug, Clone, Default)]
pub struct IeSummary {
    /// Tag ids in wire order.
    pub tags: Vec<u8>,
    pub ssid: Option<String>,
    pub channel: Option<u8>,
    /// 20/40/80/160 MHz, from the HT/VHT operation IEs.
    pub channel_width: Option<u8>,
    pub standard: Option<Standard>,
    pub dot11k: bool,
    pub dot11r: bool,
    pub dot11v: bool,
    pub wifi4: bool,
    pub wifi5: bool,
    pub wifi6: bool,
    pub wifi7: bool,
    pub rsn: Option<crate::model::RsnInfo>,
    pub security: Option<Security>,
    pub wps: Option<WpsDetails>,
    pub apple_vendor: bool,
    pub microsoft_vendor: bool,
}

/// Offset of the IE stream within a management frame body, per subtype.
/// Beacon/ProbeResp carry 12 fixed bytes, AssocReq 4, ProbeReq none.
pub fn ie_offset(subtype: u8) -> Option<usize> {
    match subtype {
        super::dot11::SUBTYPE_BEACON | super::dot11::SUBTYPE_PROBE_RESP => Some(12),
        super::dot11::SUBTYPE_PROBE_REQ => Some(0),
        super::dot11::SUBTYPE_ASSOC_REQ => Some(4),
        _ => None,
    }
}

fn decode_ssid(value: &[u8]) -> String {
    if value.is_empty() || value[0] == 0x00 {
        HIDDEN_SSID.to_string()
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

fn bump(current: &mut Option<Standard>, new: Standard) {
    if current.map_or(true, |s| s < new) {
        *current = Some(new);
    }
}

/// Walk the IE stream and apply every known-tag handler. A truncated
/// trailing IE ends the walk; everything before it is kept.
pub fn walk(stream: &[u8]) -> IeSummary {
    let mut summary = IeSummary::default();
    let mut legacy_wpa = false;
    let mut offset = 0;

    while offset + 2 <= stream.len() {
        let tag = stream[offset];
        let len = stream[offset + 1] as usize;
        offset += 2;
        if offset + len > stream.len() {
            break;
        }
        let value = &stream[offset..offset + len];
        offset += len;
        summary.tags.push(tag);

        match tag {
            TAG_SSID => summary.ssid = Some(decode_ssid(value)),
            TAG_DS_PARAMS => {
                if let Some(&ch) = value.first() {
                    summary.channel = Some(ch);
                }
            }
            TAG_HT_CAPABILITIES => {
                summary.wifi4 = true;
                bump(&mut summary.standard, Standard::Dot11n);
            }
            TAG_RSN => {
                if let Some(info) = rsn::parse(value) {
                    summary.security = Some(rsn::derive_security(&info));
                    summary.rsn = Some(info);
                }
            }
            TAG_MOBILITY_DOMAIN => summary.dot11r = true,
            TAG_HT_OPERATION => {
                if let Some(&primary) = value.first() {
                    summary.channel = Some(primary);
                }
                // Secondary channel offset above/below widens to 40 MHz.
                let forty = value.get(1).is_some_and(|b| matches!(b & 0x03, 1 | 3));
                if summary.channel_width.is_none() || forty {
                    summary.channel_width = Some(if forty { 40 } else { 20 });
                }
            }
            TAG_RM_CAPABILITIES => summary.dot11k = true,
            TAG_EXT_CAPABILITIES => {
                // BSS Transition support: byte 2, bit 3.
                if value.get(2).is_some_and(|b| b & 0x08 != 0) {
                    summary.dot11v = true;
                }
            }
            TAG_VHT_CAPABILITIES => {
                summary.wifi5 = true;
                bump(&mut summary.standard, Standard::Dot11ac);
            }
            TAG_VHT_OPERATION => match value.first() {
                Some(1) => summary.channel_width = Some(80),
                Some(2) | Some(3) => summary.channel_width = Some(160),
                _ => {}
            },
            TAG_VENDOR => {
                if value.len() < 4 {
                    continue;
                }
                let oui = [value[0], value[1], value[2]];
                let vendor_type = value[3];
                if oui == OUI_APPLE {
                    summary.apple_vendor = true;
                }
                if oui == OUI_MICROSOFT {
                    summary.microsoft_vendor = true;
                    match vendor_type {
                        VENDOR_TYPE_WPA => legacy_wpa = true,
                        VENDOR_TYPE_WPS => summary.wps = Some(wps::parse(&value[4..])),
                        _ => {}
                    }
                }
            }
            TAG_EXTENSION => match value.first() {
                Some(&EXT_ID_HE_CAPABILITIES) => {
                    summary.wifi6 = true;
                    bump(&mut summary.standard, Standard::Dot11ax);
                }
                Some(&EXT_ID_EHT_CAPABILITIES) => {
                    summary.wifi7 = true;
                    summary.wifi6 = true;
                    bump(&mut summary.standard, Standard::Dot11be);
                }
                _ => {}
            },
            _ => {}
        }
    }

    if summary.security.is_none() && legacy_wpa {
        summary.security = Some(Security::Wpa);
    }
    summary
}

/// Hex MD5 over the comma-joined ordered tag list — the device
/// fingerprint.
pub fn signature(tags: &[u8]) -> String {
    let joined = tags
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

#[cfg(test)]
pub(crate) fn build_ie(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut buf = vec![tag, value.len() as u8];
    buf.extend_from_slice(value);
    buf
}
