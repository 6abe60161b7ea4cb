//! 802.11 MAC header parsing and serialization.

use crate::model::Mac;

/// Main frame type (frame control bits 2-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Mgmt,
    Control,
    Data,
    Extension,
}

// Management subtypes.
pub const SUBTYPE_ASSOC_REQ: u8 = 0;
pub const SUBTYPE_ASSOC_RESP: u8 = 1;
pub const SUBTYPE_REASSOC_REQ: u8 = 2;
pub const SUBTYPE_PROBE_REQ: u8 = 4;
pub const SUBTYPE_PROBE_RESP: u8 = 5;
pub const SUBTYPE_BEACON: u8 = 8;
pub const SUBTYPE_DISASSOC: u8 = 10;
pub const SUBTYPE_AUTH: u8 = 11;
pub const SUBTYPE_DEAUTH: u8 = 12;
pub const SUBTYPE_ACTION: u8 = 13;

/// Duration/ID used on attack frames to inflate the NAV.
pub const DURATION_NAV_JAM: u16 = 0x1388;

/// Parsed 802.11 MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dot11Header {
    pub ftype: FrameType,
    pub subtype: u8,
    pub to_ds: bool,
    pub from_ds: bool,
    pub retry: bool,
    pub protected: bool,
    pub duration_id: u16,
    pub addr1: Mac,
    pub addr2: Option<Mac>,
    pub addr3: Option<Mac>,
    /// 12-bit sequence number (sequence control >> 4).
    pub sequence: Option<u16>,
    /// Offset of the frame body past this header.
    pub header_len: usize,
    pub has_qos: bool,
}

impl Dot11Header {
    pub fn is_mgmt(&self, subtype: u8) -> bool {
        self.ftype == FrameType::Mgmt && self.subtype == subtype
    }

    /// BSSID per the DS bits: mgmt frames carry it in Addr3; data frames
    /// move it depending on direction. WDS (both bits) has no single
    /// BSSID.
    pub fn bssid(&self) -> Option<Mac> {
        match self.ftype {
            FrameType::Mgmt => self.addr3,
            FrameType::Data => match (self.to_ds, self.from_ds) {
                (false, false) => self.addr3,
                (false, true) => self.addr2,
                (true, false) => Some(self.addr1),
                (true, true) => None,
            },
            _ => None,
        }
    }
}

fn mac_at(data: &[u8], offset: usize) -> Option<Mac> {
    let slice = data.get(offset..offset + 6)?;
    let mut octets = [0u8; 6];
    octets.copy_from_slice(slice);
    Some(Mac(octets))
}

/// Parse an 802.11 MAC header from the start of `data` (radiotap already
/// stripped). Returns the header and the frame body.
pub fn parse(data: &[u8]) -> Option<(Dot11Header, &[u8])> {
    if data.len() < 10 {
        return None;
    }
    let fc = u16::from_le_bytes([data[0], data[1]]);
    let ftype = match (fc >> 2) & 0x3 {
        0 => FrameType::Mgmt,
        1 => FrameType::Control,
        2 => FrameType::Data,
        _ => FrameType::Extension,
    };
    let subtype = ((fc >> 4) & 0xF) as u8;
    let to_ds = fc & 0x0100 != 0;
    let from_ds = fc & 0x0200 != 0;
    let retry = fc & 0x0800 != 0;
    let protected = fc & 0x4000 != 0;
    let duration_id = u16::from_le_bytes([data[2], data[3]]);

    let has_qos = ftype == FrameType::Data && subtype & 0x08 != 0;
    let header_len = match ftype {
        FrameType::Control => 10,
        _ if has_qos => 26,
        _ => 24,
    };
    if data.len() < header_len {
        return None;
    }

    let addr1 = mac_at(data, 4)?;
    let (addr2, addr3, sequence) = if header_len >= 24 {
        let seq_ctrl = u16::from_le_bytes([data[22], data[23]]);
        (mac_at(data, 10), mac_at(data, 16), Some(seq_ctrl >> 4))
    } else {
        (mac_at(data, 10), None, None)
    };

    let header = Dot11Header {
        ftype,
        subtype,
        to_ds,
        from_ds,
        retry,
        protected,
        duration_id,
        addr1,
        addr2,
        addr3,
        sequence,
        header_len,
        has_qos,
    };
    Some((header, &data[header_len..]))
}

/// Serialize a management-frame MAC header (24 bytes).
pub fn serialize_mgmt(
    subtype: u8,
    duration_id: u16,
    addr1: Mac,
    addr2: Mac,
    addr3: Mac,
    sequence: u16,
) -> Vec<u8> {
    let fc: u16 = (subtype as u16) << 4; // mgmt, protocol version 0
    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(&fc.to_le_bytes());
    buf.extend_from_slice(&duration_id.to_le_bytes());
    buf.extend_from_slice(&addr1.0);
    buf.extend_from_slice(&addr2.0);
    buf.extend_from_slice(&addr3.0);
    buf.extend_from_slice(&((sequence & 0x0FFF) << 4).to_le_bytes());
    buf
}
