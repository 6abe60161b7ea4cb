//! EAPOL detection and 4-way-handshake message classification.
//!
//! Data-frame bodies carry EAPOL behind an LLC/SNAP header with
//! ethertype 0x888E. Message numbers fall out of two Key Info bits plus
//! the key-data length: (ack, !mic) is M1, (ack, mic) is M3, and
//! (!ack, mic) splits into M2 (key data present) and M4 (empty).

/// LLC/SNAP prefix carrying EAPOL: AA AA 03 00 00 00 88 8E.
const LLC_SNAP_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

/// EAPOL packet type for key frames.
const EAPOL_TYPE_KEY: u8 = 3;

const KEY_INFO_ACK: u16 = 0x0080;
const KEY_INFO_MIC: u16 = 0x0100;

/// Offset of Key Info within the EAPOL-Key payload (after descriptor
/// type), big-endian u16.
const KEY_INFO_OFFSET: usize = 1;

/// Offset of Key Data Length within the EAPOL-Key payload, big-endian
/// u16: descriptor(1) + info(2) + length(2) + replay(8) + nonce(32) +
/// iv(16) + rsc(8) + id(8) + mic(16).
const KEY_DATA_LEN_OFFSET: usize = 93;

/// One message of the WPA/WPA2 4-way handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyMessage {
    M1,
    M2,
    M3,
    M4,
}

impl KeyMessage {
    pub fn number(&self) -> u8 {
        match self {
            KeyMessage::M1 => 1,
            KeyMessage::M2 => 2,
            KeyMessage::M3 => 3,
            KeyMessage::M4 => 4,
        }
    }
}

/// Extract the EAPOL frame (starting at the 802.1X version byte) from a
/// data-frame body, or `None` when the body is not EAPOL.
pub fn extract(body: &[u8]) -> Option<&[u8]> {
    if body.len() < LLC_SNAP_EAPOL.len() + 4 {
        return None;
    }
    if body[..8] != LLC_SNAP_EAPOL {
        return None;
    }
    Some(&body[8..])
}

/// The EAPOL-Key payload (descriptor type onward), or `None` for
/// non-key EAPOL frames.
pub fn key_payload(eapol: &[u8]) -> Option<&[u8]> {
    if eapol.len() < 4 || eapol[1] != EAPOL_TYPE_KEY {
        return None;
    }
    Some(&eapol[4..])
}

/// Classify an EAPOL-Key payload into its handshake message number.
pub fn classify(key: &[u8]) -> Option<KeyMessage> {
    let info_bytes = key.get(KEY_INFO_OFFSET..KEY_INFO_OFFSET + 2)?;
    let key_info = u16::from_be_bytes([info_bytes[0], info_bytes[1]]);
    let ack = key_info & KEY_INFO_ACK != 0;
    let mic = key_info & KEY_INFO_MIC != 0;

    match (ack, mic) {
        (true, false) => Some(KeyMessage::M1),
        (true, true) => Some(KeyMessage::M3),
        (false, true) => {
            let key_data_len = key
                .get(KEY_DATA_LEN_OFFSET..KEY_DATA_LEN_OFFSET + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .unwrap_or(0);
            if key_data_len > 0 {
                Some(KeyMessage::M2)
            } else {
                Some(KeyMessage::M4)
            }
        }
        (false, false) => None,
    }
}

#[cfg(test)]
pub(crate) fn build_key_frame(key_info: u16, key_data_len: u16) -> Vec<u8> {
    // EAPOL header
    let body_len = 95 + key_data_len;
    let mut frame = vec![0x02, EAPOL_TYPE_KEY];
    frame.extend_from_slice(&body_len.to_be_bytes());
    // Key payload
    frame.push(0x02); // descriptor type (RSN)
    frame.extend_from_slice(&key_info.to_be_bytes());
    frame.extend_from_slice(&16u16.to_be_bytes()); // key length
    frame.extend_from_slice(&[0u8; 8 + 32 + 16 + 8 + 8 + 16]);
    frame.extend_from_slice(&key_data_len.to_be_bytes());
    frame.extend_from_slice(&vec![0u8; key_data_len as usize]);
    frame
}

#[cfg(test)]
pub(crate) fn build_data_body(key_info: u16, key_data_len: u16) -> Vec<u8> {
    let mut body = LLC_SNAP_EAPOL.to_vec();
    body.extend(build_key_frame(key_info, key_data_len));
    body
}
