//! RSN IE (tag 48) parsing and security-label derivation.

use crate::model::{Akm, Cipher, RsnInfo, Security};

const MFP_REQUIRED: u16 = 0x0040;
const MFP_CAPABLE: u16 = 0x0080;

fn suite_type(body: &[u8], offset: usize) -> Option<u8> {
    // Suite = 3-byte OUI + 1-byte type; only the type drives the label.
    body.get(offset + 3).copied()
}

/// Parse an RSN IE body (the bytes after tag and length).
///
/// Truncated suite lists yield what was readable; a malformed fixed part
/// yields `None`.
pub fn parse(body: &[u8]) -> Option<RsnInfo> {
    if body.len() < 8 {
        return None;
    }
    let version = u16::from_le_bytes([body[0], body[1]]);
    let group_cipher = Cipher::from_suite_type(suite_type(body, 2)?);

    let mut offset = 6;
    let mut pairwise_ciphers = Vec::new();
    let mut akm_suites = Vec::new();
    let mut capabilities = 0u16;
    let mut mfp_capable = false;
    let mut mfp_required = false;

    if body.len() >= offset + 2 {
        let count = u16::from_le_bytes([body[offset], body[offset + 1]]) as usize;
        offset += 2;
        for _ in 0..count {
            match suite_type(body, offset) {
                Some(t) => pairwise_ciphers.push(Cipher::from_suite_type(t)),
                None => break,
            }
            offset += 4;
        }
    }

    if body.len() >= offset + 2 {
        let count = u16::from_le_bytes([body[offset], body[offset + 1]]) as usize;
        offset += 2;
        for _ in 0..count {
            match suite_type(body, offset) {
                Some(t) => akm_suites.push(Akm::from_suite_type(t)),
                None => break,
            }
            offset += 4;
        }
    }

    if body.len() >= offset + 2 {
        capabilities = u16::from_le_bytes([body[offset], body[offset + 1]]);
        mfp_required = capabilities & MFP_REQUIRED != 0;
        mfp_capable = capabilities & MFP_CAPABLE != 0;
    }

    Some(RsnInfo {
        version,
        group_cipher,
        pairwise_ciphers,
        akm_suites,
        capabilities,
        mfp_capable,
        mfp_required,
    })
}

/// Security label for a network advertising this RSN IE.
///
/// SAE anywhere in the AKM list wins (WPA3, including transition mode);
/// pure-enterprise AKMs label as WPA2-Enterprise; everything else that
/// carries an RSN IE is WPA2.
pub fn derive_security(rsn: &RsnInfo) -> Security {
    let has = |akm: Akm| rsn.akm_suites.contains(&akm);
    if has(Akm::Sae) || has(Akm::FtSae) || has(Akm::Owe) {
        Security::Wpa3
    } else if has(Akm::Dot1x) || has(Akm::FtDot1x) || has(Akm::Dot1xSha256) {
        Security::Wpa2Enterprise
    } else {
        Security::Wpa2
    }
}

#[cfg(test)]
pub(crate) fn build_ie_body(group: u8, pairwise: &[u8], akms: &[u8], caps: Option<u16>) -> Vec<u8> {
    const OUI: [u8; 3] = [0x00, 0x0F, 0xAC];
    let mut body = Vec::new();
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&OUI);
    body.push(group);
    body.extend_from_slice(&(pairwise.len() as u16).to_le_bytes());
    for &t in pairwise {
        body.extend_from_slice(&OUI);
        body.push(t);
    }
    body.extend_from_slice(&(akms.len() as u16).to_le_bytes());
    for &t in akms {
        body.extend_from_slice(&OUI);
        body.push(t);
    }
    if let Some(caps) = caps {
        body.extend_from_slice(&caps.to_le_bytes());
    }
    body
}
