//! 802.11 frame codec: Radiotap, MAC headers, Information Elements,
//! RSN/WPS details, EAPOL classification, and attack-frame synthesis.
//!
//! Everything here is pure byte-level work — no capture handles, no
//! sockets, no library type hierarchies leaking through the API. The
//! capture pipeline hands buffers in; the injection engine takes
//! buffers out.

pub mod dot11;
pub mod eapol;
pub mod ie;
pub mod radiotap;
pub mod rsn;
pub mod synth;
pub mod wps;

pub use dot11::{Dot11Header, FrameType};
pub use eapol::KeyMessage;
pub use ie::{IeSummary, HIDDEN_SSID};
pub use radiotap::{channel_from_frequency, RadiotapInfo};

/// A captured frame split into its layers. `body` borrows from the
/// capture buffer past the MAC header.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub radiotap: RadiotapInfo,
    pub dot11: Dot11Header,
    pub body: &'a [u8],
}

impl Frame<'_> {
    /// The EAPOL-Key payload if this is an EAPOL key frame.
    pub fn eapol_key(&self) -> Option<&[u8]> {
        if self.dot11.ftype != FrameType::Data {
            return None;
        }
        eapol::key_payload(eapol::extract(self.body)?)
    }

    /// Walk the IE stream of a management frame, if the subtype carries
    /// one.
    pub fn ies(&self) -> Option<IeSummary> {
        if self.dot11.ftype != FrameType::Mgmt {
            return None;
        }
        let offset = ie::ie_offset(self.dot11.subtype)?;
        self.body.get(offset..).map(ie::walk)
    }
}

/// Parse a Radiotap-framed capture buffer into its layers.
pub fn parse_frame(data: &[u8]) -> Option<Frame<'_>> {
    let radiotap = radiotap::parse(data)?;
    let (dot11, body) = dot11::parse(data.get(radiotap.header_len..)?)?;
    Some(Frame {
        radiotap,
        dot11,
        body,
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Frame builders shared by codec, handler, and pipeline tests.

    use crate::model::Mac;

    use super::*;

    /// Radiotap + beacon with an arbitrary IE stream.
    pub fn beacon(bssid: Mac, ies: &[u8]) -> Vec<u8> {
        mgmt_frame(dot11::SUBTYPE_BEACON, Mac::BROADCAST, bssid, bssid, ies, 12)
    }

    /// Radiotap + probe request from `source` with an IE stream.
    pub fn probe_req(source: Mac, ies: &[u8]) -> Vec<u8> {
        mgmt_frame(
            dot11::SUBTYPE_PROBE_REQ,
            Mac::BROADCAST,
            source,
            Mac::BROADCAST,
            ies,
            0,
        )
    }

    /// Radiotap + data frame with explicit DS bits and body.
    pub fn data_frame(to_ds: bool, from_ds: bool, a1: Mac, a2: Mac, a3: Mac, body: &[u8]) -> Vec<u8> {
        let mut buf = radiotap::synthesize(synth::INJECT_RATE, 0);
        let fc: u16 = (2 << 2) // data
            | if to_ds { 0x0100 } else { 0 }
            | if from_ds { 0x0200 } else { 0 };
        buf.extend_from_slice(&fc.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&a1.0);
        buf.extend_from_slice(&a2.0);
        buf.extend_from_slice(&a3.0);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    fn mgmt_frame(
        subtype: u8,
        addr1: Mac,
        addr2: Mac,
        addr3: Mac,
        ies: &[u8],
        fixed_len: usize,
    ) -> Vec<u8> {
        let mut buf = radiotap::synthesize(synth::INJECT_RATE, 0);
        buf.extend(dot11::serialize_mgmt(subtype, 0, addr1, addr2, addr3, 1));
        buf.extend(std::iter::repeat(0u8).take(fixed_len));
        buf.extend_from_slice(ies);
        buf
    }
}
