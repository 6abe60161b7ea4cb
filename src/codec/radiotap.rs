//! Radiotap header parsing and synthesis.
//!
//! Pure byte-level: the present-word chain is walked with per-field sizes
//! and natural alignment, and parsing stops gracefully at the first
//! presence bit whose field size is unknown (the header length still
//! tells us where the 802.11 frame starts).

/// Fields extracted from a Radiotap header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadiotapInfo {
    /// Total header length; the 802.11 frame starts here.
    pub header_len: usize,
    pub dbm_antenna_signal: Option<i8>,
    pub channel_frequency: Option<u16>,
    /// Data rate in 500 kbps units.
    pub rate: Option<u8>,
    pub flags: Option<u8>,
}

/// Present-word bit indices we know the size of.
const TSFT: u32 = 0;
const FLAGS: u32 = 1;
const RATE: u32 = 2;
const CHANNEL: u32 = 3;
const FHSS: u32 = 4;
const DBM_ANTSIGNAL: u32 = 5;
const DBM_ANTNOISE: u32 = 6;
const LOCK_QUALITY: u32 = 7;
const TX_ATTENUATION: u32 = 8;
const DB_TX_ATTENUATION: u32 = 9;
const DBM_TX_POWER: u32 = 10;
const ANTENNA: u32 = 11;
const DB_ANTSIGNAL: u32 = 12;
const DB_ANTNOISE: u32 = 13;
const RX_FLAGS: u32 = 14;
const MCS: u32 = 19;
const AMPDU_STATUS: u32 = 20;
const VHT: u32 = 21;
const TIMESTAMP: u32 = 22;
const EXT: u32 = 31;

/// (size, alignment) for a known presence bit, `None` for bits whose
/// field layout we do not track.
fn field_layout(bit: u32) -> Option<(usize, usize)> {
    match bit {
        TSFT => Some((8, 8)),
        FLAGS => Some((1, 1)),
        RATE => Some((1, 1)),
        CHANNEL => Some((4, 2)),
        FHSS => Some((2, 1)),
        DBM_ANTSIGNAL => Some((1, 1)),
        DBM_ANTNOISE => Some((1, 1)),
        LOCK_QUALITY => Some((2, 2)),
        TX_ATTENUATION => Some((2, 2)),
        DB_TX_ATTENUATION => Some((2, 2)),
        DBM_TX_POWER => Some((1, 1)),
        ANTENNA => Some((1, 1)),
        DB_ANTSIGNAL => Some((1, 1)),
        DB_ANTNOISE => Some((1, 1)),
        RX_FLAGS => Some((2, 2)),
        MCS => Some((3, 1)),
        AMPDU_STATUS => Some((8, 4)),
        VHT => Some((12, 2)),
        TIMESTAMP => Some((12, 8)),
        _ => None,
    }
}

fn align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Parse a Radiotap header from the start of a captured buffer.
///
/// Returns `None` only when the buffer cannot hold a header at all;
/// unknown presence bits merely end field extraction early.
pub fn parse(data: &[u8]) -> Option<RadiotapInfo> {
    if data.len() < 8 {
        return None;
    }
    // version (0), pad, length, first present word
    if data[0] != 0 {
        return None;
    }
    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < 8 || header_len > data.len() {
        return None;
    }

    // Collect the present-word chain. Each word with bit 31 set is
    // followed by another.
    let mut present_words = Vec::new();
    let mut cursor = 4;
    loop {
        if cursor + 4 > header_len {
            return None;
        }
        let word = u32::from_le_bytes([
            data[cursor],
            data[cursor + 1],
            data[cursor + 2],
            data[cursor + 3],
        ]);
        present_words.push(word);
        cursor += 4;
        if word & (1 << EXT) == 0 {
            break;
        }
        // Runaway chain guard.
        if present_words.len() > 8 {
            return None;
        }
    }

    let mut info = RadiotapInfo {
        header_len,
        ..RadiotapInfo::default()
    };

    // Fields follow the present-word chain, packed per word in bit order.
    // Only the first word's bits are standard-defined; vendor namespaces
    // in later words are not walked.
    let mut offset = cursor;
    let first = present_words[0];
    for bit in 0..EXT {
        if first & (1 << bit) == 0 {
            continue;
        }
        let (size, alignment) = match field_layout(bit) {
            Some(layout) => layout,
            None => return Some(info), // unknown size: stop extracting
        };
        offset = align(offset, alignment);
        if offset + size > header_len {
            return Some(info);
        }
        match bit {
            FLAGS => info.flags = Some(data[offset]),
            RATE => info.rate = Some(data[offset]),
            CHANNEL => {
                info.channel_frequency =
                    Some(u16::from_le_bytes([data[offset], data[offset + 1]]));
            }
            DBM_ANTSIGNAL => info.dbm_antenna_signal = Some(data[offset] as i8),
            _ => {}
        }
        offset += size;
    }

    Some(info)
}

/// Radiotap flags bit set on injected frames so the driver does not wait
/// for ACKs.
pub const FLAG_NO_ACK: u8 = 0x08;

/// Injection header: present = flags | rate, 10 bytes total.
pub fn synthesize(rate: u8, flags: u8) -> Vec<u8> {
    let present: u32 = (1 << FLAGS) | (1 << RATE);
    let mut header = Vec::with_capacity(10);
    header.push(0); // version
    header.push(0); // pad
    header.extend_from_slice(&10u16.to_le_bytes());
    header.extend_from_slice(&present.to_le_bytes());
    header.push(flags);
    header.push(rate);
    header
}

/// Map a center frequency in MHz to an 802.11 channel number.
pub fn channel_from_frequency(mhz: u32) -> Option<u8> {
    match mhz {
        2412..=2472 => Some(((mhz - 2407) / 5) as u8),
        2484 => Some(14),
        5000..=5900 => Some(((mhz - 5000) / 5) as u8),
        5955..=7115 => Some(((mhz - 5950) / 5) as u8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a radiotap header with TSFT + flags + rate + channel + signal.
    fn full_header(signal: i8, freq: u16, rate: u8, flags: u8) -> Vec<u8> {
        let present: u32 =
            (1 << TSFT) | (1 << FLAGS) | (1 << RATE) | (1 << CHANNEL) | (1 << DBM_ANTSIGNAL);
        let mut buf = vec![0u8, 0];
        // fields: tsft at 8 (aligned), flags 16, rate 17, channel 18 (align 2), signal 22
        let len: u16 = 8 + 8 + 1 + 1 + 2 + 2 + 1;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&present.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]); // tsft
        buf.push(flags);
        buf.push(rate);
        buf.extend_from_slice(&freq.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // channel flags
        buf.push(signal as u8);
        buf
    }

    // ── parse tests ─────────────────────────────────────────────────

    #[test]
    fn parse_extracts_all_known_fields() {
        let buf = full_header(-52, 2437, 0x04, 0x10);
        let info = parse(&buf).unwrap();
        assert_eq!(info.header_len, buf.len());
        assert_eq!(info.dbm_antenna_signal, Some(-52));
        assert_eq!(info.channel_frequency, Some(2437));
        assert_eq!(info.rate, Some(0x04));
        assert_eq!(info.flags, Some(0x10));
    }

    #[test]
    fn parse_aligns_channel_field() {
        // flags + rate (2 bytes) then channel must align to the next even
        // offset; full_header already exercises 8+8+1+1 -> 18 which is
        // even, so craft an odd case: flags only then channel.
        let present: u32 = (1 << FLAGS) | (1 << CHANNEL);
        let mut buf = vec![0u8, 0];
        let len: u16 = 8 + 1 + 1 /* pad */ + 4;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&present.to_le_bytes());
        buf.push(0x00); // flags at 8
        buf.push(0xAA); // pad byte at 9
        buf.extend_from_slice(&5180u16.to_le_bytes()); // channel at 10
        buf.extend_from_slice(&0u16.to_le_bytes());
        let info = parse(&buf).unwrap();
        assert_eq!(info.channel_frequency, Some(5180));
    }

    #[test]
    fn parse_tolerates_unknown_presence_bits() {
        // Set a bit (24) we have no layout for, after the signal field;
        // signal must still be extracted.
        let present: u32 = (1 << DBM_ANTSIGNAL) | (1 << 24);
        let mut buf = vec![0u8, 0];
        let len: u16 = 8 + 1 + 7; // slack for the unknown field
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&present.to_le_bytes());
        buf.push((-61i8) as u8);
        buf.extend_from_slice(&[0u8; 7]);
        let info = parse(&buf).unwrap();
        assert_eq!(info.dbm_antenna_signal, Some(-61));
    }

    #[test]
    fn parse_follows_extended_present_words() {
        // Two present words; fields start after both.
        let first: u32 = (1 << DBM_ANTSIGNAL) | (1 << EXT);
        let second: u32 = 0;
        let mut buf = vec![0u8, 0];
        let len: u16 = 4 + 4 + 4 + 1;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&first.to_le_bytes());
        buf.extend_from_slice(&second.to_le_bytes());
        buf.push((-70i8) as u8);
        let info = parse(&buf).unwrap();
        assert_eq!(info.dbm_antenna_signal, Some(-70));
    }

    #[test]
    fn parse_rejects_truncated_and_bad_version() {
        assert!(parse(&[]).is_none());
        assert!(parse(&[0, 0, 8, 0]).is_none());
        let mut buf = full_header(-50, 2412, 2, 0);
        buf[0] = 1; // bad version
        assert!(parse(&buf).is_none());
        let mut buf = full_header(-50, 2412, 2, 0);
        buf[2] = 0xFF; // length beyond buffer
        buf[3] = 0xFF;
        assert!(parse(&buf).is_none());
    }

    // ── synthesize tests ────────────────────────────────────────────

    #[test]
    fn synthesized_header_is_bit_exact() {
        let header = synthesize(0x02, FLAG_NO_ACK);
        assert_eq!(header.len(), 10);
        assert_eq!(&header[..4], &[0x00, 0x00, 0x0A, 0x00]);
        // present = flags | rate
        assert_eq!(&header[4..8], &[0x06, 0x00, 0x00, 0x00]);
        assert_eq!(header[8], 0x08); // no-ACK flag
        assert_eq!(header[9], 0x02);
    }

    #[test]
    fn synthesized_header_reparses() {
        let header = synthesize(0x02, FLAG_NO_ACK);
        let info = parse(&header).unwrap();
        assert_eq!(info.flags, Some(FLAG_NO_ACK));
        assert_eq!(info.rate, Some(0x02));
        assert_eq!(info.header_len, 10);
    }

    // ── channel mapping ─────────────────────────────────────────────

    #[test]
    fn frequency_to_channel_mapping() {
        assert_eq!(channel_from_frequency(2412), Some(1));
        assert_eq!(channel_from_frequency(2437), Some(6));
        assert_eq!(channel_from_frequency(2472), Some(13));
        assert_eq!(channel_from_frequency(2484), Some(14));
        assert_eq!(channel_from_frequency(5180), Some(36));
        assert_eq!(channel_from_frequency(5825), Some(165));
        assert_eq!(channel_from_frequency(1000), None);
    }
}
