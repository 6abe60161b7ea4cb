//! WPA/WPA2 4-way-handshake session tracking and PCAP export.
//!
//! Sessions are keyed by `(bssid, station)`. A session's PCAP is
//! (re)written only when it holds at least M1 and M2 *and* has more
//! captured messages than the richest save so far — a file on disk
//! never regresses to a poorer handshake.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;

use crate::codec::KeyMessage;
use crate::model::Mac;

struct Session {
    essid: String,
    /// (capture time, Radiotap-framed frame), bounded.
    frames: Vec<(DateTime<Utc>, Vec<u8>)>,
    captured: BTreeSet<KeyMessage>,
    /// Highest captured-count ever written to disk.
    saved_count: usize,
    last_update: DateTime<Utc>,
}

pub struct HandshakeTracker {
    dir: PathBuf,
    max_frames: usize,
    sessions: Mutex<HashMap<(Mac, Mac), Session>>,
    /// Beacon-learned `bssid -> essid`, used to enrich filenames.
    essids: Mutex<HashMap<Mac, String>>,
}

impl HandshakeTracker {
    pub fn new(dir: impl Into<PathBuf>, max_frames: usize) -> HandshakeTracker {
        HandshakeTracker {
            dir: dir.into(),
            max_frames,
            sessions: Mutex::new(HashMap::new()),
            essids: Mutex::new(HashMap::new()),
        }
    }

    /// Record a beacon-observed ESSID for a BSSID.
    pub fn note_beacon(&self, bssid: Mac, essid: &str) {
        if essid.is_empty() {
            return;
        }
        self.essids
            .lock()
            .unwrap()
            .insert(bssid, essid.to_string());
    }

    /// Feed one classified EAPOL frame. Returns the PCAP path when this
    /// frame caused a save. I/O failures are logged; the session stays
    /// in memory either way.
    pub fn process_eapol(
        &self,
        bssid: Mac,
        station: Mac,
        message: KeyMessage,
        frame: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Option<PathBuf> {
        // Pin the beacon-learned name onto the session; a beacon seen
        // between key messages still enriches the filename.
        let essid_hint = self.essids.lock().unwrap().get(&bssid).cloned();

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.entry((bssid, station)).or_insert_with(|| Session {
            essid: String::new(),
            frames: Vec::new(),
            captured: BTreeSet::new(),
            saved_count: 0,
            last_update: timestamp,
        });
        if let Some(essid) = essid_hint {
            session.essid = essid;
        }

        session.captured.insert(message);
        session.last_update = timestamp;
        if session.frames.len() < self.max_frames {
            session.frames.push((timestamp, frame.to_vec()));
        }
        log::debug!(
            "handshake {bssid} <-> {station}: M{} ({}/4)",
            message.number(),
            session.captured.len()
        );

        let complete_enough = session.captured.contains(&KeyMessage::M1)
            && session.captured.contains(&KeyMessage::M2);
        if !complete_enough || session.captured.len() <= session.saved_count {
            return None;
        }

        let essid = if session.essid.is_empty() {
            "unknown".to_string()
        } else {
            session.essid.clone()
        };
        let path = self.dir.join(format!(
            "{}_{}_{}.pcap",
            sanitize(&bssid.to_string()),
            sanitize(&essid),
            sanitize(&station.to_string())
        ));

        match write_pcap(&path, &session.frames) {
            Ok(()) => {
                session.saved_count = session.captured.len();
                log::info!(
                    "handshake saved: {} ({} message(s))",
                    path.display(),
                    session.saved_count
                );
                Some(path)
            }
            Err(err) => {
                log::warn!("handshake save failed for {}: {err}", path.display());
                None
            }
        }
    }

    /// Beacon-learned ESSID for a BSSID, if one was seen.
    pub fn essid_of(&self, bssid: &Mac) -> Option<String> {
        self.essids.lock().unwrap().get(bssid).cloned()
    }

    /// True when any session for this BSSID holds both M1 and M2.
    pub fn has_handshake(&self, bssid: &Mac) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .any(|((session_bssid, _), session)| {
                session_bssid == bssid
                    && session.captured.contains(&KeyMessage::M1)
                    && session.captured.contains(&KeyMessage::M2)
            })
    }

    /// Drop sessions idle for longer than `ttl`. Returns how many were
    /// removed.
    pub fn cleanup(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, session| now - session.last_update <= ttl);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// Keep `[A-Za-z0-9_-]`, replace everything else with `-`.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn write_pcap(path: &Path, frames: &[(DateTime<Utc>, Vec<u8>)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let header = PcapHeader {
        datalink: DataLink::IEEE802_11_RADIOTAP,
        ..Default::default()
    };
    let mut writer = PcapWriter::with_header(file, header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let mut ordered: Vec<&(DateTime<Utc>, Vec<u8>)> = frames.iter().collect();
    ordered.sort_by_key(|(timestamp, _)| *timestamp);
    for (timestamp, data) in ordered {
        let ts = Duration::new(
            timestamp.timestamp().max(0) as u64,
            timestamp.timestamp_subsec_nanos(),
        );
        writer
            .write_packet(&PcapPacket::new(ts, data.len() as u32, data))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BSSID: Mac = Mac([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01]);
    const STATION: Mac = Mac([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tracker(label: &str) -> (HandshakeTracker, PathBuf) {
        let dir = std::env::temp_dir().join(format!("aw-hs-{label}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        (HandshakeTracker::new(&dir, 20), dir)
    }

    fn frame(tag: u8) -> Vec<u8> {
        vec![tag; 64]
    }

    // ── save gate (the core invariant) ──────────────────────────────

    #[test]
    fn save_gate_progression() {
        let (tracker, dir) = tracker("gate");

        // M1 alone: nothing written.
        let saved = tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        assert!(saved.is_none());
        assert!(!dir.exists() || std::fs::read_dir(&dir).unwrap().next().is_none());

        // M1 + M2: exactly one file.
        let saved = tracker.process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1));
        let path = saved.expect("M1+M2 must save");
        assert!(path.exists());

        // + M3: same file overwritten once.
        let saved = tracker.process_eapol(BSSID, STATION, KeyMessage::M3, &frame(3), at(2));
        assert_eq!(saved.as_deref(), Some(path.as_path()));

        // + M4: overwritten once more.
        let saved = tracker.process_eapol(BSSID, STATION, KeyMessage::M4, &frame(4), at(3));
        assert!(saved.is_some());

        // Replayed M3: captured set unchanged, no further write.
        let saved = tracker.process_eapol(BSSID, STATION, KeyMessage::M3, &frame(3), at(4));
        assert!(saved.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn m2_alone_never_saves() {
        let (tracker, dir) = tracker("m2only");
        assert!(tracker
            .process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(0))
            .is_none());
        assert!(tracker
            .process_eapol(BSSID, STATION, KeyMessage::M4, &frame(4), at(1))
            .is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn saved_file_grows_with_richer_capture() {
        let (tracker, dir) = tracker("grow");
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        let path = tracker
            .process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1))
            .unwrap();
        let two = std::fs::metadata(&path).unwrap().len();
        tracker.process_eapol(BSSID, STATION, KeyMessage::M3, &frame(3), at(2));
        let three = std::fs::metadata(&path).unwrap().len();
        assert!(three > two);
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── filenames ───────────────────────────────────────────────────

    #[test]
    fn filename_uses_sanitized_triplet() {
        let (tracker, dir) = tracker("name");
        tracker.note_beacon(BSSID, "Caf\u{00e9} / Guest!");
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        let path = tracker
            .process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1))
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(
            name,
            "aa-bb-cc-00-00-01_Caf----Guest-_02-11-22-33-44-55.pcap"
        );
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn beacon_between_key_messages_still_names_the_file() {
        let (tracker, dir) = tracker("lateessid");
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        // The AP's beacon shows up only after the exchange started.
        tracker.note_beacon(BSSID, "LateNet");
        let path = tracker
            .process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1))
            .unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("_LateNet_"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn filename_falls_back_to_unknown_essid() {
        let (tracker, dir) = tracker("noessid");
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        let path = tracker
            .process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1))
            .unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("_unknown_"));
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── frame order and bounds ──────────────────────────────────────

    #[test]
    fn frames_written_in_timestamp_order() {
        let (tracker, dir) = tracker("order");
        // Arrive out of order: M2 stamped later fed first.
        tracker.process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(5));
        let path = tracker
            .process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(3))
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // Records: 24-byte global header, then 16-byte record header +
        // 64-byte frame each. First record must be the M1 (tag 1).
        assert_eq!(bytes[24 + 16], 1);
        assert_eq!(bytes[24 + 16 + 64 + 16], 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn frame_buffer_is_bounded() {
        let dir = std::env::temp_dir().join(format!("aw-hs-bound-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let tracker = HandshakeTracker::new(&dir, 3);
        for i in 0..10 {
            tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(i), at(i as i64));
        }
        let sessions = tracker.sessions.lock().unwrap();
        assert_eq!(sessions[&(BSSID, STATION)].frames.len(), 3);
        drop(sessions);
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── queries and cleanup ─────────────────────────────────────────

    #[test]
    fn has_handshake_requires_m1_and_m2() {
        let (tracker, dir) = tracker("query");
        assert!(!tracker.has_handshake(&BSSID));
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        assert!(!tracker.has_handshake(&BSSID));
        tracker.process_eapol(BSSID, STATION, KeyMessage::M2, &frame(2), at(1));
        assert!(tracker.has_handshake(&BSSID));
        assert!(!tracker.has_handshake(&STATION));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cleanup_drops_idle_sessions() {
        let (tracker, dir) = tracker("cleanup");
        tracker.process_eapol(BSSID, STATION, KeyMessage::M1, &frame(1), at(0));
        tracker.process_eapol(
            BSSID,
            Mac([0x02, 0, 0, 0, 0, 9]),
            KeyMessage::M1,
            &frame(1),
            at(280),
        );
        let removed = tracker.cleanup(Duration::from_secs(300), at(310));
        assert_eq!(removed, 1);
        assert_eq!(tracker.session_count(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── sanitize ────────────────────────────────────────────────────

    #[test]
    fn sanitize_replaces_non_portable_chars() {
        assert_eq!(sanitize("aa:bb:cc"), "aa-bb-cc");
        assert_eq!(sanitize("My Net (5G)"), "My-Net--5G-");
        assert_eq!(sanitize("ok_name-1"), "ok_name-1");
    }
}
