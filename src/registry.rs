//! The authoritative in-memory device map.
//!
//! All mutation goes through [`DeviceRegistry::observe`] and the sweep
//! operations — nothing else in the engine writes device state. Merge
//! semantics: carried scalars overwrite, counters accumulate, IE tags
//! only grow, probe history unions with newest-wins, `first_seen` is
//! immutable.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;

use crate::codec::HIDDEN_SSID;
use crate::model::{
    BehavioralProfile, ConnectionState, Device, DeviceKind, DeviceObservation, Mac, Security,
    Severity, Vulnerability,
};

/// Query-port filter for device listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceFilter {
    pub kind: Option<DeviceKind>,
    /// Case-insensitive SSID substring.
    pub ssid: Option<String>,
    pub min_rssi: Option<i32>,
}

pub struct DeviceRegistry {
    devices: RwLock<HashMap<Mac, Device>>,
    /// SSID -> first security label ever observed for it. Feeds the
    /// evil-twin detector; first observation wins.
    ssid_security: RwLock<HashMap<String, Security>>,
    /// Every SSID each AP has ever advertised. Feeds the karma-AP
    /// detector.
    ap_ssids: RwLock<HashMap<Mac, std::collections::BTreeSet<String>>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry {
            devices: RwLock::new(HashMap::new()),
            ssid_security: RwLock::new(HashMap::new()),
            ap_ssids: RwLock::new(HashMap::new()),
        }
    }

    /// Merge one observation. Returns the post-merge device and whether
    /// this was its first sighting.
    pub fn observe(&self, obs: DeviceObservation) -> (Device, bool) {
        let mut devices = self.devices.write().unwrap();
        let discovered = !devices.contains_key(&obs.mac);
        let device = devices
            .entry(obs.mac)
            .or_insert_with(|| Device::new(obs.mac, obs.timestamp));
        merge(device, &obs);
        let snapshot = device.clone();
        drop(devices);

        if snapshot.kind == DeviceKind::Ap && !snapshot.ssid.is_empty() && snapshot.ssid != HIDDEN_SSID
        {
            if let Some(security) = snapshot.security {
                self.ssid_security
                    .write()
                    .unwrap()
                    .entry(snapshot.ssid.clone())
                    .or_insert(security);
            }
            self.ap_ssids
                .write()
                .unwrap()
                .entry(snapshot.mac)
                .or_default()
                .insert(snapshot.ssid.clone());
        }

        (snapshot, discovered)
    }

    pub fn get(&self, mac: &Mac) -> Option<Device> {
        self.devices.read().unwrap().get(mac).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().unwrap().is_empty()
    }

    pub fn list(&self) -> Vec<Device> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    pub fn list_filtered(&self, filter: &DeviceFilter) -> Vec<Device> {
        let ssid_needle = filter.ssid.as_ref().map(|s| s.to_lowercase());
        self.devices
            .read()
            .unwrap()
            .values()
            .filter(|device| {
                filter.kind.map_or(true, |kind| device.kind == kind)
                    && filter.min_rssi.map_or(true, |min| device.rssi >= min)
                    && ssid_needle.as_ref().map_or(true, |needle| {
                        device.ssid.to_lowercase().contains(needle)
                    })
            })
            .cloned()
            .collect()
    }

    /// The security first observed for an SSID, if any.
    pub fn ssid_security(&self, ssid: &str) -> Option<Security> {
        self.ssid_security.read().unwrap().get(ssid).copied()
    }

    /// Every SSID this AP has been seen advertising.
    pub fn ap_ssid_history(&self, mac: &Mac) -> Vec<String> {
        self.ap_ssids
            .read()
            .unwrap()
            .get(mac)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Write a detector contribution into a device's behavioral
    /// profile. The only detector-driven mutation.
    pub fn record_anomaly(&self, mac: &Mac, subtype: &str, contribution: f64) {
        let mut devices = self.devices.write().unwrap();
        if let Some(device) = devices.get_mut(mac) {
            device
                .behavioral_profile
                .get_or_insert_with(BehavioralProfile::default)
                .anomaly_details
                .insert(subtype.to_string(), contribution.clamp(0.0, 1.0));
        }
    }

    /// Attach a vulnerability tag to a device. Idempotent per tag.
    pub fn record_vulnerability(&self, mac: &Mac, tag: &str, severity: Severity) {
        let mut devices = self.devices.write().unwrap();
        if let Some(device) = devices.get_mut(mac) {
            if !device.vulnerabilities.iter().any(|v| v.tag == tag) {
                device.vulnerabilities.push(Vulnerability {
                    tag: tag.to_string(),
                    severity,
                });
            }
        }
    }

    /// Remove devices not seen for longer than `ttl`. Returns how many
    /// were removed.
    pub fn prune(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut devices = self.devices.write().unwrap();
        let before = devices.len();
        devices.retain(|_, device| now - device.last_seen <= ttl);
        let removed = before - devices.len();
        if removed > 0 {
            log::debug!("pruned {removed} stale device(s)");
        }
        removed
    }

    /// Degrade the connection state of devices silent for `timeout`
    /// back to disconnected. Returns how many were degraded.
    pub fn cleanup_stale_connections(&self, timeout: Duration, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        let mut devices = self.devices.write().unwrap();
        let mut degraded = 0;
        for device in devices.values_mut() {
            if device.connection_state != ConnectionState::Disconnected
                && now - device.last_seen > timeout
            {
                device.connection_state = ConnectionState::Disconnected;
                device.connection_target = None;
                degraded += 1;
            }
        }
        degraded
    }
}

fn overwrite_string(field: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            *field = value.clone();
        }
    }
}

fn merge(device: &mut Device, obs: &DeviceObservation) {
    // Role: unknown never demotes a classified device.
    if obs.kind != DeviceKind::Unknown {
        device.kind = obs.kind;
    }

    if let Some(rssi) = obs.rssi {
        device.rssi = rssi;
    }
    if let Some(frequency) = obs.frequency {
        device.frequency = frequency;
    }
    if let Some(channel) = obs.channel {
        device.channel = channel;
    }
    if let Some(width) = obs.channel_width {
        device.channel_width = width;
    }

    overwrite_string(&mut device.ssid, &obs.ssid);
    overwrite_string(&mut device.connected_ssid, &obs.connected_ssid);
    overwrite_string(&mut device.vendor, &obs.vendor);
    overwrite_string(&mut device.model, &obs.model);
    overwrite_string(&mut device.os, &obs.os);
    device.is_randomized |= obs.is_randomized;

    if let Some(standard) = obs.standard {
        if device.standard.map_or(true, |current| current < standard) {
            device.standard = Some(standard);
        }
    }
    device.dot11k |= obs.dot11k;
    device.dot11r |= obs.dot11r;
    device.dot11v |= obs.dot11v;
    device.wifi6 |= obs.wifi6;
    device.wifi7 |= obs.wifi7;
    device.has_handshake |= obs.has_handshake;

    if let Some(security) = obs.security {
        device.security = Some(security);
    }
    if let Some(rsn) = &obs.rsn_info {
        device.rsn_info = Some(rsn.clone());
    }
    if let Some(wps) = &obs.wps_details {
        device.wps_details = Some(wps.clone());
    }

    device.packets += obs.packets;
    device.retries += obs.retries;
    device.data_tx += obs.data_tx;
    device.data_rx += obs.data_rx;

    // Fingerprint input only grows; a beacon's full IE set must not be
    // shadowed by a sparser probe response.
    if obs.ie_tags.len() > device.ie_tags.len() {
        device.ie_tags = obs.ie_tags.clone();
    }
    if let Some(signature) = &obs.signature {
        if !signature.is_empty() {
            device.signature = signature.clone();
        }
    }

    if obs.timestamp > device.last_seen {
        device.last_seen = obs.timestamp;
    }
    if obs.timestamp > device.last_packet_time {
        device.last_packet_time = obs.timestamp;
    }

    if let Some(state) = obs.connection_state {
        device.connection_state = state;
    }
    if let Some(target) = obs.connection_target {
        device.connection_target = Some(target);
    }
    if let Some(location) = obs.location {
        device.location = Some(location);
    }

    let hour = obs.timestamp.hour() as u8;
    if let Some(ssid) = &obs.probed_ssid {
        if !ssid.is_empty() {
            let newest = device
                .probed_ssids
                .get(ssid)
                .map_or(true, |&t| obs.timestamp > t);
            if newest {
                device.probed_ssids.insert(ssid.clone(), obs.timestamp);
            }
            let profile = device
                .behavioral_profile
                .get_or_insert_with(BehavioralProfile::default);
            profile.record_probe(obs.timestamp);
            profile.active_hours.insert(hour);
        }
    }
    if let Some(profile) = device.behavioral_profile.as_mut() {
        profile.active_hours.insert(hour);
        profile.ie_tags = device.ie_tags.clone();
        let ssids: Vec<String> = device.probed_ssids.keys().cloned().collect();
        profile.update_ssid_signature(ssids.iter().map(String::as_str));
    }
}
