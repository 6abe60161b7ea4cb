//! Built-in anomaly detectors.

use crate::model::{Alert, DeviceKind, Severity};
use crate::registry::DeviceRegistry;

use super::{already_flagged, Detector};

const SUBTYPE_HIGH_RETRY: &str = "HIGH_RETRY_RATE";
const SUBTYPE_KARMA_CLIENT: &str = "KARMA_DETECTION";
const SUBTYPE_KARMA_AP: &str = "KARMA_AP_DETECTED";
const SUBTYPE_EVIL_TWIN: &str = "EVIL_TWIN_DETECTED";
const SUBTYPE_SPOOFING: &str = "OUI_SPOOFING";

/// Sustained retry rate above 20% over a meaningful sample.
pub struct RetryRateDetector;

impl Detector for RetryRateDetector {
    fn name(&self) -> &'static str {
        "retry-rate"
    }

    fn analyze(&self, device: &crate::model::Device, registry: &DeviceRegistry) -> Vec<Alert> {
        if device.packets <= 50 || already_flagged(device, SUBTYPE_HIGH_RETRY) {
            return Vec::new();
        }
        let rate = device.retries as f64 / device.packets as f64;
        if rate <= 0.20 {
            return Vec::new();
        }
        registry.record_anomaly(&device.mac, SUBTYPE_HIGH_RETRY, 0.4);
        vec![Alert::anomaly(
            SUBTYPE_HIGH_RETRY,
            Severity::Medium,
            device.mac,
            format!(
                "retry rate {:.0}% over {} packets",
                rate * 100.0,
                device.packets
            ),
        )]
    }
}

/// A station probing for an implausible number of networks — karma
/// bait behavior.
pub struct KarmaClientDetector;

impl Detector for KarmaClientDetector {
    fn name(&self) -> &'static str {
        "karma-client"
    }

    fn analyze(&self, device: &crate::model::Device, registry: &DeviceRegistry) -> Vec<Alert> {
        if device.probed_ssids.len() <= 5 || already_flagged(device, SUBTYPE_KARMA_CLIENT) {
            return Vec::new();
        }
        registry.record_anomaly(&device.mac, SUBTYPE_KARMA_CLIENT, 0.8);
        vec![Alert::anomaly(
            SUBTYPE_KARMA_CLIENT,
            Severity::High,
            device.mac,
            format!("station probing for {} networks", device.probed_ssids.len()),
        )]
    }
}

/// One BSSID answering for multiple SSIDs over its lifetime — a
/// mana/karma access point.
pub struct KarmaApDetector;

impl Detector for KarmaApDetector {
    fn name(&self) -> &'static str {
        "karma-ap"
    }

    fn analyze(&self, device: &crate::model::Device, registry: &DeviceRegistry) -> Vec<Alert> {
        if device.kind != DeviceKind::Ap || already_flagged(device, SUBTYPE_KARMA_AP) {
            return Vec::new();
        }
        let history = registry.ap_ssid_history(&device.mac);
        if history.len() < 2 {
            return Vec::new();
        }
        registry.record_anomaly(&device.mac, SUBTYPE_KARMA_AP, 1.0);
        vec![Alert::anomaly(
            SUBTYPE_KARMA_AP,
            Severity::Critical,
            device.mac,
            format!("AP advertised {} distinct SSIDs: {}", history.len(), history.join(", ")),
        )]
    }
}

/// An AP advertising a known SSID with a different security than the
/// network was first seen with.
pub struct EvilTwinDetector;

impl Detector for EvilTwinDetector {
    fn name(&self) -> &'static str {
        "evil-twin"
    }

    fn analyze(&self, device: &crate::model::Device, registry: &DeviceRegistry) -> Vec<Alert> {
        if device.kind != DeviceKind::Ap
            || device.ssid.is_empty()
            || already_flagged(device, SUBTYPE_EVIL_TWIN)
        {
            return Vec::new();
        }
        let Some(current) = device.security else {
            return Vec::new();
        };
        let Some(expected) = registry.ssid_security(&device.ssid) else {
            return Vec::new();
        };
        if expected == current {
            return Vec::new();
        }
        registry.record_anomaly(&device.mac, SUBTYPE_EVIL_TWIN, 0.9);
        vec![Alert::anomaly(
            SUBTYPE_EVIL_TWIN,
            Severity::Critical,
            device.mac,
            format!(
                "SSID \"{}\" first seen as {expected} now advertised as {current} by {}",
                device.ssid, device.mac
            ),
        )]
    }
}

/// A vendor-labelled radio with a rich IE set but no identifiable
/// model — consistent with a spoofed OUI.
pub struct SpoofingDetector;

impl Detector for SpoofingDetector {
    fn name(&self) -> &'static str {
        "oui-spoofing"
    }

    fn analyze(&self, device: &crate::model::Device, registry: &DeviceRegistry) -> Vec<Alert> {
        let vendor_known = !device.vendor.is_empty()
            && device.vendor != "Unknown"
            && device.vendor != "Randomized";
        if !vendor_known
            || !device.model.is_empty()
            || device.ie_tags.len() <= 5
            || already_flagged(device, SUBTYPE_SPOOFING)
        {
            return Vec::new();
        }
        registry.record_anomaly(&device.mac, SUBTYPE_SPOOFING, 0.5);
        vec![Alert::anomaly(
            SUBTYPE_SPOOFING,
            Severity::Medium,
            device.mac,
            format!(
                "{} OUI with {} IEs but no identifiable model",
                device.vendor,
                device.ie_tags.len()
            ),
        )]
    }
}
