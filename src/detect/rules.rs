//! User-configured alert rules and their matcher.
//!
//! A rule targets one device field (SSID, MAC, vendor, or probe
//! history); matching is case-insensitive substring unless the rule
//! asks for an exact match.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::model::{Alert, AlertRule, AlertType, Device, RuleType, Severity};
use crate::registry::DeviceRegistry;

use super::{already_flagged, Detector};

const SUBTYPE_RULE_MATCH: &str = "RULE_MATCH";

/// Shared, mutable rule collection behind the control port.
pub struct RuleSet {
    rules: RwLock<Vec<AlertRule>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSet {
    pub fn new() -> RuleSet {
        RuleSet {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, rule: AlertRule) -> Uuid {
        let id = rule.id;
        self.rules.write().unwrap().push(rule);
        id
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        let mut rules = self.rules.write().unwrap();
        let before = rules.len();
        rules.retain(|rule| rule.id != *id);
        rules.len() != before
    }

    pub fn list(&self) -> Vec<AlertRule> {
        self.rules.read().unwrap().clone()
    }

    fn enabled(&self) -> Vec<AlertRule> {
        self.rules
            .read()
            .unwrap()
            .iter()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect()
    }
}

fn value_matches(rule: &AlertRule, candidate: &str) -> bool {
    if rule.exact {
        candidate.eq_ignore_ascii_case(&rule.value)
    } else {
        candidate
            .to_lowercase()
            .contains(&rule.value.to_lowercase())
    }
}

fn rule_matches(rule: &AlertRule, device: &Device) -> Option<String> {
    match rule.rule_type {
        RuleType::Ssid => value_matches(rule, &device.ssid).then(|| device.ssid.clone()),
        RuleType::Mac => {
            let mac = device.mac.to_string();
            value_matches(rule, &mac).then_some(mac)
        }
        RuleType::Vendor => value_matches(rule, &device.vendor).then(|| device.vendor.clone()),
        RuleType::Probe => device
            .probed_ssids
            .keys()
            .find(|ssid| value_matches(rule, ssid))
            .cloned(),
    }
}

fn alert_type_for(rule_type: RuleType) -> AlertType {
    match rule_type {
        RuleType::Ssid => AlertType::SsidMatch,
        RuleType::Mac => AlertType::MacMatch,
        RuleType::Vendor => AlertType::VendorMatch,
        RuleType::Probe => AlertType::ProbeMatch,
    }
}

/// Evaluates every enabled rule against each observation.
pub struct RuleMatcher {
    rules: Arc<RuleSet>,
}

impl RuleMatcher {
    pub fn new(rules: Arc<RuleSet>) -> RuleMatcher {
        RuleMatcher { rules }
    }
}

impl Detector for RuleMatcher {
    fn name(&self) -> &'static str {
        "rule-matcher"
    }

    fn analyze(&self, device: &Device, registry: &DeviceRegistry) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for rule in self.rules.enabled() {
            let marker = format!("{SUBTYPE_RULE_MATCH}_{}", rule.id);
            if already_flagged(device, &marker) {
                continue;
            }
            let Some(matched) = rule_matches(&rule, device) else {
                continue;
            };
            registry.record_anomaly(&device.mac, &marker, 0.6);
            alerts.push(Alert {
                alert_type: alert_type_for(rule.rule_type),
                subtype: SUBTYPE_RULE_MATCH.to_string(),
                severity: Severity::High,
                device_mac: device.mac,
                target_mac: None,
                message: format!("rule \"{}\" matched \"{matched}\"", rule.value),
                details: matched,
                timestamp: chrono::Utc::now(),
                rule_id: Some(rule.id),
            });
        }
        alerts
    }
}
