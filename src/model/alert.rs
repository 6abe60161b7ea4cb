//! Alerts raised by the handler and the detector pipeline, and the
//! user-configurable rules that drive the rule matcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Mac;

/// Broad alert classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    SsidMatch,
    MacMatch,
    VendorMatch,
    ProbeMatch,
    Anomaly,
}

/// Alert severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// A single alert. `subtype` carries the free-form sub-class
/// (e.g. `HIGH_RETRY_RATE`, `EVIL_TWIN_DETECTED`, `HANDSHAKE_CAPTURED`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub subtype: String,
    pub severity: Severity,
    pub device_mac: Mac,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_mac: Option<Mac>,
    pub message: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
}

impl Alert {
    pub fn anomaly(subtype: &str, severity: Severity, mac: Mac, message: String) -> Alert {
        Alert {
            alert_type: AlertType::Anomaly,
            subtype: subtype.to_string(),
            severity,
            device_mac: mac,
            target_mac: None,
            message,
            details: String::new(),
            timestamp: Utc::now(),
            rule_id: None,
        }
    }
}

/// What field of a device a user rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Ssid,
    Mac,
    Vendor,
    Probe,
}

/// A user-configured match rule. Matching is case-insensitive substring
/// unless `exact` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub value: String,
    pub exact: bool,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(rule_type: RuleType, value: &str, exact: bool) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            rule_type,
            value: value.to_string(),
            exact,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_most_severe_first() {
        assert!(Severity::Critical < Severity::High);
        assert!(Severity::High < Severity::Medium);
        assert!(Severity::Medium < Severity::Low);
        assert!(Severity::Low < Severity::Info);
    }

    #[test]
    fn alert_serializes_with_type_tag() {
        let alert = Alert::anomaly(
            "HIGH_RETRY_RATE",
            Severity::Medium,
            Mac([0, 1, 2, 3, 4, 5]),
            "retry rate 35%".into(),
        );
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"type\":\"ANOMALY\""));
        assert!(json.contains("\"subtype\":\"HIGH_RETRY_RATE\""));
        assert!(json.contains("\"severity\":\"medium\""));
        assert!(!json.contains("rule_id"));
    }

    #[test]
    fn rule_defaults_enabled() {
        let rule = AlertRule::new(RuleType::Ssid, "TargetCorp", false);
        assert!(rule.enabled);
        assert!(!rule.exact);
    }
}
