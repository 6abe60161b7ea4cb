//! The detector pipeline.
//!
//! Detectors share one interface and are dispatched dynamically so
//! third-party detectors can register alongside the built-ins. Each
//! detector is pure over the device snapshot except for writing its
//! anomaly contribution back through the registry — which doubles as
//! the once-per-device deduplication marker.

mod builtin;
mod rules;

pub use builtin::{
    EvilTwinDetector, KarmaApDetector, KarmaClientDetector, RetryRateDetector, SpoofingDetector,
};
pub use rules::{RuleMatcher, RuleSet};

use std::sync::Arc;

use crate::model::{Alert, Device};
use crate::registry::DeviceRegistry;

/// One anomaly or rule detector.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn analyze(&self, device: &Device, registry: &DeviceRegistry) -> Vec<Alert>;
}

/// Ordered list of detectors run on every device observation.
pub struct DetectorPipeline {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorPipeline {
    pub fn new() -> DetectorPipeline {
        DetectorPipeline {
            detectors: Vec::new(),
        }
    }

    /// The built-in set plus the user rule matcher.
    pub fn with_defaults(rules: Arc<RuleSet>) -> DetectorPipeline {
        let mut pipeline = DetectorPipeline::new();
        pipeline.register(Box::new(RetryRateDetector));
        pipeline.register(Box::new(KarmaClientDetector));
        pipeline.register(Box::new(KarmaApDetector));
        pipeline.register(Box::new(EvilTwinDetector));
        pipeline.register(Box::new(SpoofingDetector));
        pipeline.register(Box::new(RuleMatcher::new(rules)));
        pipeline
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        log::debug!("detector registered: {}", detector.name());
        self.detectors.push(detector);
    }

    pub fn analyze(&self, device: &Device, registry: &DeviceRegistry) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for detector in &self.detectors {
            alerts.extend(detector.analyze(device, registry));
        }
        alerts
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// True when this subtype was already recorded for the device — the
/// shared dedup check.
pub(crate) fn already_flagged(device: &Device, subtype: &str) -> bool {
    device
        .behavioral_profile
        .as_ref()
        .is_some_and(|profile| profile.anomaly_details.contains_key(subtype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mac, Severity};
    use chrono::Utc;

    struct FixedDetector;

    impl Detector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn analyze(&self, device: &Device, _registry: &DeviceRegistry) -> Vec<Alert> {
            vec![Alert::anomaly(
                "FIXED",
                Severity::Low,
                device.mac,
                "always fires".into(),
            )]
        }
    }

    #[test]
    fn pipeline_concatenates_detector_output() {
        let mut pipeline = DetectorPipeline::new();
        pipeline.register(Box::new(FixedDetector));
        pipeline.register(Box::new(FixedDetector));
        let registry = DeviceRegistry::new();
        let device = Device::new(Mac::ZERO, Utc::now());
        assert_eq!(pipeline.analyze(&device, &registry).len(), 2);
    }

    #[test]
    fn default_pipeline_has_all_builtins() {
        let pipeline = DetectorPipeline::with_defaults(Arc::new(RuleSet::new()));
        assert_eq!(pipeline.len(), 6);
    }
}
