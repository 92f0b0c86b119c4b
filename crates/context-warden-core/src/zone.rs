//! Severity zone classification.
//!
//! Maps a [`StateVector`] into one of five ordered zones. The zone drives
//! the target compression ratio downstream; crisis additionally forces
//! emergency mode in the compression engine.

use serde::{Deserialize, Serialize};

use crate::config::ZoneConfig;
use crate::state::StateVector;

/// Ordered severity bands, least severe first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    #[default]
    Optimal,
    Viable,
    Warning,
    Critical,
    Crisis,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Optimal => "optimal",
            Zone::Viable => "viable",
            Zone::Warning => "warning",
            Zone::Critical => "critical",
            Zone::Crisis => "crisis",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneAssessment {
    pub zone: Zone,
    pub is_viable: bool,
    /// Forced on in crisis; compression collapses to stubs.
    pub emergency_mode: bool,
    /// Default compression ratio for the zone.
    pub target_ratio: f32,
}

/// Classifies state vectors by magnitude with viability demotion.
#[derive(Debug, Clone, Default)]
pub struct ZoneClassifier {
    config: ZoneConfig,
}

impl ZoneClassifier {
    pub fn new(config: ZoneConfig) -> Self {
        Self { config }
    }

    /// Classify a state vector.
    ///
    /// Magnitude picks the band; a non-viable state cannot rest in the two
    /// healthy zones and is demoted to warning.
    pub fn classify(&self, state: &StateVector) -> ZoneAssessment {
        let b = &self.config.boundaries;
        let mut zone = if state.magnitude >= b.optimal_min {
            Zone::Optimal
        } else if state.magnitude >= b.viable_min {
            Zone::Viable
        } else if state.magnitude >= b.warning_min {
            Zone::Warning
        } else if state.magnitude >= b.critical_min {
            Zone::Critical
        } else {
            Zone::Crisis
        };

        if !state.is_viable && zone < Zone::Warning {
            zone = Zone::Warning;
        }

        ZoneAssessment {
            zone,
            is_viable: state.is_viable,
            emergency_mode: zone == Zone::Crisis,
            target_ratio: self.target_ratio(zone),
        }
    }

    /// Default target compression ratio for a zone.
    pub fn target_ratio(&self, zone: Zone) -> f32 {
        let r = &self.config.target_ratios;
        match zone {
            Zone::Optimal => r.optimal,
            Zone::Viable => r.viable,
            Zone::Warning => r.warning,
            Zone::Critical => r.critical,
            Zone::Crisis => r.crisis,
        }
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(magnitude: f32, viable: bool) -> StateVector {
        StateVector {
            form: magnitude,
            function: magnitude,
            behavior: magnitude,
            context: magnitude,
            magnitude,
            is_viable: viable,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_zone_ordering() {
        assert!(Zone::Optimal < Zone::Viable);
        assert!(Zone::Viable < Zone::Warning);
        assert!(Zone::Warning < Zone::Critical);
        assert!(Zone::Critical < Zone::Crisis);
    }

    #[test]
    fn test_classification_ladder() {
        let classifier = ZoneClassifier::default();
        assert_eq!(classifier.classify(&state(0.9, true)).zone, Zone::Optimal);
        assert_eq!(classifier.classify(&state(0.6, true)).zone, Zone::Viable);
        assert_eq!(classifier.classify(&state(0.45, true)).zone, Zone::Warning);
        assert_eq!(classifier.classify(&state(0.3, true)).zone, Zone::Critical);
        assert_eq!(classifier.classify(&state(0.1, true)).zone, Zone::Crisis);
    }

    #[test]
    fn test_boundary_values_inclusive() {
        let classifier = ZoneClassifier::default();
        let b = classifier.config().boundaries;
        assert_eq!(classifier.classify(&state(b.optimal_min, true)).zone, Zone::Optimal);
        assert_eq!(classifier.classify(&state(b.viable_min, true)).zone, Zone::Viable);
        assert_eq!(classifier.classify(&state(b.warning_min, true)).zone, Zone::Warning);
        assert_eq!(classifier.classify(&state(b.critical_min, true)).zone, Zone::Critical);
    }

    #[test]
    fn test_non_viable_demotes_healthy_zones() {
        let classifier = ZoneClassifier::default();
        let assessment = classifier.classify(&state(0.9, false));
        assert_eq!(assessment.zone, Zone::Warning);
        assert!(!assessment.is_viable);
        // Already-severe zones are unaffected.
        assert_eq!(classifier.classify(&state(0.3, false)).zone, Zone::Critical);
    }

    #[test]
    fn test_crisis_forces_emergency_mode() {
        let classifier = ZoneClassifier::default();
        let assessment = classifier.classify(&state(0.05, false));
        assert_eq!(assessment.zone, Zone::Crisis);
        assert!(assessment.emergency_mode);
        assert!(!classifier.classify(&state(0.3, true)).emergency_mode);
    }

    #[test]
    fn test_target_ratios_monotone_with_severity() {
        let classifier = ZoneClassifier::default();
        let ratios: Vec<f32> = [Zone::Optimal, Zone::Viable, Zone::Warning, Zone::Critical, Zone::Crisis]
            .iter()
            .map(|z| classifier.target_ratio(*z))
            .collect();
        for pair in ratios.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert!((ratios[0] - 1.2).abs() < f32::EPSILON);
        assert!((ratios[4] - 10.0).abs() < f32::EPSILON);
    }
}
