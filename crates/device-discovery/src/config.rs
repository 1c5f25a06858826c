use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DiscoveryError;

/// Participant settings: which domain to join and the name peers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub domain: u32,
    #[serde(default = "default_participant")]
    pub participant: String,
}

fn default_participant() -> String {
    "discovery-participant".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            domain: 0,
            participant: default_participant(),
        }
    }
}

impl DiscoveryConfig {
    pub fn new(domain: u32, participant: impl Into<String>) -> Self {
        Self {
            domain,
            participant: participant.into(),
        }
    }

    /// Reads settings either from the root object or from a nested `"dds"`
    /// section, e.g. `{"dds": {"domain": 123, "participant": "client"}}`.
    pub fn from_settings(settings: &Value) -> Result<Self, DiscoveryError> {
        let section = settings.get("dds").unwrap_or(settings);
        if !section.is_object() {
            return Err(DiscoveryError::Settings(format!(
                "expected an object, found {section}"
            )));
        }
        serde_json::from_value(section.clone())
            .map_err(|err| DiscoveryError::Settings(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_nested_dds_section() {
        let config = DiscoveryConfig::from_settings(&json!({
            "dds": { "domain": 123, "participant": "device-properties-client" }
        }))
        .expect("settings");
        assert_eq!(config, DiscoveryConfig::new(123, "device-properties-client"));
    }

    #[test]
    fn fills_missing_fields_with_defaults() {
        let config = DiscoveryConfig::from_settings(&json!({ "domain": 7 })).expect("settings");
        assert_eq!(config.domain, 7);
        assert_eq!(config.participant, "discovery-participant");
    }

    #[test]
    fn rejects_non_object_and_bad_types() {
        assert!(matches!(
            DiscoveryConfig::from_settings(&json!({ "dds": 5 })),
            Err(DiscoveryError::Settings(_))
        ));
        assert!(matches!(
            DiscoveryConfig::from_settings(&json!({ "domain": "zero" })),
            Err(DiscoveryError::Settings(_))
        ));
    }
}
