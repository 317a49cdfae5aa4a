use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::coupling::BlendLaw;
use crate::tracking::TrackingSettings;
use crate::tracking::interaction::InteractionKind;

/// Settings of one particle cloud.
///
/// Every field has a default, so a config file only needs to name what it
/// changes. The interaction registry maps patch names to their behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudConfig {
    pub name: String,
    pub tracking: TrackingSettings,
    /// How the advection velocity is blended after a coupling update.
    pub blend: BlendLaw,
    /// Interval between authoritative updates from the dynamics engine.
    pub coupling_period: f64,
    /// Track particles on the rayon thread pool.
    pub parallel: bool,
    pub interactions: IndexMap<String, InteractionKind>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            name: "cloud".to_string(),
            tracking: TrackingSettings::default(),
            blend: BlendLaw::default(),
            coupling_period: 1e-3,
            parallel: true,
            interactions: IndexMap::new(),
        }
    }
}

impl CloudConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_interaction(mut self, patch: &str, kind: InteractionKind) -> Self {
        self.interactions.insert(patch.to_string(), kind);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize cloud config from string")
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to deserialize cloud config from: {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize cloud config to string")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_fill_missing_fields() -> Result<()> {
        let config = CloudConfig::from_json_str(r#"{"name": "beads", "tracking": {"maxFaceCrossings": 50}}"#)?;
        assert_eq!(config.name, "beads");
        assert_eq!(config.tracking.max_face_crossings, 50);
        assert_eq!(config.tracking.tolerance, 1e-9);
        assert_eq!(config.blend, BlendLaw::Average);
        assert!(config.parallel);
        assert!(config.interactions.is_empty());
        Ok(())
    }

    #[test]
    fn test_file_round_trip() -> Result<()> {
        let config = CloudConfig::new("beads")
            .with_interaction("walls", InteractionKind::Rebound { restitution: 0.8 })
            .with_interaction("outlet", InteractionKind::Escape);
        let mut file = NamedTempFile::new()?;
        file.write_all(config.to_json_string()?.as_bytes())?;
        let back = CloudConfig::from_json_file(file.path())?;
        assert_eq!(back, config);
        assert_eq!(back.interactions.keys().collect::<Vec<_>>(), vec!["walls", "outlet"]);
        Ok(())
    }

    #[test]
    fn test_invalid_json_has_context() {
        let err = CloudConfig::from_json_str("{ not json").unwrap_err();
        assert!(err.to_string().contains("cloud config"));
        assert!(CloudConfig::from_json_file(Path::new("/nonexistent/cloud.json")).is_err());
    }
}
