// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration for timeline construction and presentation
//!
//! Defaults match what the timeline view expects out of the box. A config can
//! also be loaded from TOML and overridden from `TRACELANE_*` environment
//! variables, for deployments that tune clustering or gap compression.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};
use crate::layout::MarkerDepth;

/// Same-named spans starting within this many ms of a cluster's end are
/// treated as running in parallel
pub const DEFAULT_OVERLAP_TOLERANCE_MS: i64 = 100;

/// Upper bound for the clustering tolerance (one hour)
pub const MAX_OVERLAP_TOLERANCE_MS: i64 = 3_600_000;

/// Gaps longer than this are compressed in the time mapping
pub const DEFAULT_IDLE_GAP_THRESHOLD_MS: i64 = 30_000;

/// Display length of a compressed gap
pub const DEFAULT_COMPRESSED_GAP_MS: i64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Clustering tolerance for swimlane rows
    pub overlap_tolerance_ms: i64,

    /// How deep marker collection descends below a row's spans
    pub marker_depth: MarkerDepth,

    /// Run automatic reroll detection on agent spans
    pub detect_branches: bool,

    /// Mark single-turn helper agents as utility spans
    pub classify_utility: bool,

    /// Minimum gap length that gets compressed
    pub idle_gap_threshold_ms: i64,

    /// Display length given to each compressed gap
    pub compressed_gap_ms: i64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            overlap_tolerance_ms: DEFAULT_OVERLAP_TOLERANCE_MS,
            marker_depth: MarkerDepth::Children,
            detect_branches: true,
            classify_utility: true,
            idle_gap_threshold_ms: DEFAULT_IDLE_GAP_THRESHOLD_MS,
            compressed_gap_ms: DEFAULT_COMPRESSED_GAP_MS,
        }
    }
}

impl TimelineConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| TimelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Override fields from `TRACELANE_*` environment variables
    ///
    /// Unparseable values are ignored and leave the current value in place.
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_parse("TRACELANE_OVERLAP_TOLERANCE_MS") {
            self.overlap_tolerance_ms = v;
        }
        if let Some(v) = env_parse("TRACELANE_MARKER_DEPTH") {
            self.marker_depth = v;
        }
        if let Ok(v) = env::var("TRACELANE_DETECT_BRANCHES") {
            self.detect_branches = v == "true";
        }
        if let Ok(v) = env::var("TRACELANE_CLASSIFY_UTILITY") {
            self.classify_utility = v == "true";
        }
        if let Some(v) = env_parse("TRACELANE_IDLE_GAP_THRESHOLD_MS") {
            self.idle_gap_threshold_ms = v;
        }
        if let Some(v) = env_parse("TRACELANE_COMPRESSED_GAP_MS") {
            self.compressed_gap_ms = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_OVERLAP_TOLERANCE_MS).contains(&self.overlap_tolerance_ms) {
            return Err(TimelineError::Config(format!(
                "overlap_tolerance_ms must be between 0 and {MAX_OVERLAP_TOLERANCE_MS}, got {}",
                self.overlap_tolerance_ms
            )));
        }
        if self.compressed_gap_ms < 0 || self.idle_gap_threshold_ms < 0 {
            return Err(TimelineError::Config(
                "gap compression lengths must not be negative".into(),
            ));
        }
        if self.compressed_gap_ms > self.idle_gap_threshold_ms {
            return Err(TimelineError::Config(format!(
                "compressed_gap_ms ({}) exceeds idle_gap_threshold_ms ({})",
                self.compressed_gap_ms, self.idle_gap_threshold_ms
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TimelineConfig::default();
        assert_eq!(config.overlap_tolerance_ms, 100);
        assert_eq!(config.marker_depth, MarkerDepth::Children);
        assert!(config.detect_branches);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = TimelineConfig::from_toml_str(
            r#"
            overlap_tolerance_ms = 250
            marker_depth = "recursive"
            "#,
        )
        .unwrap();
        assert_eq!(config.overlap_tolerance_ms, 250);
        assert_eq!(config.marker_depth, MarkerDepth::Recursive);
        assert!(config.classify_utility);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(TimelineConfig::from_toml_str("overlap_tolerance_ms = -5").is_err());
        assert!(TimelineConfig::from_toml_str("compressed_gap_ms = 99999999").is_err());
        assert!(TimelineConfig::from_toml_str("overlap_tolerance_ms = \"x\"").is_err());
        assert!(TimelineConfig::from_toml_str("overlap_tolerance_ms = 9223372036854775807").is_err());
    }

    #[test]
    fn test_oversized_env_tolerance_fails_validation() {
        let config = TimelineConfig {
            overlap_tolerance_ms: i64::MAX,
            ..TimelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(TimelineError::Config(_))));

        let config = TimelineConfig {
            overlap_tolerance_ms: MAX_OVERLAP_TOLERANCE_MS,
            ..TimelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracelane.toml");
        std::fs::write(&path, "detect_branches = false\n").unwrap();

        let config = TimelineConfig::from_file(&path).unwrap();
        assert!(!config.detect_branches);
    }

    #[test]
    fn test_apply_env() {
        env::set_var("TRACELANE_OVERLAP_TOLERANCE_MS", "42");
        env::set_var("TRACELANE_MARKER_DEPTH", "direct");
        let config = TimelineConfig::default().apply_env();
        assert_eq!(config.overlap_tolerance_ms, 42);
        assert_eq!(config.marker_depth, MarkerDepth::Direct);
        env::remove_var("TRACELANE_OVERLAP_TOLERANCE_MS");
        env::remove_var("TRACELANE_MARKER_DEPTH");
    }
}
