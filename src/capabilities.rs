//! Server feature detection.
//!
//! Capabilities are a pure function of the server's dotted version string and
//! are resolved once at startup into a [`MutationStrategy`].

use crate::core::{ChurnError, Result};
use serde::Serialize;
use std::fmt;

/// Major/minor/patch triple parsed from `db.version()`-style strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// Parses `major.minor[.patch][-suffix]`. Major and minor are required;
    /// the patch component only contributes its leading digits.
    pub fn parse(version: &str) -> Result<Self> {
        let invalid = || ChurnError::InvalidVersion(version.to_string());
        let mut parts = version.trim().split('.');

        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let patch = parts
            .next()
            .map(|p| {
                let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u32>().unwrap_or(0)
            })
            .unwrap_or(0);

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub version: ServerVersion,
    pub supports_pipeline_update: bool,
    pub supports_delete_on_timeseries_without_meta: bool,
    pub supports_timeseries: bool,
}

impl Capabilities {
    pub fn resolve(version: &str) -> Result<Self> {
        Ok(Self::for_version(ServerVersion::parse(version)?))
    }

    pub fn for_version(version: ServerVersion) -> Self {
        let ServerVersion { major, minor, .. } = version;
        Self {
            version,
            supports_pipeline_update: major >= 5 || (major == 4 && minor == 4),
            supports_delete_on_timeseries_without_meta: major >= 7,
            supports_timeseries: major >= 5,
        }
    }

    pub fn strategy(&self) -> MutationStrategy {
        if self.supports_pipeline_update {
            MutationStrategy::Pipeline
        } else {
            MutationStrategy::DocumentLevel
        }
    }
}

/// How the workload engine mutates and trims collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationStrategy {
    /// Server-side sampled pipeline updates and sample-rate deletes.
    Pipeline,
    /// Client-side sampling followed by per-document updates and id deletes.
    DocumentLevel,
}

impl fmt::Display for MutationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationStrategy::Pipeline => write!(f, "pipeline"),
            MutationStrategy::DocumentLevel => write!(f, "document-level"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_update_thresholds() {
        assert!(Capabilities::resolve("6.0.1").unwrap().supports_pipeline_update);
        assert!(!Capabilities::resolve("4.2.0").unwrap().supports_pipeline_update);
        assert!(Capabilities::resolve("4.4.5").unwrap().supports_pipeline_update);
        assert!(Capabilities::resolve("5.0.0").unwrap().supports_pipeline_update);
        assert!(!Capabilities::resolve("3.6.23").unwrap().supports_pipeline_update);
    }

    #[test]
    fn test_timeseries_flags() {
        let v6 = Capabilities::resolve("6.0.1").unwrap();
        assert!(v6.supports_timeseries);
        assert!(!v6.supports_delete_on_timeseries_without_meta);

        let v7 = Capabilities::resolve("7.0.2").unwrap();
        assert!(v7.supports_delete_on_timeseries_without_meta);

        let v44 = Capabilities::resolve("4.4.5").unwrap();
        assert!(!v44.supports_timeseries);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            Capabilities::resolve("8.0.0").unwrap().strategy(),
            MutationStrategy::Pipeline
        );
        assert_eq!(
            Capabilities::resolve("4.2.24").unwrap().strategy(),
            MutationStrategy::DocumentLevel
        );
    }

    #[test]
    fn test_version_suffixes() {
        let v = ServerVersion::parse("7.0.0-rc1").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (7, 0, 0));

        let v = ServerVersion::parse("6.3").unwrap();
        assert_eq!(v.patch, 0);
        assert_eq!(v.to_string(), "6.3.0");
    }

    #[test]
    fn test_malformed_versions_are_rejected() {
        for bad in ["", "six", "6", "6.x.1", ".4.2", "v6.0.1"] {
            assert_eq!(
                Capabilities::resolve(bad),
                Err(ChurnError::InvalidVersion(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }
}
