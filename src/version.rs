//! Document versioning.
//!
//! Versions are `MAJOR.MINOR.PATCH` with an optional leading `v`. Reconstruction
//! bumps the patch component by default; a malformed current version falls back
//! to [`DEFAULT_VERSION`] instead of aborting the run.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Document;

/// Version assumed when the document carries none or a malformed one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Error type for version parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Input is not `MAJOR.MINOR.PATCH`.
    #[error("Malformed version: {0:?}")]
    Malformed(String),
}

/// Which component to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bump {
    /// `x.y.z -> x.y.(z+1)`.
    #[default]
    Patch,
    /// `x.y.z -> x.(y+1).0`.
    Minor,
    /// `x.y.z -> (x+1).0.0`.
    Major,
}

impl Bump {
    /// Parse a bump name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "patch" => Some(Self::Patch),
            "minor" => Some(Self::Minor),
            "major" => Some(Self::Major),
            _ => None,
        }
    }
}

impl fmt::Display for Bump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// A parsed `MAJOR.MINOR.PATCH` triple.
///
/// Derived `Ord` compares major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemVer {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").expect("static pattern"))
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"v?(\d+\.\d+\.\d+)").expect("static pattern"))
}

impl SemVer {
    /// Create a version triple.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Return the bumped version.
    ///
    /// `None` when the bumped component would overflow.
    pub fn bump(&self, bump: Bump) -> Option<Self> {
        match bump {
            Bump::Patch => Some(Self::new(self.major, self.minor, self.patch.checked_add(1)?)),
            Bump::Minor => Some(Self::new(self.major, self.minor.checked_add(1)?, 0)),
            Bump::Major => Some(Self::new(self.major.checked_add(1)?, 0, 0)),
        }
    }
}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = version_pattern()
            .captures(s.trim())
            .ok_or_else(|| VersionError::Malformed(s.to_string()))?;
        let part = |i: usize| -> Result<u64, VersionError> {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| VersionError::Malformed(s.to_string()))
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compute the next version string.
///
/// The output never carries the `v` prefix.
pub fn next_version(current: &str, bump: Bump) -> Result<String, VersionError> {
    let parsed: SemVer = current.parse()?;
    parsed
        .bump(bump)
        .map(|v| v.to_string())
        .ok_or_else(|| VersionError::Malformed(current.to_string()))
}

/// Compute the next version, defaulting to the successor of [`DEFAULT_VERSION`].
pub fn next_or_default(current: &str, bump: Bump) -> String {
    match next_version(current, bump) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(current = %current, error = %e, "Malformed version, falling back to default");
            next_version(DEFAULT_VERSION, bump).unwrap_or_else(|_| DEFAULT_VERSION.to_string())
        }
    }
}

/// Extract a well-formed version from document metadata, `v` prefix stripped.
pub fn extract_version(document: &Document) -> Option<String> {
    document
        .metadata
        .version
        .parse::<SemVer>()
        .ok()
        .map(|v| v.to_string())
}

/// Extract a version from a file name such as `acme_triage_v0.1.2_01-12-2025-1430.json`.
pub fn version_from_filename(filename: &str) -> Option<String> {
    filename_pattern()
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
