// src/version/mod.rs

//! Version handling and range satisfaction for module dependencies
//!
//! Module versions follow a lenient `major[.minor[.micro[.qualifier]]]`
//! format normalized onto `semver::Version`. Import and require constraints
//! use interval ranges with the usual bracket notation: `[1.0,2.0)` means
//! 1.0.0 inclusive up to but excluding 2.0.0. A bare version string is a
//! lower bound with no upper bound.

use crate::error::{Error, Result};
use semver::Version;
use std::fmt;

/// Parse a lenient module version string
///
/// Missing components default to zero; a fourth dotted segment is treated
/// as an opaque qualifier and carried as semver build metadata. Qualifiers
/// are significant in ordering: a qualified version sorts above the same
/// unqualified version, and two qualifiers compare as strings. `semver`'s
/// `Ord` on build metadata gives exactly this.
///
/// Examples:
/// - "1" → 1.0.0
/// - "1.2" → 1.2.0
/// - "1.2.3" → 1.2.3
/// - "1.2.3.beta" → 1.2.3+beta, which sorts above 1.2.3
pub fn parse_version(s: &str) -> Result<Version> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidVersion("empty version string".to_string()));
    }

    let mut parts = s.splitn(4, '.');
    let major = parse_component(parts.next().unwrap_or("0"), s)?;
    let minor = parse_component(parts.next().unwrap_or("0"), s)?;
    let micro = parse_component(parts.next().unwrap_or("0"), s)?;

    let mut version = Version::new(major, minor, micro);
    if let Some(qualifier) = parts.next() {
        if qualifier.is_empty() {
            return Err(Error::InvalidVersion(format!(
                "empty qualifier in version '{}'",
                s
            )));
        }
        version.build = semver::BuildMetadata::new(qualifier)
            .map_err(|e| Error::InvalidVersion(format!("bad qualifier in '{}': {}", s, e)))?;
    }

    Ok(version)
}

fn parse_component(part: &str, whole: &str) -> Result<u64> {
    part.trim().parse::<u64>().map_err(|e| {
        Error::InvalidVersion(format!("invalid component in version '{}': {}", whole, e))
    })
}

/// An interval version range with inclusive or exclusive endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub floor: Version,
    pub floor_inclusive: bool,
    pub ceiling: Option<Version>,
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// The range accepting every version
    pub fn any() -> Self {
        Self {
            floor: Version::new(0, 0, 0),
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// A range accepting exactly one version
    pub fn exact(version: Version) -> Self {
        Self {
            floor: version.clone(),
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// Parse a version range string
    ///
    /// Examples:
    /// - "[1.0,2.0)" → 1.0.0 <= v < 2.0.0
    /// - "(1.0,2.0]" → 1.0.0 < v <= 2.0.0
    /// - "1.5" → v >= 1.5.0 (open upper bound)
    /// - "" → any version
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let starts_open = s.starts_with('(');
        let starts_closed = s.starts_with('[');
        if !starts_open && !starts_closed {
            // Bare version: lower bound only
            let floor = parse_version(s)?;
            return Ok(Self {
                floor,
                floor_inclusive: true,
                ceiling: None,
                ceiling_inclusive: false,
            });
        }

        let ends_open = s.ends_with(')');
        let ends_closed = s.ends_with(']');
        if !ends_open && !ends_closed {
            return Err(Error::InvalidVersion(format!(
                "unterminated version range '{}'",
                s
            )));
        }

        let inner = &s[1..s.len() - 1];
        let (lo, hi) = inner.split_once(',').ok_or_else(|| {
            Error::InvalidVersion(format!("version range '{}' missing comma", s))
        })?;

        Ok(Self {
            floor: parse_version(lo)?,
            floor_inclusive: starts_closed,
            ceiling: Some(parse_version(hi)?),
            ceiling_inclusive: ends_closed,
        })
    }

    /// Check whether a version falls inside this range
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            *version >= self.floor
        } else {
            *version > self.floor
        };
        if !above_floor {
            return false;
        }

        match &self.ceiling {
            None => true,
            Some(ceiling) if self.ceiling_inclusive => *version <= *ceiling,
            Some(ceiling) => *version < *ceiling,
        }
    }

    /// Check whether two ranges can be satisfied by a common version
    ///
    /// Conservative: only detects disjoint intervals, which is enough to
    /// reject contradictory requirements within one module.
    pub fn overlaps(&self, other: &VersionRange) -> bool {
        fn below(ceiling: &Option<Version>, inclusive: bool, floor: &Version, floor_inc: bool) -> bool {
            match ceiling {
                None => false,
                Some(c) => {
                    if inclusive && floor_inc {
                        c < floor
                    } else {
                        c <= floor
                    }
                }
            }
        }

        !below(&self.ceiling, self.ceiling_inclusive, &other.floor, other.floor_inclusive)
            && !below(&other.ceiling, other.ceiling_inclusive, &self.floor, self.floor_inclusive)
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None if self.floor == Version::new(0, 0, 0) => write!(f, "*"),
            None => write!(f, "{}", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' },
            ),
        }
    }
}
