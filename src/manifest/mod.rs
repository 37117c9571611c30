// src/manifest/mod.rs

//! Module manifest parsing
//!
//! A manifest is a set of `Header: value` lines (long values may continue
//! on lines starting with a single space, JAR style). The headers consumed
//! by the runtime are the identity headers (`Bundle-SymbolicName`,
//! `Bundle-Version`), the dependency headers (`Import-Package`,
//! `Export-Package`, `Require-Bundle`, `Fragment-Host`) and the activation
//! header (`Bundle-ActivationPolicy` with `include:=`/`exclude:=`
//! directives). Unknown headers are retained verbatim.

mod parser;

pub use parser::{Clause, parse_clauses};

use crate::error::{Error, Result};
use crate::version::{VersionRange, parse_version};
use semver::Version;
use std::collections::BTreeMap;

pub const HEADER_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
pub const HEADER_VERSION: &str = "Bundle-Version";
pub const HEADER_FRAGMENT_HOST: &str = "Fragment-Host";
pub const HEADER_IMPORT_PACKAGE: &str = "Import-Package";
pub const HEADER_EXPORT_PACKAGE: &str = "Export-Package";
pub const HEADER_REQUIRE_BUNDLE: &str = "Require-Bundle";
pub const HEADER_ACTIVATION_POLICY: &str = "Bundle-ActivationPolicy";

const ATTR_VERSION: &str = "version";
const ATTR_BUNDLE_VERSION: &str = "bundle-version";
const DIRECTIVE_INCLUDE: &str = "include";
const DIRECTIVE_EXCLUDE: &str = "exclude";
const POLICY_LAZY: &str = "lazy";

/// A package import requirement: name plus acceptable version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDeclaration {
    pub package: String,
    pub range: VersionRange,
}

/// A package export declaration: name plus exported version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDeclaration {
    pub package: String,
    pub version: Version,
}

/// A required-module declaration: symbolic name plus version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireDeclaration {
    pub symbolic_name: String,
    pub range: VersionRange,
}

/// A fragment's host requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequirement {
    pub symbolic_name: String,
    pub range: VersionRange,
}

/// When the module's entry point runs relative to start
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActivationPolicy {
    /// Entry point runs during `start`
    #[default]
    Eager,
    /// Entry point deferred until a matching class load
    Lazy {
        /// Package patterns that trigger activation (empty = all)
        include: Vec<String>,
        /// Package patterns that never trigger activation
        exclude: Vec<String>,
    },
}

impl ActivationPolicy {
    /// Returns true for the lazy policy
    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy { .. })
    }

    /// Whether loading `class_name` triggers lazy activation
    ///
    /// Patterns match the class's package: an exact package name, or a
    /// `pkg.prefix.*` wildcard. Exclusions win over inclusions.
    pub fn triggers_on(&self, class_name: &str) -> bool {
        let Self::Lazy { include, exclude } = self else {
            return false;
        };

        let package = class_name.rsplit_once('.').map(|(p, _)| p).unwrap_or("");

        if exclude.iter().any(|p| pattern_matches(p, package)) {
            return false;
        }
        include.is_empty() || include.iter().any(|p| pattern_matches(p, package))
    }
}

fn pattern_matches(pattern: &str, package: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        package == prefix || package.starts_with(&format!("{}.", prefix))
    } else if pattern == "*" {
        true
    } else {
        pattern == package
    }
}

/// A fully parsed module manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Raw header map, preserved for diagnostics
    pub headers: BTreeMap<String, String>,
    pub symbolic_name: String,
    pub version: Version,
    pub imports: Vec<ImportDeclaration>,
    pub exports: Vec<ExportDeclaration>,
    pub requires: Vec<RequireDeclaration>,
    pub fragment_host: Option<HostRequirement>,
    pub activation: ActivationPolicy,
}

impl Manifest {
    /// Parse manifest text into typed declarations
    pub fn parse(text: &str) -> Result<Self> {
        let headers = parse_headers(text)?;
        Self::from_headers(headers)
    }

    /// Build a manifest from an already-assembled header map
    pub fn from_headers(headers: BTreeMap<String, String>) -> Result<Self> {
        let symbolic_name = {
            let raw = headers.get(HEADER_SYMBOLIC_NAME).ok_or_else(|| {
                Error::MalformedManifest(format!("missing {}", HEADER_SYMBOLIC_NAME))
            })?;
            // Directives like `singleton:=true` may trail the name.
            let clauses = parse_clauses(raw)?;
            clauses
                .first()
                .and_then(|c| c.paths.first())
                .cloned()
                .ok_or_else(|| {
                    Error::MalformedManifest(format!("empty {}", HEADER_SYMBOLIC_NAME))
                })?
        };

        let version = match headers.get(HEADER_VERSION) {
            Some(raw) => parse_version(raw)?,
            None => Version::new(0, 0, 0),
        };

        let imports = match headers.get(HEADER_IMPORT_PACKAGE) {
            Some(raw) => parse_imports(raw)?,
            None => Vec::new(),
        };
        let exports = match headers.get(HEADER_EXPORT_PACKAGE) {
            Some(raw) => parse_exports(raw)?,
            None => Vec::new(),
        };
        let requires = match headers.get(HEADER_REQUIRE_BUNDLE) {
            Some(raw) => parse_requires(raw)?,
            None => Vec::new(),
        };
        let fragment_host = match headers.get(HEADER_FRAGMENT_HOST) {
            Some(raw) => Some(parse_fragment_host(raw)?),
            None => None,
        };
        let activation = match headers.get(HEADER_ACTIVATION_POLICY) {
            Some(raw) => parse_activation_policy(raw)?,
            None => ActivationPolicy::Eager,
        };

        Ok(Self {
            headers,
            symbolic_name,
            version,
            imports,
            exports,
            requires,
            fragment_host,
            activation,
        })
    }

    /// Whether this module is a fragment
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }
}

/// Parse `Header: value` lines with space-prefixed continuations
fn parse_headers(text: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(stripped) = line.strip_prefix(' ') {
            // Continuation of the previous header value
            let key = current.clone().ok_or_else(|| {
                Error::MalformedManifest(format!("continuation without header: '{}'", line))
            })?;
            let value: &mut String = headers.get_mut(&key).expect("current header exists");
            value.push_str(stripped.trim_end());
            continue;
        }

        let (key, value) = line.split_once(':').ok_or_else(|| {
            Error::MalformedManifest(format!("line without ':' separator: '{}'", line))
        })?;
        let key = key.trim().to_string();
        headers.insert(key.clone(), value.trim().to_string());
        current = Some(key);
    }

    Ok(headers)
}

fn parse_imports(raw: &str) -> Result<Vec<ImportDeclaration>> {
    let mut imports = Vec::new();
    for clause in parse_clauses(raw)? {
        let range = match clause.attribute(ATTR_VERSION) {
            Some(v) => VersionRange::parse(v)?,
            None => VersionRange::any(),
        };
        for package in &clause.paths {
            imports.push(ImportDeclaration {
                package: package.clone(),
                range: range.clone(),
            });
        }
    }
    Ok(imports)
}

fn parse_exports(raw: &str) -> Result<Vec<ExportDeclaration>> {
    let mut exports = Vec::new();
    for clause in parse_clauses(raw)? {
        let version = match clause.attribute(ATTR_VERSION) {
            Some(v) => parse_version(v)?,
            None => Version::new(0, 0, 0),
        };
        for package in &clause.paths {
            exports.push(ExportDeclaration {
                package: package.clone(),
                version: version.clone(),
            });
        }
    }
    Ok(exports)
}

fn parse_requires(raw: &str) -> Result<Vec<RequireDeclaration>> {
    let mut requires = Vec::new();
    for clause in parse_clauses(raw)? {
        let range = match clause.attribute(ATTR_BUNDLE_VERSION) {
            Some(v) => VersionRange::parse(v)?,
            None => VersionRange::any(),
        };
        for name in &clause.paths {
            requires.push(RequireDeclaration {
                symbolic_name: name.clone(),
                range: range.clone(),
            });
        }
    }
    Ok(requires)
}

fn parse_fragment_host(raw: &str) -> Result<HostRequirement> {
    let clauses = parse_clauses(raw)?;
    let clause = clauses.first().ok_or_else(|| {
        Error::MalformedManifest(format!("empty {}", HEADER_FRAGMENT_HOST))
    })?;
    let symbolic_name = clause
        .paths
        .first()
        .cloned()
        .ok_or_else(|| Error::MalformedManifest(format!("{} has no host", HEADER_FRAGMENT_HOST)))?;
    let range = match clause.attribute(ATTR_BUNDLE_VERSION) {
        Some(v) => VersionRange::parse(v)?,
        None => VersionRange::any(),
    };
    Ok(HostRequirement {
        symbolic_name,
        range,
    })
}

fn parse_activation_policy(raw: &str) -> Result<ActivationPolicy> {
    let clauses = parse_clauses(raw)?;
    let clause = clauses.first().ok_or_else(|| {
        Error::MalformedManifest(format!("empty {}", HEADER_ACTIVATION_POLICY))
    })?;

    match clause.paths.first().map(String::as_str) {
        Some(POLICY_LAZY) => {
            let split = |v: Option<&str>| -> Vec<String> {
                v.map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default()
            };
            Ok(ActivationPolicy::Lazy {
                include: split(clause.directive(DIRECTIVE_INCLUDE)),
                exclude: split(clause.directive(DIRECTIVE_EXCLUDE)),
            })
        }
        Some(other) => Err(Error::MalformedManifest(format!(
            "unknown activation policy '{}'",
            other
        ))),
        None => Err(Error::MalformedManifest(format!(
            "empty {}",
            HEADER_ACTIVATION_POLICY
        ))),
    }
}
