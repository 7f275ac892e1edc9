//! Package manifest parsing (vela.toml)
//!
//! The manifest is the lockfile: every remote dependency is a pinned URL plus
//! a content hash. Parsing keeps the byte span of each interesting value so
//! diagnostics can point back into the file.

use crate::digest::{ContentDigest, HEX_DIGEST_LEN};
use indexmap::IndexMap;
use serde::Deserialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use toml::Spanned;

use thiserror::Error;

/// Manifest file name at a package root.
pub const MANIFEST_BASENAME: &str = "vela.toml";

/// Upper bound on manifest size.
pub const MANIFEST_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Errors that can occur while loading a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read the manifest file
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest exceeds the size cap
    #[error("manifest too large: {size} bytes (max: {MANIFEST_MAX_BYTES})")]
    TooLarge { size: u64 },
}

/// A validation problem, anchored at a span when one is known.
#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
    pub span: Option<Range<usize>>,
}

/// Package manifest (vela.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    /// Package metadata
    pub package: PackageInfo,

    /// Direct dependencies, in declaration order
    #[serde(default)]
    pub dependencies: IndexMap<String, Dependency>,
}

/// Package information
#[derive(Debug, Clone, Deserialize)]
pub struct PackageInfo {
    /// Package name
    pub name: String,

    /// Package version
    pub version: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// A single dependency declaration.
///
/// Exactly one of `url` and `path` must be present; `hash` is required for
/// reproducible fetches but its absence is diagnosed later, with the computed
/// value as a suggestion.
#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    /// Remote location (`http://`, `https://`, or `file://`)
    #[serde(default)]
    pub url: Option<Spanned<String>>,

    /// Local path, relative to the declaring package root
    #[serde(default)]
    pub path: Option<Spanned<String>>,

    /// Expected multihash hex digest of the package contents
    #[serde(default)]
    pub hash: Option<Spanned<String>>,
}

/// Where a dependency comes from.
#[derive(Debug, Clone, Copy)]
pub enum DependencyLocation<'a> {
    Url(&'a Spanned<String>),
    Path(&'a Spanned<String>),
}

impl Dependency {
    /// The declared location.
    ///
    /// Only meaningful after [`PackageManifest::validate`] has passed; a
    /// manifest that declares both sources is rejected there.
    pub fn location(&self) -> DependencyLocation<'_> {
        match (&self.url, &self.path) {
            (Some(url), _) => DependencyLocation::Url(url),
            (None, Some(path)) => DependencyLocation::Path(path),
            (None, None) => unreachable!("validated dependency has a location"),
        }
    }

    /// Span of the location value, for diagnostics.
    pub fn location_span(&self) -> Range<usize> {
        match self.location() {
            DependencyLocation::Url(s) => s.span(),
            DependencyLocation::Path(s) => s.span(),
        }
    }

    /// The declared hash as a hex string, if any.
    pub fn hash_hex(&self) -> Option<&str> {
        self.hash.as_ref().map(|h| h.get_ref().as_str())
    }
}

impl PackageManifest {
    /// Parse a manifest from its source text.
    ///
    /// Syntax errors carry a span; the caller turns them into diagnostics
    /// against the source.
    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Semantic validation: each dependency has exactly one source and a
    /// well-formed hash when one is declared.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (name, dep) in &self.dependencies {
            match (&dep.url, &dep.path) {
                (Some(url), Some(_)) => errors.push(ValidationError {
                    message: format!(
                        "dependency \"{name}\" declares both url and path; pick one"
                    ),
                    span: Some(url.span()),
                }),
                (None, None) => errors.push(ValidationError {
                    message: format!("dependency \"{name}\" is missing a url or path"),
                    span: None,
                }),
                _ => {}
            }

            if let Some(hash) = &dep.hash {
                if !ContentDigest::is_well_formed_hex(hash.get_ref()) {
                    errors.push(ValidationError {
                        message: format!(
                            "invalid hash: expected {HEX_DIGEST_LEN} hex characters beginning \"1220\""
                        ),
                        span: Some(hash.span()),
                    });
                }
            }
        }

        errors
    }
}

/// Manifest source text and parse result for one package directory.
pub struct LoadedManifest {
    pub path: PathBuf,
    pub source: String,
    pub parsed: Result<PackageManifest, toml::de::Error>,
}

/// Read the manifest of the package rooted at `dir`.
///
/// A missing manifest is not an error; it means the package has no
/// dependencies. Parse failures are returned inside [`LoadedManifest`] so the
/// caller can attach diagnostics to the source text.
pub fn load(dir: &Path) -> Result<Option<LoadedManifest>, ManifestError> {
    let path = dir.join(MANIFEST_BASENAME);

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if metadata.len() > MANIFEST_MAX_BYTES {
        return Err(ManifestError::TooLarge {
            size: metadata.len(),
        });
    }

    let source = std::fs::read_to_string(&path)?;
    let parsed = PackageManifest::parse(&source);
    Ok(Some(LoadedManifest {
        path,
        source,
        parsed,
    }))
}
