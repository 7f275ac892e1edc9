//! Global module registry
//!
//! Deduplicating table keyed by the multihash hex digest. A digest is either
//! pending (declared by some manifest but not yet fetched, which counts it
//! toward progress totals), or resolved to the one package object
//! materialized for it. Resolution is write-once: later resolutions of the
//! same digest hand back the original package.

use crate::package::PackageId;
use rustc_hash::FxHashMap;

/// State of one digest in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlot {
    /// Declared by a manifest, not yet fetched
    Pending,

    /// Materialized; the cached tree carries a build script
    Resolved(PackageId),

    /// Materialized; a plain source package without a build script
    NonBuildPkg(PackageId),
}

impl CacheSlot {
    /// The package for either resolved state.
    pub fn package(&self) -> Option<PackageId> {
        match self {
            CacheSlot::Pending => None,
            CacheSlot::Resolved(id) | CacheSlot::NonBuildPkg(id) => Some(*id),
        }
    }
}

/// Digest-keyed dedup table for the whole resolve run.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    slots: FxHashMap<String, CacheSlot>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a digest as known-but-unfetched. No-op if already present.
    pub fn mark_pending(&mut self, hex_digest: &str) {
        self.slots
            .entry(hex_digest.to_string())
            .or_insert(CacheSlot::Pending);
    }

    pub fn get(&self, hex_digest: &str) -> Option<CacheSlot> {
        self.slots.get(hex_digest).copied()
    }

    /// Resolve a digest to a package.
    ///
    /// If the digest already resolved (another manifest listed the same
    /// hash), the original package wins and is returned; the caller drops
    /// its own candidate.
    pub fn resolve(
        &mut self,
        hex_digest: String,
        package: PackageId,
        has_build_script: bool,
    ) -> PackageId {
        let slot = self.slots.entry(hex_digest).or_insert(CacheSlot::Pending);
        if let Some(existing) = slot.package() {
            return existing;
        }
        *slot = if has_build_script {
            CacheSlot::Resolved(package)
        } else {
            CacheSlot::NonBuildPkg(package)
        };
        package
    }

    /// Number of known digests (pending and resolved), the progress total.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
