//! Recursive dependency resolution
//!
//! The driver behind a build's dependency step: starting from the root
//! project directory it reads each package's manifest, satisfies every
//! dependency from the content-addressed cache or by fetching, verifies
//! content hashes, recurses into resolved packages, and streams the
//! dependency source the build runner imports.
//!
//! Resolution is single-threaded and sequential in manifest order;
//! parallelism lives inside the per-file hashing. That keeps cache races,
//! diagnostics, and the emitted source deterministic.

use crate::cache::{Cache, CacheError};
use crate::digest::ContentDigest;
use crate::emit::{SourceEmitter, DEPS_SOURCE_BASENAME};
use crate::fetch::{FetchLocation, FileType, HttpClient, ReadableResource};
use crate::hasher::{self, HashError, WorkerPool};
use crate::manifest::{self, Dependency, ManifestError};
use crate::package::{Package, PackageGraph, PackageId};
use crate::progress::ProgressSink;
use crate::registry::ModuleRegistry;
use crate::report::Report;
use crate::unpack::{self, UnpackError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by a resolve run
#[derive(Debug, Error)]
pub enum ResolveError {
    /// User-attributable failure; the details are in the report
    #[error("package fetch failed")]
    PackageFetchFailed,

    /// Package tree could not be hashed
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Archive could not be unpacked
    #[error(transparent)]
    Unpack(#[from] UnpackError),

    /// Cache operation failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Manifest could not be read
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a successful resolve run.
#[derive(Debug)]
pub struct Resolution {
    /// The root project package
    pub root: PackageId,

    /// Synthetic package holding every distinct dependency under its hash
    pub deps_pkg: PackageId,

    /// The generated dependency source
    pub source: String,

    /// Cache directory the generated source was stored in
    pub source_pkg_dir: PathBuf,
}

/// Recursive dependency resolver.
pub struct Resolver<'a> {
    cache: &'a Cache,
    http: &'a HttpClient,
    pool: WorkerPool,
    progress: &'a dyn ProgressSink,
    report: Report,
    graph: PackageGraph,
    registry: ModuleRegistry,
    emitter: SourceEmitter,
    deps_pkg: Option<PackageId>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver with one hashing worker per available core.
    pub fn new(cache: &'a Cache, http: &'a HttpClient, progress: &'a dyn ProgressSink) -> Self {
        Self::with_pool(cache, http, WorkerPool::with_default_parallelism(), progress)
    }

    /// Create a resolver with a caller-provided worker pool.
    pub fn with_pool(
        cache: &'a Cache,
        http: &'a HttpClient,
        pool: WorkerPool,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Resolver {
            cache,
            http,
            pool,
            progress,
            report: Report::new(),
            graph: PackageGraph::new(),
            registry: ModuleRegistry::new(),
            emitter: SourceEmitter::new(),
            deps_pkg: None,
        }
    }

    /// Diagnostics collected so far. Populated on
    /// [`ResolveError::PackageFetchFailed`].
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn graph(&self) -> &PackageGraph {
        &self.graph
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Resolve the dependency graph of the project rooted at `root_dir`.
    pub fn run(&mut self, root_dir: &Path) -> Result<Resolution, ResolveError> {
        let root_dir = std::fs::canonicalize(root_dir)?;
        let root = self.graph.add(Package::from_root_dir(root_dir));

        let deps_pkg = self
            .graph
            .add(Package::synthetic(self.cache.root().to_path_buf()));
        self.deps_pkg = Some(deps_pkg);

        let root_deps = self.resolve_deps(root, None)?;

        let emitter = std::mem::take(&mut self.emitter);
        let source = emitter.finish(&root_deps);
        let source_pkg_dir = self.cache.store_file_pkg(DEPS_SOURCE_BASENAME, &source)?;

        Ok(Resolution {
            root,
            deps_pkg,
            source,
            source_pkg_dir,
        })
    }

    /// Resolve the direct dependencies of one package, recursing into each.
    ///
    /// `this_hash` is the package's own digest when it is a fetched package;
    /// the root has none. Returns the `(name, hash)` pairs for the package's
    /// entry in the generated source.
    fn resolve_deps(
        &mut self,
        pkg: PackageId,
        this_hash: Option<&str>,
    ) -> Result<Vec<(String, String)>, ResolveError> {
        let pkg_dir = self.graph.root_dir(pkg).to_path_buf();

        let Some(loaded) = manifest::load(&pkg_dir)? else {
            // No manifest means no dependencies, not an error.
            self.emit_entry(pkg, this_hash, &[]);
            return Ok(Vec::new());
        };

        let file_id = self.report.add_file(&loaded.path, loaded.source.clone());

        let parsed = match loaded.parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                let span = err.span().unwrap_or(0..0);
                self.report
                    .error(file_id, span, format!("invalid manifest: {}", err.message()));
                return Err(ResolveError::PackageFetchFailed);
            }
        };

        let validation_errors = parsed.validate();
        if !validation_errors.is_empty() {
            for err in validation_errors {
                match err.span {
                    Some(span) => self.report.error(file_id, span, err.message),
                    None => self.report.error_unanchored(err.message),
                }
            }
            return Err(ResolveError::PackageFetchFailed);
        }

        // Pre-scan: count every well-formed declared hash toward the
        // progress total before any fetch work starts.
        for dep in parsed.dependencies.values() {
            if let Some(hex) = dep.hash_hex() {
                if ContentDigest::is_well_formed_hex(hex) {
                    self.registry.mark_pending(hex);
                }
            }
        }
        self.progress.estimated_total(self.registry.len());

        let mut pairs = Vec::with_capacity(parsed.dependencies.len());
        for (name, dep) in &parsed.dependencies {
            let (child, child_hex) = match self.get_cached(dep)? {
                Some(found) => found,
                None => self.fetch_and_unpack(file_id, dep, &pkg_dir)?,
            };

            self.resolve_deps(child, Some(&child_hex))?;

            self.graph.add_child(pkg, name, child);
            self.add_to_deps_pkg(&child_hex, child);
            pairs.push((name.clone(), child_hex));
            self.progress.complete_one();
        }

        self.emit_entry(pkg, this_hash, &pairs);
        Ok(pairs)
    }

    /// Look a dependency up in the content-addressed cache.
    ///
    /// Returns `None` when the dependency has no declared hash (forcing the
    /// fetch path, which reports the missing hash) or when the cache has no
    /// entry for it.
    fn get_cached(
        &mut self,
        dep: &Dependency,
    ) -> Result<Option<(PackageId, String)>, ResolveError> {
        let Some(hex) = dep.hash_hex() else {
            return Ok(None);
        };

        let dir = self.cache.package_dir(hex);
        if !dir.is_dir() {
            return Ok(None);
        }

        if let Some(slot) = self.registry.get(hex) {
            if let Some(id) = slot.package() {
                return Ok(Some((id, hex.to_string())));
            }
        }

        debug!(hash = hex, "cache hit");
        let package = Package::from_root_dir(dir);
        let has_build_script = package.has_build_script;
        let id = self.graph.add(package);
        let id = self.registry.resolve(hex.to_string(), id, has_build_script);
        Ok(Some((id, hex.to_string())))
    }

    /// Fetch, unpack, hash, and verify one dependency.
    fn fetch_and_unpack(
        &mut self,
        file_id: usize,
        dep: &Dependency,
        pkg_dir: &Path,
    ) -> Result<(PackageId, String), ResolveError> {
        let location = match FetchLocation::from_dependency(dep, pkg_dir) {
            Ok(location) => location,
            Err(err) => {
                self.report
                    .error(file_id, dep.location_span(), err.to_string());
                return Err(ResolveError::PackageFetchFailed);
            }
        };

        let resource = match ReadableResource::open(location, self.http) {
            Ok(resource) => resource,
            Err(err) => {
                self.report
                    .error(file_id, dep.location_span(), err.to_string());
                return Err(ResolveError::PackageFetchFailed);
            }
        };

        let (digest, root_dir) = match resource {
            // An already-unpacked local tree is hashed in place and used
            // where it lives.
            ReadableResource::Directory { path } => {
                let digest = hasher::hash_package_dir(&self.pool, &path)?;
                (digest, path)
            }
            resource => {
                let file_type = match FileType::classify(&resource) {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        self.report
                            .error(file_id, dep.location_span(), err.to_string());
                        return Err(ResolveError::PackageFetchFailed);
                    }
                };

                let (tmp_sub_path, tmp_path) = self.cache.create_tmp_dir()?;

                if let Err(err) =
                    unpack::unpack_resource(resource, file_type, &tmp_path, self.progress)
                {
                    self.cache.cleanup_tmp_dir(&tmp_sub_path);
                    return Err(err.into());
                }

                let digest = match hasher::hash_package_dir(&self.pool, &tmp_path) {
                    Ok(digest) => digest,
                    Err(err) => {
                        self.cache.cleanup_tmp_dir(&tmp_sub_path);
                        return Err(err.into());
                    }
                };

                let hex = digest.to_hex();
                self.cache
                    .rename_tmp_into_cache(&tmp_sub_path, &Cache::package_sub_path(&hex))?;
                (digest, self.cache.package_dir(&hex))
            }
        };

        let hex = digest.to_hex();
        match dep.hash_hex() {
            None => {
                self.report.error_with_notes(
                    file_id,
                    dep.location_span(),
                    "dependency is missing hash field",
                    vec![format!("expected hash = \"{hex}\"")],
                );
                return Err(ResolveError::PackageFetchFailed);
            }
            Some(declared) if declared != hex => {
                let span = dep
                    .hash
                    .as_ref()
                    .map(|h| h.span())
                    .unwrap_or_else(|| dep.location_span());
                self.report.error(
                    file_id,
                    span,
                    format!("hash mismatch: expected {declared}, found {hex}"),
                );
                return Err(ResolveError::PackageFetchFailed);
            }
            Some(_) => {}
        }

        let package = Package::from_root_dir(root_dir);
        let has_build_script = package.has_build_script;
        let id = self.graph.add(package);
        // A resolved slot for this digest wins; our candidate is dropped.
        let id = self.registry.resolve(hex.clone(), id, has_build_script);
        Ok((id, hex))
    }

    fn emit_entry(&mut self, pkg: PackageId, this_hash: Option<&str>, pairs: &[(String, String)]) {
        if let Some(hex) = this_hash {
            let package = self.graph.get(pkg);
            self.emitter
                .emit_package(hex, &package.root_dir, package.has_build_script, pairs);
        }
    }

    /// Record a resolved dependency in the deps-package.
    ///
    /// One entry per distinct hash; a hash that is already present must map
    /// to the same package.
    fn add_to_deps_pkg(&mut self, hex: &str, child: PackageId) {
        let deps_pkg = self.deps_pkg.expect("run() sets the deps package");
        let table = &mut self.graph.get_mut(deps_pkg).table;
        match table.get(hex) {
            Some(&existing) => {
                assert_eq!(existing, child, "one hash must map to one package");
            }
            None => {
                table.insert(hex.to_string(), child);
            }
        }
    }
}
