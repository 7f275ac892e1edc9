//! Vela Package Acquisition Library
//!
//! This crate provides the dependency subsystem of the Vela build system:
//! - Recursive dependency resolution from a root vela.toml
//! - Fetching from local paths, `file://`, and `http(s)://` archives
//! - Package content hashing (multihash identifiers)
//! - Global content-addressed cache with atomic insertion
//! - Dependency-source generation for the build runner

pub mod cache;
pub mod digest;
pub mod emit;
pub mod fetch;
pub mod graph;
pub mod hasher;
pub mod manifest;
pub mod package;
pub mod progress;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod unpack;

pub use cache::{Cache, CacheError};
pub use digest::{ContentDigest, DigestError, HEX_DIGEST_LEN, MULTIHASH_PREFIX};
pub use emit::{SourceEmitter, DEPS_SOURCE_BASENAME};
pub use fetch::{FetchError, FetchLocation, FileType, HttpClient, ReadableResource};
pub use graph::dotted_name;
pub use hasher::{hash_package_dir, normalize_path, HashError, WorkerPool};
pub use manifest::{
    Dependency, ManifestError, PackageInfo, PackageManifest, MANIFEST_BASENAME,
};
pub use package::{Package, PackageGraph, PackageId, BUILD_SCRIPT_BASENAME};
pub use progress::{ByteUnit, NullProgress, ProgressReader, ProgressSink};
pub use registry::{CacheSlot, ModuleRegistry};
pub use report::Report;
pub use resolver::{Resolution, ResolveError, Resolver};
pub use unpack::{unpack_resource, UnpackError};
