//! Package objects and the package graph
//!
//! Every package in a resolve run lives in one arena ([`PackageGraph`]);
//! parent tables and the registry refer to packages by [`PackageId`], so
//! "same package" is id equality and teardown is dropping the graph.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Build script probed for at a package root.
pub const BUILD_SCRIPT_BASENAME: &str = "build.vela";

/// Index of a package in its [`PackageGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(u32);

/// A package root plus its local dependency table.
#[derive(Debug)]
pub struct Package {
    /// Absolute root of the package's source tree
    pub root_dir: PathBuf,

    /// Local dependency name → child package
    pub table: FxHashMap<String, PackageId>,

    /// Whether the root carries a `build.vela`
    pub has_build_script: bool,
}

impl Package {
    /// Create a package rooted at `root_dir`, probing for a build script.
    pub fn from_root_dir(root_dir: PathBuf) -> Self {
        let has_build_script = root_dir.join(BUILD_SCRIPT_BASENAME).is_file();
        Package {
            root_dir,
            table: FxHashMap::default(),
            has_build_script,
        }
    }

    /// Create a synthetic package with no on-disk probing.
    pub fn synthetic(root_dir: PathBuf) -> Self {
        Package {
            root_dir,
            table: FxHashMap::default(),
            has_build_script: false,
        }
    }
}

/// Arena owning every package of a resolve run.
#[derive(Debug, Default)]
pub struct PackageGraph {
    packages: Vec<Package>,
}

impl PackageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, package: Package) -> PackageId {
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(package);
        id
    }

    pub fn get(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0 as usize]
    }

    /// Record `child` in `parent`'s table under `name`.
    ///
    /// The same child may appear under different names in different parents.
    pub fn add_child(&mut self, parent: PackageId, name: &str, child: PackageId) {
        self.get_mut(parent).table.insert(name.to_string(), child);
    }

    pub fn root_dir(&self, id: PackageId) -> &Path {
        &self.get(id).root_dir
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
