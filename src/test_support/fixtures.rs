//! Test fixtures: package directories on disk.

use std::path::{Path, PathBuf};

use crate::core::dependency::Declaration;
use crate::core::dependency_id::DependencyId;
use crate::core::manifest::MANIFEST_NAME;
use crate::core::package::{InstallPackage, Mutability, Priority, ResolvedPackageSource};

/// A package to be written into a directory.
#[derive(Debug, Clone)]
pub struct PackageFixture {
    /// Package name.
    pub name: String,
    pub version: Option<String>,
    pub priority: Option<i32>,
    /// `(name, inline TOML value)` for `[dependencies]`.
    pub dependencies: Vec<(String, String)>,
    /// `(name, inline TOML value)` for `[dev-dependencies]`.
    pub dev_dependencies: Vec<(String, String)>,
    /// Resource files (path relative to the package root -> content).
    pub files: Vec<(String, String)>,
    /// Skip writing a manifest at all.
    pub bare: bool,
}

impl PackageFixture {
    /// Create a new package fixture with no files.
    pub fn new(name: impl Into<String>) -> Self {
        PackageFixture {
            name: name.into(),
            version: None,
            priority: None,
            dependencies: Vec::new(),
            dev_dependencies: Vec::new(),
            files: Vec::new(),
            bare: false,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn path_dep(mut self, name: &str, path: &str) -> Self {
        self.dependencies
            .push((name.to_string(), format!("{{ path = {:?} }}", path)));
        self
    }

    pub fn dev_path_dep(mut self, name: &str, path: &str) -> Self {
        self.dev_dependencies
            .push((name.to_string(), format!("{{ path = {:?} }}", path)));
        self
    }

    pub fn git_dep(mut self, name: &str, url: &str) -> Self {
        self.dependencies
            .push((name.to_string(), format!("{{ url = {:?} }}", url)));
        self
    }

    pub fn registry_dep(mut self, name: &str, constraint: &str) -> Self {
        self.dependencies
            .push((name.to_string(), format!("{:?}", constraint)));
        self
    }

    /// Add a resource file.
    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    /// A package without a manifest; its name comes from the declaration.
    pub fn bare(mut self) -> Self {
        self.bare = true;
        self
    }

    /// Render the manifest.
    pub fn manifest(&self) -> String {
        let mut out = format!("[package]\nname = {:?}\n", self.name);
        if let Some(version) = &self.version {
            out.push_str(&format!("version = {:?}\n", version));
        }
        if let Some(priority) = self.priority {
            out.push_str(&format!("priority = {}\n", priority));
        }
        for (section, deps) in [
            ("dependencies", &self.dependencies),
            ("dev-dependencies", &self.dev_dependencies),
        ] {
            if deps.is_empty() {
                continue;
            }
            out.push_str(&format!("\n[{}]\n", section));
            for (name, value) in deps {
                out.push_str(&format!("{} = {}\n", name, value));
            }
        }
        out
    }

    /// Write the package into `dir`, creating it.
    pub fn write(&self, dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        if !self.bare {
            std::fs::write(dir.join(MANIFEST_NAME), self.manifest()).unwrap();
        }
        for (path, content) in &self.files {
            let target = dir.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }
        dir.to_path_buf()
    }
}

/// A path declaration made from a manifest in `base`.
pub fn path_decl(base: &Path, name: &str, path: &str) -> Declaration {
    Declaration::new(name, base.join(MANIFEST_NAME)).with_path(path)
}

/// A ready-to-install package rooted at `root`.
pub fn install_package(name: &str, root: &Path, level: i32, order: usize) -> InstallPackage {
    let decl = Declaration::new(name, root.join(MANIFEST_NAME)).with_path(".");
    let id = DependencyId::compute(&decl, root).unwrap();
    InstallPackage {
        source: ResolvedPackageSource {
            package_name: name.to_string(),
            absolute_path: root.to_path_buf(),
            declared_path: root.display().to_string(),
            mutability: Mutability::Mutable,
            version: None,
            source_type: id.source_type(),
            resolution_source: None,
        },
        id,
        priority: Priority::new(level, order),
        include: Vec::new(),
    }
}
