//! Editing `Stowage.toml` in place.
//!
//! Edits go through `toml_edit` so comments, ordering and formatting of
//! everything else in the manifest survive.

use std::path::Path;

use anyhow::{Context, Result};
use toml_edit::{Array, DocumentMut, InlineTable, Item, Table, Value};

use crate::core::dependency::Declaration;
use crate::util::fs;

/// Tables a dependency may be declared in, current names first.
const DEPENDENCY_TABLES: &[&str] = &["dependencies", "dev-dependencies", "packages", "dev-packages"];

fn load(manifest_path: &Path) -> Result<DocumentMut> {
    let content = fs::read_optional(manifest_path)?.unwrap_or_default();
    content
        .parse()
        .with_context(|| format!("failed to parse {}", manifest_path.display()))
}

/// Add (or replace) a declaration under `[dependencies]`.
///
/// The manifest is created if it does not exist yet.
pub fn add_declaration(manifest_path: &Path, decl: &Declaration) -> Result<()> {
    let mut doc = load(manifest_path)?;

    if !doc.contains_key("dependencies") {
        doc["dependencies"] = Item::Table(Table::new());
    }
    let deps = doc["dependencies"]
        .as_table_mut()
        .with_context(|| format!("`dependencies` in {} is not a table", manifest_path.display()))?;
    deps[decl.name()] = declaration_item(decl);

    fs::write_atomic(manifest_path, doc.to_string())?;
    tracing::debug!("added `{}` to {}", decl.name(), manifest_path.display());
    Ok(())
}

/// Build the TOML value for a declaration.
fn declaration_item(decl: &Declaration) -> Item {
    let detailed = decl.url().is_some()
        || decl.path().is_some()
        || decl.base().is_some()
        || !decl.include().is_empty()
        || decl.priority().is_some();

    if !detailed {
        return toml_edit::value(decl.version().unwrap_or("*"));
    }

    let mut table = InlineTable::new();
    if let Some(url) = decl.url() {
        table.insert("url", url.into());
    }
    if let Some(reference) = decl.reference() {
        table.insert("ref", reference.into());
    }
    if let Some(path) = decl.path() {
        table.insert("path", path.to_string_lossy().replace('\\', "/").into());
    }
    if let Some(version) = decl.version() {
        table.insert("version", version.into());
    }
    if let Some(base) = decl.base() {
        table.insert("base", base.into());
    }
    if !decl.include().is_empty() {
        let include: Array = decl.include().iter().map(String::as_str).collect();
        table.insert("include", Value::Array(include));
    }
    if let Some(priority) = decl.priority() {
        table.insert("priority", i64::from(priority).into());
    }
    Item::Value(Value::InlineTable(table))
}

/// Remove a dependency from every dependency table.
///
/// Returns whether it was declared anywhere. A missing manifest is not an
/// error.
pub fn remove_declaration(manifest_path: &Path, name: &str) -> Result<bool> {
    if !manifest_path.is_file() {
        return Ok(false);
    }
    let mut doc = load(manifest_path)?;

    let mut removed = false;
    for table in DEPENDENCY_TABLES {
        if let Some(deps) = doc.get_mut(table).and_then(Item::as_table_like_mut) {
            removed |= deps.remove(name).is_some();
        }
    }

    if removed {
        fs::write_atomic(manifest_path, doc.to_string())?;
        tracing::debug!("removed `{}` from {}", name, manifest_path.display());
    }
    Ok(removed)
}

/// Give a package directory a manifest if it has none.
///
/// Returns whether one was created.
pub fn ensure_package_manifest(manifest_path: &Path, name: &str) -> Result<bool> {
    if manifest_path.exists() {
        return Ok(false);
    }
    let mut package = Table::new();
    package["name"] = toml_edit::value(name);
    let mut doc = DocumentMut::new();
    doc["package"] = Item::Table(package);

    fs::write_atomic(manifest_path, doc.to_string())?;
    Ok(true)
}
