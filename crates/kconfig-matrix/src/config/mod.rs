//! Build definition loading.
//!
//! A build definition is a TOML document. The root document may name a single
//! parent with `extends = "<file>"`, and any table may pull in other files with
//! `imports = [...]`. Imported tables are merged first and the local table is
//! layered on top: nested tables merge key by key, everything else is replaced.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// File name picked up when scanning directories for extra module definitions.
pub const MODULE_FILE_NAME: &str = "kernel_config.toml";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn parse(path: impl Into<PathBuf>, src: &str) -> Result<Self> {
        let path = path.into();
        let value: Value = toml::from_str(src)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
        Ok(Self { path, value })
    }

    /// Directory the document lives in; relative paths inside it are rooted here.
    pub fn base_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_table()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn table_path(&self, path: &str) -> Option<&toml::value::Table> {
        self.value_path(path)?.as_table()
    }

    pub fn has_table_path(&self, path: &str) -> bool {
        self.table_path(path).is_some()
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        deserialize_value(v, path).map(Some)
    }
}

pub fn deserialize_value<T: DeserializeOwned>(v: &Value, what: &str) -> Result<T> {
    v.clone()
        .try_into()
        .map_err(|e| Error::msg(format!("failed to deserialize config at '{what}': {e}")))
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn take_imports(path: &Path, table: &mut toml::value::Table) -> Result<Vec<String>> {
    let Some(raw) = table.remove("imports") else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = raw else {
        return Err(Error::msg(format!(
            "invalid imports in {} (expected array of strings)",
            path.display()
        )));
    };
    let mut out = Vec::new();
    for v in items {
        let Some(s) = v.as_str() else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn inline_imports(file_path: &Path, value: &mut Value, stack: &mut HashSet<PathBuf>) -> Result<()> {
    let Value::Table(tbl) = value else {
        return Ok(());
    };

    let imports = take_imports(file_path, tbl)?;
    if !imports.is_empty() {
        let mut acc = Value::Table(Default::default());
        for imp in imports {
            let loaded = load_value(&resolve_ref_path(file_path, &imp), stack)?;
            merge(&mut acc, loaded);
        }
        merge(&mut acc, Value::Table(std::mem::take(tbl)));
        if let Value::Table(merged) = acc {
            *tbl = merged;
        }
    }

    for (_, v) in tbl.iter_mut() {
        inline_imports(file_path, v, stack)?;
    }
    Ok(())
}

fn load_value(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(tbl) = value.as_table_mut()
        && let Some(ext) = tbl.remove("extends")
    {
        let Some(ext) = ext.as_str() else {
            return Err(Error::msg(format!(
                "invalid extends in {} (expected string)",
                path.display()
            )));
        };
        out = load_value(&resolve_ref_path(path, ext), stack)?;
    }

    inline_imports(path, &mut value, stack)?;
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value(path, &mut stack)?;
    tracing::debug!(path = %path.display(), "loaded build definition");
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Walks `dirs` for [`MODULE_FILE_NAME`] files, sorted by path. `skip` is
/// left out so the root definition is not loaded twice when it sits in a
/// scanned directory.
pub fn discover(dirs: &[PathBuf], skip: Option<&Path>) -> Result<Vec<ConfigDoc>> {
    let skip = skip.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    let mut found = Vec::<PathBuf>::new();
    for dir in dirs {
        if !dir.is_dir() {
            return Err(Error::msg(format!(
                "scan directory {} does not exist",
                dir.display()
            )));
        }
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry =
                entry.map_err(|e| Error::msg(format!("failed to scan {}: {e}", dir.display())))?;
            if !entry.file_type().is_file() || entry.file_name() != MODULE_FILE_NAME {
                continue;
            }
            let p = entry.into_path();
            let can = p.canonicalize().unwrap_or_else(|_| p.clone());
            if skip.as_ref() == Some(&can) {
                continue;
            }
            found.push(p);
        }
    }
    found.sort();
    found.dedup();

    let mut docs = Vec::with_capacity(found.len());
    for p in found {
        docs.push(load(&p)?);
    }
    tracing::debug!(count = docs.len(), "discovered module definitions");
    Ok(docs)
}
