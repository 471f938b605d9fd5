use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_root_dir() -> String {
    ".".into()
}

fn default_out_dir() -> String {
    "out".into()
}

fn default_ninja_file() -> String {
    "build.ninja".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    #[serde(default = "default_ninja_file")]
    pub ninja_file: String,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            out_dir: default_out_dir(),
            ninja_file: default_ninja_file(),
            paths: BTreeMap::new(),
        }
    }
}

/// Path-resolution capability handed to module types.
///
/// Source paths are resolved against the declaring module's directory; output
/// and generated paths are owned per module so instances never collide.
pub trait PathResolver {
    /// Directory a module's sources are relative to: `dir` (under the
    /// workspace root) when given, otherwise the declaring document's directory.
    fn module_dir(&self, doc_dir: &Path, dir: Option<&str>) -> Result<PathBuf>;
    fn module_src(&self, module_dir: &Path, raw: &str) -> Result<PathBuf>;
    fn module_out(&self, module: &str) -> PathBuf;
    fn module_gen(&self, module: &str) -> PathBuf;
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub ninja_file: PathBuf,
    pub named_dirs: BTreeMap<String, PathBuf>,
}

impl PathResolver for WorkspacePaths {
    fn module_dir(&self, doc_dir: &Path, dir: Option<&str>) -> Result<PathBuf> {
        match dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => resolve_under(&self.root, d),
            None => Ok(normalize(&absolutize(doc_dir)?)),
        }
    }

    // - `@alias/...` expands from `[workspace.paths]` (plus `root` and `out`)
    // - absolute paths are used as-is
    // - relative paths are rooted at the module directory
    fn module_src(&self, module_dir: &Path, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg("empty source path"));
        }

        if let Some(after_at) = raw.strip_prefix('@') {
            let (alias, rest) = match after_at.split_once('/') {
                Some((a, r)) => (a.trim(), Some(r)),
                None => (after_at.trim(), None),
            };
            if alias.is_empty() {
                return Err(Error::msg(format!("invalid alias path '{raw}'")));
            }
            let base = self.named_dirs.get(alias).ok_or_else(|| {
                let known = self.named_dirs.keys().cloned().collect::<Vec<_>>().join(", ");
                Error::msg(format!(
                    "unknown workspace path alias '{alias}' in '{raw}' (known: {known})"
                ))
            })?;
            return match rest.filter(|r| !r.is_empty()) {
                Some(r) => resolve_under(base, r),
                None => Ok(base.clone()),
            };
        }

        let pb = Path::new(raw);
        if pb.is_absolute() {
            return Ok(normalize(pb));
        }
        resolve_under(module_dir, raw)
    }

    fn module_out(&self, module: &str) -> PathBuf {
        self.out_dir.join(module)
    }

    fn module_gen(&self, module: &str) -> PathBuf {
        self.out_dir.join(module).join("gen")
    }
}

/// Resolves the workspace layout. `def_dir` is the directory of the root
/// build definition; `root_dir` is relative to it.
pub fn load_paths(cfg: &WorkspaceConfig, def_dir: &Path) -> Result<WorkspacePaths> {
    let base = absolutize(def_dir)?;
    let root_dir = cfg.root_dir.trim();
    if root_dir.is_empty() {
        return Err(Error::msg("workspace.root_dir is empty"));
    }
    let root = normalize(&base.join(root_dir));
    let out_dir = resolve_user_dir(&root, &cfg.out_dir, "workspace.out_dir")?;
    let ninja_file = resolve_user_dir(&out_dir, &cfg.ninja_file, "workspace.ninja_file")?;
    let named_dirs = resolve_named_dirs(&root, &out_dir, &cfg.paths)?;
    Ok(WorkspacePaths {
        root,
        out_dir,
        ninja_file,
        named_dirs,
    })
}

fn resolve_user_dir(base: &Path, p: &str, what: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::msg(format!("{what} is empty")));
    }
    let pb = Path::new(p);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!("invalid {what} '{p}' (contains '..')")));
    }
    Ok(normalize(&base.join(pb)))
}

fn resolve_named_dirs(
    root: &Path,
    out_dir: &Path,
    paths: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, PathBuf>> {
    let mut out = BTreeMap::<String, PathBuf>::new();
    out.insert("root".into(), root.to_path_buf());
    out.insert("out".into(), out_dir.to_path_buf());

    for (name, raw) in paths {
        let key = name.trim();
        if key.is_empty() {
            return Err(Error::msg("workspace.paths has an empty key"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::msg(format!(
                "workspace.paths key '{key}' is invalid (allowed: a-zA-Z0-9_-)"
            )));
        }
        if key == "root" || key == "out" {
            return Err(Error::msg(format!("workspace.paths key '{key}' is reserved")));
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg(format!("workspace.paths.{key} is empty")));
        }
        out.insert(key.to_string(), normalize(&root.join(raw)));
    }

    Ok(out)
}

fn resolve_under(base: &Path, rel: &str) -> Result<PathBuf> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Err(Error::msg("empty relative path"));
    }
    let rel_pb = Path::new(rel);
    if rel_pb
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::msg(format!(
            "invalid relative path '{rel}' (contains '..')"
        )));
    }
    Ok(normalize(&base.join(rel_pb)))
}

fn absolutize(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    Ok(cwd.join(p))
}

/// Lexical normalization: drops `.` and folds `..` without touching the
/// filesystem, so generated paths are stable whether or not they exist yet.
pub fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
