//! Static build rules and the host tools they invoke.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kconfig_matrix_macros::Rule;

use crate::error::{Error, Result};
use crate::workspace::WorkspacePaths;

/// A ninja rule declared once and shared by every action that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleDef {
    pub name: &'static str,
    pub command: &'static str,
    pub description: &'static str,
    /// Host-tool variables referenced by `command`.
    pub tools: &'static [&'static str],
    /// Per-action variables every action of this rule must bind.
    pub args: &'static [&'static str],
}

pub trait StaticRule {
    fn def() -> RuleDef;
}

#[Rule(
    name = "kconfig_xml_fixup",
    command = "${kconfigXmlFixupCmd} --input ${in} --output-version ${outputVersion} --output-matrix ${out}",
    description = "kconfig_xml_fixup ${in}",
    tools = ["kconfigXmlFixupCmd"],
    args = ["outputVersion"]
)]
pub struct KconfigXmlFixupRule;

#[Rule(
    name = "assemble_vintf",
    command = "${assembleVintfCmd} ${flags} -i ${in} -o ${out}",
    description = "assemble_vintf -i ${in}",
    tools = ["assembleVintfCmd"],
    args = ["flags"]
)]
pub struct AssembleVintfRule;

/// Tool variable -> executable name looked up in `host_bin_dir` or `PATH`.
const HOST_TOOLS: &[(&str, &str)] = &[
    ("kconfigXmlFixupCmd", "kconfig_xml_fixup"),
    ("assembleVintfCmd", "assemble_vintf"),
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub host_bin_dir: Option<String>,
    pub kconfig_xml_fixup: Option<String>,
    pub assemble_vintf: Option<String>,
    pub ninja: Option<String>,
    /// Track host tools as implicit inputs so a rebuilt tool reruns its actions.
    #[serde(default = "default_true")]
    pub command_deps: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            host_bin_dir: None,
            kconfig_xml_fixup: None,
            assemble_vintf: None,
            ninja: None,
            command_deps: true,
        }
    }
}

impl ToolsConfig {
    fn override_for(&self, binary: &str) -> Option<&str> {
        let v = match binary {
            "kconfig_xml_fixup" => self.kconfig_xml_fixup.as_deref(),
            "assemble_vintf" => self.assemble_vintf.as_deref(),
            _ => None,
        };
        v.map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    vars: BTreeMap<&'static str, String>,
    pub ninja: String,
    pub command_deps: bool,
}

impl ToolPaths {
    pub fn get(&self, var: &str) -> Option<&str> {
        self.vars.get(var).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.vars.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Tool files an action of `rule` depends on. Bare names resolved through
    /// `PATH` have no file the build engine could stat, so they are skipped.
    pub fn command_deps(&self, rule: &RuleDef) -> Vec<PathBuf> {
        if !self.command_deps {
            return Vec::new();
        }
        rule.tools
            .iter()
            .filter_map(|t| self.get(t))
            .filter(|p| is_path_like(p))
            .map(PathBuf::from)
            .collect()
    }
}

fn is_path_like(p: &str) -> bool {
    Path::new(p).components().count() > 1 || Path::new(p).is_absolute()
}

fn resolve_tool(ws: &WorkspacePaths, raw: &str) -> String {
    if is_path_like(raw) {
        crate::workspace::normalize(&ws.root.join(raw))
            .to_string_lossy()
            .into_owned()
    } else {
        raw.to_string()
    }
}

pub fn resolve_tools(cfg: &ToolsConfig, ws: &WorkspacePaths) -> Result<ToolPaths> {
    let host_bin_dir = cfg
        .host_bin_dir
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|d| crate::workspace::normalize(&ws.root.join(d)));

    let mut vars = BTreeMap::new();
    for (var, binary) in HOST_TOOLS {
        let path = match (cfg.override_for(binary), host_bin_dir.as_ref()) {
            (Some(o), _) => resolve_tool(ws, o),
            (None, Some(dir)) => dir.join(binary).to_string_lossy().into_owned(),
            (None, None) => binary.to_string(),
        };
        if let Some(c) = crate::ninja::unquoted_shell_char(&path) {
            return Err(Error::msg(format!(
                "tool path {path:?} for {binary} contains {c:?}, which build commands cannot carry unquoted"
            )));
        }
        vars.insert(*var, path);
    }

    let ninja = cfg
        .ninja
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|n| resolve_tool(ws, n))
        .unwrap_or_else(|| "ninja".into());

    Ok(ToolPaths {
        vars,
        ninja,
        command_deps: cfg.command_deps,
    })
}
