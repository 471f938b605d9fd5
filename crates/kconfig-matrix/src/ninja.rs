//! `build.ninja` emission.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::graph::BuildGraph;
use crate::rules::ToolPaths;

// Implicit outputs need 1.7.
const REQUIRED_VERSION: &str = "1.7";

fn reject_newline(s: &str, what: &str) -> Result<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(Error::graph(format!("{what} contains a newline: {s:?}")));
    }
    Ok(())
}

/// Escapes a path for a `build` line, where space and `:` are separators.
pub fn escape_path(p: &Path) -> Result<String> {
    let s = p.to_string_lossy();
    reject_newline(&s, "path")?;
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '$' | ' ' | ':' => {
                out.push('$');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Escapes a variable value. A single `$` reaches the command as-is, so
/// `$(cat x)` in a value stays a shell substitution.
pub fn escape_value(v: &str) -> Result<String> {
    reject_newline(v, "value")?;
    Ok(v.replace('$', "$$"))
}

/// First character that would need shell quoting in a command word.
///
/// Ninja quotes `${in}` and `${out}` itself, but tool paths and argument
/// values are pasted into the command line verbatim.
pub fn unquoted_shell_char(s: &str) -> Option<char> {
    s.chars().find(|&c| {
        !(c.is_alphanumeric()
            || matches!(c, '_' | '-' | '.' | '/' | '+' | ',' | '@' | '%' | '=' | ':'))
    })
}

fn path_list(paths: &[PathBuf]) -> Result<String> {
    let mut parts = Vec::with_capacity(paths.len());
    for p in paths {
        parts.push(escape_path(p)?);
    }
    Ok(parts.join(" "))
}

pub fn render(graph: &BuildGraph, tools: &ToolPaths) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "# Generated by kconfig-matrix. Do not edit.");
    let _ = writeln!(out, "ninja_required_version = {REQUIRED_VERSION}");

    let rules = graph.rules();

    let used: BTreeSet<&str> = rules.iter().flat_map(|r| r.tools.iter().copied()).collect();
    if let Some(var) = used.iter().find(|v| tools.get(v).is_none()) {
        return Err(Error::msg(format!("no host tool configured for '{var}'")));
    }
    if !used.is_empty() {
        out.push('\n');
    }
    for (var, path) in tools.vars().filter(|(v, _)| used.contains(v)) {
        let _ = writeln!(out, "{var} = {}", escape_value(path)?);
    }

    for rule in &rules {
        let _ = writeln!(out, "\nrule {}", rule.name);
        let _ = writeln!(out, "  command = {}", rule.command);
        let _ = writeln!(out, "  description = {}", rule.description);
    }

    let mut module_outputs = BTreeMap::<&str, Vec<PathBuf>>::new();
    for action in graph.ordered()? {
        let mut line = format!("\nbuild {}", path_list(&action.outputs)?);
        if !action.implicit_outputs.is_empty() {
            let _ = write!(line, " | {}", path_list(&action.implicit_outputs)?);
        }
        let _ = write!(line, ": {}", action.rule.name);
        if !action.inputs.is_empty() {
            let _ = write!(line, " {}", path_list(&action.inputs)?);
        }
        let mut implicit = action.implicit_inputs.clone();
        for dep in tools.command_deps(&action.rule) {
            if !implicit.contains(&dep) {
                implicit.push(dep);
            }
        }
        if !implicit.is_empty() {
            let _ = write!(line, " | {}", path_list(&implicit)?);
        }
        out.push_str(&line);
        out.push('\n');

        let _ = writeln!(out, "  description = {}", escape_value(&action.description)?);
        for (k, v) in &action.args {
            let _ = writeln!(out, "  {k} = {}", escape_value(v)?);
        }

        module_outputs
            .entry(action.module.as_str())
            .or_default()
            .extend(action.outputs.iter().cloned());
    }

    // One phony target per module so `ninja <module>` builds its artifacts.
    for (module, outputs) in &module_outputs {
        let _ = write!(
            out,
            "\nbuild {}: phony {}\n",
            escape_path(Path::new(module))?,
            path_list(outputs)?
        );
    }

    Ok(out)
}

/// Writes `content` unless the file already holds exactly that, so an
/// unchanged graph does not make ninja regenerate anything. Returns whether
/// the file was written.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(path)
        && existing == content
    {
        tracing::debug!(path = %path.display(), "ninja file unchanged");
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("ninja.tmp");
    fs::write(&tmp, content)
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::msg(format!("failed to replace {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "wrote ninja file");
    Ok(true)
}
