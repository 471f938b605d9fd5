use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::graph::ActionSink;
use crate::workspace::PathResolver;

pub mod kernel_config;

pub trait ModuleType {
    /// Config table holding one sub-table per module instance.
    fn name(&self) -> &'static str;

    fn detect(&self, doc: &ConfigDoc) -> bool {
        doc.has_table_path(self.name())
    }

    /// Registers the actions of every instance declared in `doc`. Errors that
    /// only concern one instance go through [`Generation::module_error`] so
    /// sibling instances still generate.
    fn generate(&self, doc: &ConfigDoc, generation: &mut Generation<'_>) -> Result<()>;
}

pub fn builtin_module_types() -> Vec<Box<dyn ModuleType>> {
    vec![Box::new(kernel_config::KernelConfigModule)]
}

/// A module instance: its unique name and the directory its sources live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleId {
    pub name: String,
    pub dir: PathBuf,
}

/// State shared by all module types during one generation pass.
pub struct Generation<'a> {
    pub resolver: &'a dyn PathResolver,
    pub sink: &'a mut dyn ActionSink,
    declared: BTreeMap<String, PathBuf>,
    errors: Vec<Error>,
    generated: usize,
}

impl<'a> Generation<'a> {
    pub fn new(resolver: &'a dyn PathResolver, sink: &'a mut dyn ActionSink) -> Self {
        Self {
            resolver,
            sink,
            declared: BTreeMap::new(),
            errors: Vec::new(),
            generated: 0,
        }
    }

    /// Module names become output directory names, so they must be plain
    /// path segments and unique across every loaded document.
    pub fn claim_name(&mut self, module_type: &str, name: &str, declared_in: &Path) -> Result<()> {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(Error::msg(format!(
                "{module_type} name '{name}' is invalid (allowed: a-zA-Z0-9_.-, starting with a letter or digit)"
            )));
        }
        if let Some(existing) = self.declared.get(name) {
            return Err(Error::msg(format!(
                "module '{name}' is declared in both {} and {}",
                existing.display(),
                declared_in.display()
            )));
        }
        self.declared
            .insert(name.to_string(), declared_in.to_path_buf());
        Ok(())
    }

    pub fn module_error(&mut self, module: &str, err: Error) {
        tracing::error!(module, kind = ?err.kind(), "{err}");
        self.errors.push(err);
    }

    pub fn mark_generated(&mut self) {
        self.generated += 1;
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Number of instances that produced actions, or every collected
    /// module error folded into one (keeping the first error's kind).
    pub fn finish(self) -> Result<usize> {
        let mut errors = self.errors.into_iter();
        let Some(first) = errors.next() else {
            return Ok(self.generated);
        };
        let rest: Vec<Error> = errors.collect();
        if rest.is_empty() {
            return Err(first);
        }
        let mut msg = format!("{} module errors:", rest.len() + 1);
        for e in std::iter::once(&first).chain(rest.iter()) {
            msg.push_str(&format!("\n  - {e}"));
        }
        Err(Error::new(first.kind(), msg))
    }
}

/// Runs every builtin module type over `docs`, registering actions into `sink`.
pub fn generate_all(
    docs: &[ConfigDoc],
    resolver: &dyn PathResolver,
    sink: &mut dyn ActionSink,
) -> Result<usize> {
    let types = builtin_module_types();
    let mut generation = Generation::new(resolver, sink);
    for doc in docs {
        for t in &types {
            if t.detect(doc) {
                t.generate(doc, &mut generation)?;
            }
        }
    }
    let n = generation.finish()?;
    tracing::info!(modules = n, "generated build actions");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::graph::BuildAction;
    use crate::workspace::WorkspacePaths;

    fn ws() -> WorkspacePaths {
        WorkspacePaths {
            root: "/top".into(),
            out_dir: "/top/out".into(),
            ninja_file: "/top/out/build.ninja".into(),
            named_dirs: Default::default(),
        }
    }

    #[test]
    fn claim_name_rejects_path_like_and_duplicate_names() {
        let ws = ws();
        let mut sink = Vec::<BuildAction>::new();
        let mut g = Generation::new(&ws, &mut sink);
        let here = Path::new("/top/build.toml");

        g.claim_name("kernel_config", "android-5.10_r1", here)
            .expect("valid");
        for bad in ["", "../x", "a/b", ".hidden", "a b"] {
            let err = g.claim_name("kernel_config", bad, here).expect_err(bad);
            assert_eq!(err.kind(), ErrorKind::Config);
        }
        let other = Path::new("/top/k/kernel_config.toml");
        let err = g
            .claim_name("kernel_config", "android-5.10_r1", other)
            .expect_err("duplicate");
        assert!(err.to_string().contains("declared in both"), "{err}");
    }

    #[test]
    fn finish_folds_errors_and_keeps_first_kind() {
        let ws = ws();
        let mut sink = Vec::<BuildAction>::new();
        let mut g = Generation::new(&ws, &mut sink);
        g.module_error("a", Error::missing_metadata("a"));
        g.module_error("b", Error::msg("bad path"));
        assert_eq!(g.errors().len(), 2);

        let err = g.finish().expect_err("errors");
        assert_eq!(err.kind(), ErrorKind::MissingMetadata);
        assert!(err.to_string().starts_with("2 module errors:"), "{err}");
    }

    #[test]
    fn finish_counts_generated_instances() {
        let ws = ws();
        let mut sink = Vec::<BuildAction>::new();
        let mut g = Generation::new(&ws, &mut sink);
        g.mark_generated();
        g.mark_generated();
        assert_eq!(g.finish().expect("ok"), 2);
    }
}
