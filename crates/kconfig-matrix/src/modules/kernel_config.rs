//! `kernel_config` module type.
//!
//! Each instance turns a metadata XML file and a list of kernel config
//! fragments into a compatibility-matrix kernel fragment, using two actions:
//!
//! 1. `kconfig_xml_fixup` rewrites the metadata into a conditional fragment
//!    and writes the minimum LTS version to a side file.
//! 2. `assemble_vintf` combines the conditional fragment with the config
//!    fragments into the final matrix.
//!
//! The version is only known once the fixup action has run, so the assemble
//! command reads it with a shell substitution and lists the version file as an
//! implicit input; the build engine orders the two actions from that edge.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigDoc, deserialize_value};
use crate::error::{Error, Result};
use crate::graph::{ActionSink, BuildAction};
use crate::modules::{Generation, ModuleId, ModuleType};
use crate::ninja::unquoted_shell_char;
use crate::rules::{AssembleVintfRule, KconfigXmlFixupRule, StaticRule};
use crate::workspace::PathResolver;

pub const MODULE_TYPE: &str = "kernel_config";

fn default_true() -> bool {
    true
}

/// How output file names are derived for an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingPolicy {
    /// `<module>.xml`, `<module>.version.txt`, `<meta-stem>.xml`.
    #[default]
    ModuleName,
    /// `matrix.xml`, `version.txt`, `conditional.xml`.
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfigSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Config fragments: "android-base.config" for common requirements and
    /// "android-base-foo.config" for requirements on condition CONFIG_FOO=y.
    #[serde(alias = "sources")]
    pub srcs: Vec<String>,
    /// Metadata XML with the minimum LTS version and conditional requirements.
    #[serde(alias = "metadata")]
    pub meta: Option<String>,
    pub naming: NamingPolicy,
    /// Source directory under the workspace root; defaults to the directory of
    /// the declaring file.
    pub dir: Option<String>,
}

impl Default for KernelConfigSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            srcs: Vec::new(),
            meta: None,
            naming: NamingPolicy::default(),
            dir: None,
        }
    }
}

impl KernelConfigSpec {
    fn meta_path(&self) -> Option<&str> {
        self.meta.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }
}

/// Everything the two actions of one instance need; derived once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub module: String,
    pub meta_input: PathBuf,
    /// Conditional fragment written by the fixup action.
    pub fixup_output: PathBuf,
    /// Version file written by the fixup action as an implicit output.
    pub fixup_version: PathBuf,
    /// Resolved sources in declared order, then `fixup_version`.
    pub assemble_inputs: Vec<PathBuf>,
    /// Empty when the instance has no sources.
    pub kernel_arg: String,
    pub final_output: PathBuf,
}

pub fn validate(spec: &KernelConfigSpec, module: &str) -> Result<()> {
    if spec.meta_path().is_none() {
        return Err(Error::missing_metadata(module));
    }
    Ok(())
}

fn output_paths<R: PathResolver + ?Sized>(
    naming: NamingPolicy,
    module: &str,
    meta: &str,
    resolver: &R,
) -> (PathBuf, PathBuf, PathBuf) {
    let out = resolver.module_out(module);
    let generated = resolver.module_gen(module);
    match naming {
        NamingPolicy::Fixed => (
            out.join("matrix.xml"),
            generated.join("version.txt"),
            generated.join("conditional.xml"),
        ),
        NamingPolicy::ModuleName => {
            let stem = Path::new(meta)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("conditional");
            (
                out.join(format!("{module}.xml")),
                generated.join(format!("{module}.version.txt")),
                generated.join(format!("{stem}.xml")),
            )
        }
    }
}

/// `--kernel=<version>:<src>:...`, where `<version>` is read from
/// `version_file` by the shell when the action runs.
pub fn kernel_arg(version_file: &Path, srcs: &[PathBuf]) -> String {
    if srcs.is_empty() {
        return String::new();
    }
    let joined = srcs
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(":");
    format!("--kernel=$(cat {}):{joined}", version_file.display())
}

pub fn plan<R: PathResolver + ?Sized>(
    spec: &KernelConfigSpec,
    module: &ModuleId,
    resolver: &R,
) -> Result<BuildPlan> {
    let meta = spec
        .meta_path()
        .ok_or_else(|| Error::missing_metadata(&module.name))?;
    let meta_input = resolver.module_src(&module.dir, meta)?;

    let mut srcs = Vec::with_capacity(spec.srcs.len());
    for raw in &spec.srcs {
        let p = resolver.module_src(&module.dir, raw).map_err(|e| {
            Error::msg(format!("{MODULE_TYPE} '{}': src '{raw}': {e}", module.name))
        })?;
        // The kernel arg is colon separated.
        if p.to_string_lossy().contains(':') {
            return Err(Error::msg(format!(
                "{MODULE_TYPE} '{}': src {} contains ':'",
                module.name,
                p.display()
            )));
        }
        srcs.push(p);
    }

    let (final_output, fixup_version, fixup_output) =
        output_paths(spec.naming, &module.name, meta, resolver);

    // Both end up verbatim in the command line through `outputVersion` and
    // the kernel arg; only `${in}`/`${out}` get quoted by ninja.
    for p in srcs.iter().chain(std::iter::once(&fixup_version)) {
        if let Some(c) = unquoted_shell_char(&p.to_string_lossy()) {
            return Err(Error::msg(format!(
                "{MODULE_TYPE} '{}': path {} contains {c:?}, which build commands cannot carry unquoted",
                module.name,
                p.display()
            )));
        }
    }

    let kernel_arg = kernel_arg(&fixup_version, &srcs);
    let mut assemble_inputs = srcs;
    assemble_inputs.push(fixup_version.clone());

    Ok(BuildPlan {
        module: module.name.clone(),
        meta_input,
        fixup_output,
        fixup_version,
        assemble_inputs,
        kernel_arg,
        final_output,
    })
}

/// Registers both actions of `plan` as one batch: either both land in the
/// sink or neither does.
pub fn emit_actions<S: ActionSink + ?Sized>(plan: &BuildPlan, sink: &mut S) -> Result<()> {
    let fixup = BuildAction {
        module: plan.module.clone(),
        rule: KconfigXmlFixupRule::def(),
        description: format!("{}: Fixup kernel config meta", plan.module),
        inputs: vec![plan.meta_input.clone()],
        implicit_inputs: Vec::new(),
        outputs: vec![plan.fixup_output.clone()],
        implicit_outputs: vec![plan.fixup_version.clone()],
        args: BTreeMap::from([(
            "outputVersion".to_string(),
            plan.fixup_version.to_string_lossy().into_owned(),
        )]),
    };

    let assemble = BuildAction {
        module: plan.module.clone(),
        rule: AssembleVintfRule::def(),
        description: format!(
            "{}: Framework Compatibility Matrix kernel fragment",
            plan.module
        ),
        inputs: vec![plan.fixup_output.clone()],
        implicit_inputs: plan.assemble_inputs.clone(),
        outputs: vec![plan.final_output.clone()],
        implicit_outputs: Vec::new(),
        args: BTreeMap::from([("flags".to_string(), plan.kernel_arg.clone())]),
    };

    sink.register_all(vec![fixup, assemble])
}

/// Parses, validates and plans one declared instance without registering it.
pub fn plan_instance(
    doc: &ConfigDoc,
    name: &str,
    value: &toml::Value,
    resolver: &dyn PathResolver,
) -> Result<Option<BuildPlan>> {
    let spec: KernelConfigSpec = deserialize_value(value, &format!("{MODULE_TYPE}.{name}"))?;
    if !spec.enabled {
        tracing::debug!(module = name, "skipping disabled {MODULE_TYPE}");
        return Ok(None);
    }
    validate(&spec, name)?;
    let id = ModuleId {
        name: name.to_string(),
        dir: resolver.module_dir(doc.base_dir(), spec.dir.as_deref())?,
    };
    plan(&spec, &id, resolver).map(Some)
}

pub struct KernelConfigModule;

impl KernelConfigModule {
    fn generate_one(
        doc: &ConfigDoc,
        name: &str,
        value: &toml::Value,
        generation: &mut Generation<'_>,
    ) -> Result<()> {
        generation.claim_name(MODULE_TYPE, name, &doc.path)?;
        let Some(plan) = plan_instance(doc, name, value, generation.resolver)? else {
            return Ok(());
        };
        tracing::debug!(
            module = name,
            srcs = plan.assemble_inputs.len() - 1,
            output = %plan.final_output.display(),
            "planned {MODULE_TYPE}"
        );
        emit_actions(&plan, &mut *generation.sink)?;
        generation.mark_generated();
        Ok(())
    }
}

impl ModuleType for KernelConfigModule {
    fn name(&self) -> &'static str {
        MODULE_TYPE
    }

    fn generate(&self, doc: &ConfigDoc, generation: &mut Generation<'_>) -> Result<()> {
        let Some(instances) = doc.value_path(MODULE_TYPE) else {
            return Ok(());
        };
        let Some(instances) = instances.as_table() else {
            return Err(Error::msg(format!(
                "[{MODULE_TYPE}] in {} must be a table of module tables",
                doc.path.display()
            )));
        };
        for (name, value) in instances {
            if let Err(e) = Self::generate_one(doc, name, value, generation) {
                generation.module_error(name, e);
            }
        }
        Ok(())
    }
}
