use std::path::{Path, PathBuf};

use crate::config::{self, ConfigDoc};
use crate::error::Result;
use crate::graph::BuildGraph;
use crate::rules::{ToolPaths, ToolsConfig, resolve_tools};
use crate::workspace::{WorkspaceConfig, WorkspacePaths, load_paths};

/// A root build definition plus any module files discovered next to it.
///
/// `[workspace]` and `[tools]` are only read from the root document;
/// discovered documents contribute module tables.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: ConfigDoc,
    pub module_docs: Vec<ConfigDoc>,
    pub workspace: WorkspacePaths,
    pub tools: ToolPaths,
}

impl Project {
    pub fn load(def: &Path, scan: &[PathBuf]) -> Result<Self> {
        let root = config::load(def)?;
        let extra = if scan.is_empty() {
            Vec::new()
        } else {
            config::discover(scan, Some(def))?
        };
        Self::from_docs(root, extra)
    }

    pub fn from_docs(root: ConfigDoc, extra: Vec<ConfigDoc>) -> Result<Self> {
        let ws_cfg: WorkspaceConfig = root.deserialize_path("workspace")?.unwrap_or_default();
        let tools_cfg: ToolsConfig = root.deserialize_path("tools")?.unwrap_or_default();
        let workspace = load_paths(&ws_cfg, root.base_dir())?;
        let tools = resolve_tools(&tools_cfg, &workspace)?;

        for doc in &extra {
            for ignored in ["workspace", "tools"] {
                if doc.value_path(ignored).is_some() {
                    tracing::warn!(
                        path = %doc.path.display(),
                        "[{ignored}] is only read from the root definition; ignoring"
                    );
                }
            }
        }

        let mut module_docs = Vec::with_capacity(extra.len() + 1);
        module_docs.push(root.clone());
        module_docs.extend(extra);

        Ok(Self {
            root,
            module_docs,
            workspace,
            tools,
        })
    }

    /// Generates every module into a fresh graph. Fails if any module failed,
    /// after all modules have had their turn.
    pub fn generate(&self) -> Result<BuildGraph> {
        let mut graph = BuildGraph::default();
        crate::modules::generate_all(&self.module_docs, &self.workspace, &mut graph)?;
        Ok(graph)
    }

    pub fn render_ninja(&self) -> Result<String> {
        crate::ninja::render(&self.generate()?, &self.tools)
    }
}
