use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::rules::RuleDef;

/// One build statement: a rule applied to concrete inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildAction {
    pub module: String,
    pub rule: RuleDef,
    pub description: String,
    pub inputs: Vec<PathBuf>,
    /// Must be current before the action runs but are not `${in}`.
    pub implicit_inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Produced by the action but not `${out}`.
    pub implicit_outputs: Vec<PathBuf>,
    pub args: BTreeMap<String, String>,
}

impl BuildAction {
    pub fn id(&self) -> String {
        format!("{}.{}", self.module, self.rule.name)
    }

    pub fn all_inputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().chain(self.implicit_inputs.iter())
    }

    pub fn all_outputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.outputs.iter().chain(self.implicit_outputs.iter())
    }
}

/// Action-registration capability handed to module types.
pub trait ActionSink {
    fn register(&mut self, action: BuildAction) -> Result<()>;

    /// Registers `actions` in order. Sinks that can reject an action should
    /// override this so a failed batch leaves nothing behind.
    fn register_all(&mut self, actions: Vec<BuildAction>) -> Result<()> {
        for action in actions {
            self.register(action)?;
        }
        Ok(())
    }
}

impl ActionSink for Vec<BuildAction> {
    fn register(&mut self, action: BuildAction) -> Result<()> {
        self.push(action);
        Ok(())
    }
}

fn check_shape(action: &BuildAction) -> Result<()> {
    if action.outputs.is_empty() {
        return Err(Error::graph(format!(
            "action '{}' declares no outputs",
            action.id()
        )));
    }
    for key in action.args.keys() {
        if !action.rule.args.contains(&key.as_str()) {
            return Err(Error::graph(format!(
                "action '{}' binds '{}' which rule '{}' does not declare",
                action.id(),
                key,
                action.rule.name
            )));
        }
    }
    for arg in action.rule.args {
        if !action.args.contains_key(*arg) {
            return Err(Error::graph(format!(
                "action '{}' is missing arg '{}'",
                action.id(),
                arg
            )));
        }
    }
    let mut seen = BTreeSet::<&PathBuf>::new();
    for out in action.all_outputs() {
        if !seen.insert(out) {
            return Err(Error::graph(format!(
                "action '{}' lists output {} twice",
                action.id(),
                out.display()
            )));
        }
    }
    Ok(())
}

/// In-memory build graph. Producer/consumer edges come from matching an
/// action's inputs against earlier-registered outputs; no path is produced by
/// more than one action.
#[derive(Debug, Default)]
pub struct BuildGraph {
    actions: Vec<BuildAction>,
    producers: BTreeMap<PathBuf, usize>,
}

impl BuildGraph {
    pub fn actions(&self) -> &[BuildAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn producer_of(&self, path: &Path) -> Option<&BuildAction> {
        self.producers.get(path).map(|&i| &self.actions[i])
    }

    /// Distinct rules in first-use order.
    pub fn rules(&self) -> Vec<RuleDef> {
        let mut seen = BTreeSet::<&str>::new();
        self.actions
            .iter()
            .filter(|a| seen.insert(a.rule.name))
            .map(|a| a.rule)
            .collect()
    }

    fn edges(&self) -> (Vec<usize>, Vec<BTreeSet<usize>>) {
        let mut incoming = vec![0usize; self.actions.len()];
        let mut outgoing = vec![BTreeSet::<usize>::new(); self.actions.len()];
        for (consumer, action) in self.actions.iter().enumerate() {
            for input in action.all_inputs() {
                let Some(&producer) = self.producers.get(input) else {
                    continue;
                };
                if outgoing[producer].insert(consumer) {
                    incoming[consumer] += 1;
                }
            }
        }
        (incoming, outgoing)
    }

    /// Producers before consumers; ties keep registration order.
    pub fn ordered(&self) -> Result<Vec<&BuildAction>> {
        let (mut incoming, outgoing) = self.edges();

        let mut q: VecDeque<usize> = incoming
            .iter()
            .enumerate()
            .filter_map(|(i, n)| (*n == 0).then_some(i))
            .collect();
        let mut out = Vec::with_capacity(self.actions.len());

        while let Some(n) = q.pop_front() {
            out.push(&self.actions[n]);
            for &m in &outgoing[n] {
                incoming[m] -= 1;
                if incoming[m] == 0 {
                    q.push_back(m);
                }
            }
        }

        if out.len() != self.actions.len() {
            let remaining: Vec<String> = incoming
                .iter()
                .enumerate()
                .filter_map(|(i, n)| (*n > 0).then(|| self.actions[i].id()))
                .collect();
            return Err(Error::graph(format!(
                "build graph contains a cycle; remaining actions: {}",
                remaining.join(", ")
            )));
        }
        Ok(out)
    }

    pub fn to_dot(&self) -> String {
        let (_, outgoing) = self.edges();
        let mut out = String::from("digraph build {\n  rankdir=LR;\n");
        for (i, action) in self.actions.iter().enumerate() {
            out.push_str(&format!(
                "  a{} [label=\"{}\\n{}\"];\n",
                i, action.module, action.rule.name
            ));
        }
        for (from, tos) in outgoing.iter().enumerate() {
            for to in tos {
                out.push_str(&format!("  a{from} -> a{to};\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    fn check_new(&self, action: &BuildAction, pending: &[BuildAction]) -> Result<()> {
        check_shape(action)?;
        for out in action.all_outputs() {
            let existing = self
                .producers
                .get(out)
                .map(|&i| &self.actions[i])
                .or_else(|| pending.iter().find(|p| p.all_outputs().any(|o| o == out)));
            if let Some(existing) = existing {
                return Err(Error::graph(format!(
                    "output {} is produced by both '{}' and '{}'",
                    out.display(),
                    existing.id(),
                    action.id()
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, action: BuildAction) {
        let idx = self.actions.len();
        for out in action.all_outputs() {
            self.producers.insert(out.clone(), idx);
        }
        tracing::debug!(action = %action.id(), "registered build action");
        self.actions.push(action);
    }
}

impl ActionSink for BuildGraph {
    fn register(&mut self, action: BuildAction) -> Result<()> {
        self.check_new(&action, &[])?;
        self.insert(action);
        Ok(())
    }

    fn register_all(&mut self, actions: Vec<BuildAction>) -> Result<()> {
        for (i, action) in actions.iter().enumerate() {
            self.check_new(action, &actions[..i])?;
        }
        for action in actions {
            self.insert(action);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rules::{AssembleVintfRule, KconfigXmlFixupRule, StaticRule};

    fn fixup(module: &str, meta: &str, cond: &str, version: &str) -> BuildAction {
        BuildAction {
            module: module.into(),
            rule: KconfigXmlFixupRule::def(),
            description: "fixup".into(),
            inputs: vec![meta.into()],
            implicit_inputs: vec![],
            outputs: vec![cond.into()],
            implicit_outputs: vec![version.into()],
            args: BTreeMap::from([("outputVersion".to_string(), version.to_string())]),
        }
    }

    fn assemble(module: &str, cond: &str, implicits: &[&str], out: &str) -> BuildAction {
        BuildAction {
            module: module.into(),
            rule: AssembleVintfRule::def(),
            description: "assemble".into(),
            inputs: vec![cond.into()],
            implicit_inputs: implicits.iter().map(PathBuf::from).collect(),
            outputs: vec![out.into()],
            implicit_outputs: vec![],
            args: BTreeMap::from([("flags".to_string(), String::new())]),
        }
    }

    #[test]
    fn consumers_follow_their_producers() {
        let mut g = BuildGraph::default();
        // Registered consumer-first on purpose.
        g.register(assemble("m", "/g/c.xml", &["/g/v.txt"], "/o/m.xml"))
            .expect("assemble");
        g.register(fixup("m", "/s/meta.xml", "/g/c.xml", "/g/v.txt"))
            .expect("fixup");

        let order: Vec<_> = g
            .ordered()
            .expect("ordered")
            .into_iter()
            .map(|a| a.rule.name)
            .collect();
        assert_eq!(order, vec!["kconfig_xml_fixup", "assemble_vintf"]);
        assert_eq!(
            g.producer_of(Path::new("/g/v.txt")).map(BuildAction::id),
            Some("m.kconfig_xml_fixup".to_string())
        );
        assert_eq!(g.rules().len(), 2);
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let mut g = BuildGraph::default();
        g.register(fixup("a", "/s/a.xml", "/g/c.xml", "/g/a.txt"))
            .expect("first");
        let err = g
            .register(fixup("b", "/s/b.xml", "/g/c.xml", "/g/b.txt"))
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Graph);
        assert!(err.to_string().contains("'a.kconfig_xml_fixup'"), "{err}");
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn undeclared_and_missing_args_are_rejected() {
        let mut g = BuildGraph::default();
        let mut extra = assemble("m", "/c", &[], "/o");
        extra.args.insert("bogus".into(), "1".into());
        assert!(g.register(extra).is_err());

        let mut missing = assemble("m", "/c", &[], "/o");
        missing.args.clear();
        assert!(g.register(missing).is_err());
        assert!(g.is_empty());
    }

    #[test]
    fn failed_batch_registers_nothing() {
        let mut g = BuildGraph::default();
        g.register(assemble("a", "/g/c.xml", &[], "/o/x.xml"))
            .expect("first");
        let err = g
            .register_all(vec![
                fixup("b", "/s/meta.xml", "/g/b.xml", "/g/b.txt"),
                assemble("b", "/g/b.xml", &["/g/b.txt"], "/o/x.xml"),
            ])
            .expect_err("second action clashes");
        assert_eq!(err.kind(), ErrorKind::Graph);
        assert_eq!(g.len(), 1);
        assert!(g.producer_of(Path::new("/g/b.xml")).is_none());
    }

    #[test]
    fn batch_outputs_may_not_clash_with_each_other() {
        let mut g = BuildGraph::default();
        let err = g
            .register_all(vec![
                fixup("a", "/s/a.xml", "/g/c.xml", "/g/a.txt"),
                fixup("b", "/s/b.xml", "/g/c.xml", "/g/b.txt"),
            ])
            .expect_err("same output twice");
        assert!(err.to_string().contains("'a.kconfig_xml_fixup'"), "{err}");
        assert!(g.is_empty());
    }

    #[test]
    fn cycles_are_reported() {
        let mut g = BuildGraph::default();
        g.register(assemble("a", "/x", &[], "/y")).expect("a");
        g.register(assemble("b", "/y", &[], "/x")).expect("b");
        let err = g.ordered().expect_err("cycle");
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn dot_lists_edges() {
        let mut g = BuildGraph::default();
        g.register(fixup("m", "/s/meta.xml", "/g/c.xml", "/g/v.txt"))
            .expect("fixup");
        g.register(assemble("m", "/g/c.xml", &["/g/v.txt"], "/o/m.xml"))
            .expect("assemble");
        let dot = g.to_dot();
        assert!(dot.contains("a0 -> a1;"), "{dot}");
        assert!(!dot.contains("a1 -> a0;"), "{dot}");
    }
}
