//! Chart IR (C1): the static, immutable representation of a state chart produced by
//! parsing (out of scope here) or, for this crate, by [`ChartBuilder`].
//!
//! *W3C says*: the interpreter operates over a document tree of `<state>`,
//! `<parallel>`, `<final>`, `<history>` nodes connected by `<transition>` edges.
//! Rather than a pointer tree with parent back-references (which in Rust means
//! `Rc<RefCell<_>>` or unsafe cyclic structures), every node is addressed by an
//! arena index (`StateId`/`TransitionId`/`ExecutableContentId`) into flat `Vec`s
//! owned by [`Chart`]. A session holds an `Arc<Chart>` and never mutates it —
//! exactly the "shared immutable reference, no back-pointers" shape called for.

use std::collections::HashMap;
use std::fmt;

use crate::executable_content::ExecutableContent;

/// Index into `Chart::states`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// Index into `Chart::transitions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub u32);

/// Index into `Chart::executable_content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutableContentId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The five node kinds W3C 3.2-3.7 distinguishes. `History` carries its type
/// (shallow/deep) since the restoration algorithm (C5) branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Shallow,
    Deep,
}

/// A single `<state>`/`<parallel>`/`<final>`/`<history>` node.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub id: StateId,
    pub name: String,
    pub kind: StateKind,
    pub parent: Option<StateId>,
    /// Direct children in document order (used by `entryOrder`/`documentOrder`).
    pub children: Vec<StateId>,
    /// `<state>`/`<parallel>` initial child transition, if not implied by document
    /// order of the first child (W3C 3.3's `initial` attribute / child element).
    pub initial: Option<TransitionId>,
    pub transitions: Vec<TransitionId>,
    pub on_entry: Vec<ExecutableContentId>,
    pub on_exit: Vec<ExecutableContentId>,
    pub invokes: Vec<InvokeNode>,
    pub data_items: Vec<DataItem>,
    /// `<final>` node's `<donedata>` template, evaluated when the node is entered.
    pub done_data: Option<DoneDataTemplate>,
}

impl StateNode {
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.kind, StateKind::Compound)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, StateKind::Parallel)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, StateKind::Final)
    }

    pub fn is_history(&self) -> Option<HistoryKind> {
        match self.kind {
            StateKind::History(k) => Some(k),
            _ => None,
        }
    }
}

/// Transition kind, W3C 3.5: `internal` transitions do not exit/re-enter the source
/// state when the source is a compound ancestor of the target (see REDESIGN/spec
/// boundary case on internal transitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    Internal,
}

#[derive(Debug, Clone)]
pub struct TransitionNode {
    pub id: TransitionId,
    pub source: StateId,
    pub targets: Vec<StateId>,
    pub event_descriptors: Vec<String>,
    /// `None` means no `cond` attribute, i.e. always true.
    pub cond: Option<String>,
    pub kind: TransitionKind,
    pub content: Vec<ExecutableContentId>,
    /// Document order among the source's (and ancestors', for eventless selection)
    /// transitions; used to break ties deterministically per W3C 3.13.
    pub document_order: u32,
}

impl TransitionNode {
    pub fn is_eventless(&self) -> bool {
        self.event_descriptors.is_empty()
    }

    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn matches_event(&self, name: &str) -> bool {
        self.event_descriptors
            .iter()
            .any(|d| crate::event::Event::name_matches_descriptor(name, d))
    }
}

/// A `<data>` element: id plus either a literal expression or inline content.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub id: String,
    /// `expr` attribute, evaluated once at data-model initialization.
    pub expr: Option<String>,
    /// Inline textual/child content, used when `expr` is absent (W3C B.2.1's
    /// "src"/children form; `src` itself is treated as out of scope here since it
    /// implies a resource fetch, matching the XML-parser exclusion).
    pub inline: Option<String>,
}

/// Static `<donedata>` template: `<param>` names to evaluate plus optional `<content>`.
#[derive(Debug, Clone, Default)]
pub struct DoneDataTemplate {
    pub content_expr: Option<String>,
    pub params: Vec<(String, String)>,
}

/// A static `<invoke>` declaration attached to a state (C8).
#[derive(Debug, Clone)]
pub struct InvokeNode {
    /// Document-declared id, or `None` if the invoke engine must synthesize one
    /// (`stateid.platformid`, W3C 6.4.1) at runtime.
    pub id: Option<String>,
    pub type_name: String,
    pub src: Option<String>,
    pub autoforward: bool,
    pub namelist: Vec<String>,
    pub params: Vec<(String, String)>,
    pub content_expr: Option<String>,
    pub finalize: Vec<ExecutableContentId>,
}

/// The complete, immutable Chart IR for one document. Shared via `Arc<Chart>` across
/// every session spawned from it (root session and every invoked child).
#[derive(Debug, Clone)]
pub struct Chart {
    pub name: String,
    pub states: Vec<StateNode>,
    pub transitions: Vec<TransitionNode>,
    pub executable_content: Vec<Vec<std::sync::Arc<dyn ExecutableContent>>>,
    pub root: StateId,
    /// `datamodel` attribute on `<scxml>`: `"ecmascript"` or `"null"`.
    pub binding_datamodel: String,
    /// `binding` attribute on `<scxml>`: early (default) or late (W3C 5.3.2).
    pub late_binding: bool,
    name_index: HashMap<String, StateId>,
}

impl Chart {
    pub fn state(&self, id: StateId) -> &StateNode {
        &self.states[id.0 as usize]
    }

    pub fn transition(&self, id: TransitionId) -> &TransitionNode {
        &self.transitions[id.0 as usize]
    }

    pub fn content(&self, id: ExecutableContentId) -> &[std::sync::Arc<dyn ExecutableContent>] {
        &self.executable_content[id.0 as usize]
    }

    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.name_index.get(name).copied()
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.state(id).parent
    }

    /// W3C Appendix C `isDescendant`: true if `state1` is a (proper) descendant of
    /// `state2`.
    pub fn is_descendant(&self, state1: StateId, state2: StateId) -> bool {
        let mut cur = self.parent(state1);
        while let Some(p) = cur {
            if p == state2 {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    /// W3C Appendix C `getProperAncestors`: ancestors of `state1` up to but not
    /// including `state2` (or all ancestors if `state2` is `None`). Ordered from the
    /// immediate parent outward, matching the pseudocode's iteration order.
    pub fn proper_ancestors(&self, state1: StateId, state2: Option<StateId>) -> Vec<StateId> {
        let mut result = Vec::new();
        let mut cur = self.parent(state1);
        while let Some(p) = cur {
            if Some(p) == state2 {
                break;
            }
            result.push(p);
            cur = self.parent(p);
        }
        result
    }
}

/// Programmatic builder for Chart IR, the in-scope substitute for the out-of-scope
/// XML reader. Mirrors the shape an XML parser would populate, one state/transition
/// at a time in document order, then validates and freezes the result in [`build`].
pub struct ChartBuilder {
    name: String,
    states: Vec<StateNode>,
    transitions: Vec<TransitionNode>,
    executable_content: Vec<Vec<std::sync::Arc<dyn ExecutableContent>>>,
    binding_datamodel: String,
    late_binding: bool,
    next_doc_order: u32,
}

impl ChartBuilder {
    pub fn new(name: &str) -> ChartBuilder {
        ChartBuilder {
            name: name.to_string(),
            states: Vec::new(),
            transitions: Vec::new(),
            executable_content: Vec::new(),
            binding_datamodel: "ecmascript".to_string(),
            late_binding: false,
            next_doc_order: 0,
        }
    }

    pub fn with_datamodel(mut self, name: &str) -> ChartBuilder {
        self.binding_datamodel = name.to_string();
        self
    }

    pub fn with_late_binding(mut self, late: bool) -> ChartBuilder {
        self.late_binding = late;
        self
    }

    /// Registers a new state node and returns its id. `parent` must already exist.
    #[allow(clippy::too_many_arguments)]
    pub fn add_state(
        &mut self,
        name: &str,
        kind: StateKind,
        parent: Option<StateId>,
    ) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(StateNode {
            id,
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            invokes: Vec::new(),
            data_items: Vec::new(),
            done_data: None,
        });
        if let Some(p) = parent {
            self.states[p.0 as usize].children.push(id);
        }
        id
    }

    /// Registers one block of executable content (e.g. an `<onentry>` body) and
    /// returns its id for attaching to `on_entry`/`on_exit`/transition content.
    pub fn add_content(
        &mut self,
        actions: Vec<std::sync::Arc<dyn ExecutableContent>>,
    ) -> ExecutableContentId {
        let id = ExecutableContentId(self.executable_content.len() as u32);
        self.executable_content.push(actions);
        id
    }

    pub fn set_on_entry(&mut self, state: StateId, content: ExecutableContentId) {
        self.states[state.0 as usize].on_entry.push(content);
    }

    pub fn set_on_exit(&mut self, state: StateId, content: ExecutableContentId) {
        self.states[state.0 as usize].on_exit.push(content);
    }

    pub fn add_data_item(&mut self, state: StateId, item: DataItem) {
        self.states[state.0 as usize].data_items.push(item);
    }

    pub fn add_invoke(&mut self, state: StateId, invoke: InvokeNode) {
        self.states[state.0 as usize].invokes.push(invoke);
    }

    pub fn set_done_data(&mut self, state: StateId, done_data: DoneDataTemplate) {
        self.states[state.0 as usize].done_data = Some(done_data);
    }

    /// Registers a transition from `source` and returns its id. `targets` may be
    /// empty (a targetless transition, legal only for executing content/raising
    /// events without changing configuration).
    pub fn add_transition(
        &mut self,
        source: StateId,
        targets: Vec<StateId>,
        event_descriptors: Vec<String>,
        cond: Option<String>,
        kind: TransitionKind,
        content: Vec<ExecutableContentId>,
    ) -> TransitionId {
        let id = TransitionId(self.transitions.len() as u32);
        let document_order = self.next_doc_order;
        self.next_doc_order += 1;
        self.transitions.push(TransitionNode {
            id,
            source,
            targets,
            event_descriptors,
            cond,
            kind,
            content,
            document_order,
        });
        self.states[source.0 as usize].transitions.push(id);
        id
    }

    pub fn set_initial(&mut self, state: StateId, transition: TransitionId) {
        self.states[state.0 as usize].initial = Some(transition);
    }

    /// Freezes the builder into an immutable `Chart`. Validates the invariants the
    /// loader would otherwise enforce: a non-empty tree, a single root, and no
    /// duplicate invoke ids within one state (the chosen resolution for the "when is
    /// a duplicate invoke id rejected" open question — see DESIGN.md).
    pub fn build(self) -> Result<Chart, String> {
        if self.states.is_empty() {
            return Err("chart has no states".to_string());
        }
        let root = self
            .states
            .iter()
            .find(|s| s.parent.is_none())
            .map(|s| s.id)
            .ok_or_else(|| "chart has no root state".to_string())?;

        let mut name_index = HashMap::new();
        for s in &self.states {
            if name_index.insert(s.name.clone(), s.id).is_some() && !s.name.is_empty() {
                return Err(format!("duplicate state name '{}'", s.name));
            }
            let mut seen_invoke_ids = std::collections::HashSet::new();
            for inv in &s.invokes {
                if let Some(id) = &inv.id {
                    if !seen_invoke_ids.insert(id.clone()) {
                        return Err(format!(
                            "duplicate invoke id '{id}' within state '{}'",
                            s.name
                        ));
                    }
                }
            }
        }

        Ok(Chart {
            name: self.name,
            states: self.states,
            transitions: self.transitions,
            executable_content: self.executable_content,
            root,
            binding_datamodel: self.binding_datamodel,
            late_binding: self.late_binding,
            name_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_empty_chart() {
        let builder = ChartBuilder::new("empty");
        assert!(builder.build().is_err());
    }

    #[test]
    fn proper_ancestors_orders_from_parent_outward() {
        let mut b = ChartBuilder::new("t");
        let root = b.add_state("root", StateKind::Compound, None);
        let mid = b.add_state("mid", StateKind::Compound, Some(root));
        let leaf = b.add_state("leaf", StateKind::Atomic, Some(mid));
        let chart = b.build().unwrap();
        let ancestors = chart.proper_ancestors(leaf, None);
        assert_eq!(ancestors, vec![mid, root]);
    }

    #[test]
    fn is_descendant_detects_transitive_relationship() {
        let mut b = ChartBuilder::new("t");
        let root = b.add_state("root", StateKind::Compound, None);
        let mid = b.add_state("mid", StateKind::Compound, Some(root));
        let leaf = b.add_state("leaf", StateKind::Atomic, Some(mid));
        let chart = b.build().unwrap();
        assert!(chart.is_descendant(leaf, root));
        assert!(!chart.is_descendant(root, leaf));
    }

    #[test]
    fn build_rejects_duplicate_invoke_ids() {
        let mut b = ChartBuilder::new("t");
        let root = b.add_state("root", StateKind::Atomic, None);
        b.add_invoke(
            root,
            InvokeNode {
                id: Some("inv1".to_string()),
                type_name: "scxml".to_string(),
                src: None,
                autoforward: false,
                namelist: Vec::new(),
                params: Vec::new(),
                content_expr: None,
                finalize: Vec::new(),
            },
        );
        b.add_invoke(
            root,
            InvokeNode {
                id: Some("inv1".to_string()),
                type_name: "scxml".to_string(),
                src: None,
                autoforward: false,
                namelist: Vec::new(),
                params: Vec::new(),
                content_expr: None,
                finalize: Vec::new(),
            },
        );
        assert!(b.build().is_err());
    }
}
