//! Invoke Manager (C8): lifecycle of `<invoke>` — starting a child session,
//! autoforwarding external events into it, running `<finalize>` against its replies,
//! and generating the `done.invoke.<id>` event when it terminates.
//!
//! *W3C says* (6.4): "If the 'autoforward' attribute is set to 'true', the SCXML
//! Processor must forward all external events it receives to the invoked process...
//! If the invoking state is exited before the invocation is canceled, the SCXML
//! Processor MUST immediately cancel the invocation."

use std::collections::HashMap;
use std::sync::mpsc::Sender;

use crate::chart::{InvokeNode, StateId};
use crate::event::{CommonContent, Event, EventType, InvokeId, SessionId};

/// A running invocation: enough to forward events to it, run its `<finalize>`, and
/// tear it down when the invoking state is exited.
pub struct RunningInvoke {
    pub invoke_id: InvokeId,
    pub invoking_state: StateId,
    pub autoforward: bool,
    pub child_session: SessionId,
    pub child_sender: Sender<Box<Event>>,
    pub finalize: Vec<crate::chart::ExecutableContentId>,
}

/// Carried by a child session that was started via `<invoke>`, so it can stamp its
/// own outgoing `#_parent` sends with the `invokeid`/`origin` W3C 6.4's finalize
/// matching needs, without the event I/O processor having to know invoke bookkeeping
/// that belongs to the session, not the transport.
#[derive(Clone)]
pub struct InvokedAs {
    pub invoke_id: InvokeId,
    pub parent_session: SessionId,
}

/// Holds every invocation currently running for one session, keyed by invoke id.
/// Owned by `Session` (C9); the session calls into this on state entry/exit and on
/// every external event it receives (for autoforwarding).
#[derive(Default)]
pub struct InvokeManager {
    running: HashMap<InvokeId, RunningInvoke>,
}

impl InvokeManager {
    pub fn new() -> InvokeManager {
        InvokeManager::default()
    }

    /// Synthesizes an invoke id per W3C 6.4.1 when the document did not declare one:
    /// `stateid.platformid`, where `platformid` is a monotonic per-process counter.
    pub fn synthesize_id(invoking_state_name: &str) -> InvokeId {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{invoking_state_name}.{n}")
    }

    pub fn register(&mut self, invoke: RunningInvoke) {
        self.running.insert(invoke.invoke_id.clone(), invoke);
    }

    pub fn get(&self, invoke_id: &str) -> Option<&RunningInvoke> {
        self.running.get(invoke_id)
    }

    /// Removes and returns every invocation owned by `state`, used when the invoking
    /// state is exited (W3C 6.4's "MUST immediately cancel the invocation").
    pub fn remove_owned_by(&mut self, state: StateId) -> Vec<RunningInvoke> {
        let ids: Vec<InvokeId> = self
            .running
            .iter()
            .filter(|(_, inv)| inv.invoking_state == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.running.remove(&id))
            .collect()
    }

    /// Forwards `event` to every autoforwarding invocation owned by `state`, per
    /// W3C 6.4's autoforward semantics — called once per external event the owning
    /// session receives, for each of its currently-active invoking states.
    pub fn autoforward(&self, state: StateId, event: &Event) {
        for inv in self.running.values() {
            if inv.invoking_state == state && inv.autoforward {
                let _ = inv.child_sender.send(Box::new(event.clone()));
            }
        }
    }

    pub fn is_invoke_reply(&self, event: &Event) -> Option<&RunningInvoke> {
        event
            .invoke_id
            .as_ref()
            .and_then(|id| self.running.get(id))
    }
}

/// Evaluates a `<final>` state's `<donedata>` template against the state whose
/// `<final>` just became active: `<content>` wins outright if present, otherwise
/// each `<param>` is evaluated and collected into the result.
pub fn evaluate_done_data(
    template: &crate::chart::DoneDataTemplate,
    datamodel: &mut dyn crate::datamodel::Datamodel,
) -> Result<crate::event::DoneData, crate::error::FsmError> {
    let content = match &template.content_expr {
        Some(expr) => Some(CommonContent::Value(datamodel.eval_expr(expr)?)),
        None => None,
    };
    let mut params = Vec::new();
    for (name, expr) in &template.params {
        params.push(crate::event::ParamPair {
            name: name.clone(),
            value: datamodel.eval_expr(expr)?,
        });
    }
    Ok(crate::event::DoneData { content, params })
}

/// Folds an evaluated `<donedata>` into the single `data` value a `done.state.*`/
/// `done.invoke.*` event carries: `<content>` if present, else an object built from
/// the collected `<param>`s (W3C test 178: duplicate names become an array), else no
/// data at all.
pub fn done_data_to_content(done_data: &crate::event::DoneData) -> Option<CommonContent> {
    if let Some(content) = &done_data.content {
        return Some(content.clone());
    }
    if done_data.params.is_empty() {
        return None;
    }
    let pairs = done_data.params.iter().map(|p| (p.name.clone(), p.value.clone()));
    let fields = crate::event::fold_duplicate_names(pairs);
    Some(CommonContent::Value(crate::datamodel::Data::Object(fields)))
}

/// Builds the `done.invoke.<id>` event W3C 6.5 requires be raised in the invoking
/// session when a child session reaches a top-level final state.
pub fn done_invoke_event(invoke_id: &str, done_data: Option<crate::event::DoneData>) -> Event {
    let mut ev = Event::new(&format!("done.invoke.{invoke_id}"), EventType::Internal);
    ev.invoke_id = Some(invoke_id.to_string());
    ev.content = done_data.and_then(|dd| done_data_to_content(&dd));
    ev
}

/// Static declaration-to-runtime mapping helper: resolves `<invoke>`'s namelist and
/// literal params against the invoking session's current datamodel bindings, run
/// just before the child session is started. A name appearing in both (or repeated
/// within `params`) folds into a single array-valued entry (W3C 6.3.2/test 178)
/// rather than the child receiving two data items of the same name.
pub fn resolve_invoke_params(
    declared: &InvokeNode,
    datamodel: &mut dyn crate::datamodel::Datamodel,
) -> Result<Vec<(String, crate::datamodel::Data)>, crate::error::FsmError> {
    let mut resolved = Vec::new();
    for name in &declared.namelist {
        resolved.push((name.clone(), datamodel.get(name)?));
    }
    for (name, expr) in &declared.params {
        resolved.push((name.clone(), datamodel.eval_expr(expr)?));
    }
    Ok(crate::event::fold_duplicate_names(resolved))
}
