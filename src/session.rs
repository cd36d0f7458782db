//! Session / Macrostep Driver (C9): the interpreter loop that ties the Chart IR
//! (C1), data model bridge (C2), queues (C3), scheduler (C4), configuration
//! manager (C5), transition selector (C6), action executor (C7) and invoke manager
//! (C8) together into one running session, per W3C Appendix D.
//!
//! *W3C says* (`interpret`): "If the top-level state is a `<final>` state... halt
//! processing. Otherwise enter states, and start the macrostep loop: take a
//! transition set, execute the corresponding entry/exit, then process one external
//! event at a time, re-running the eventless-transition loop after each."

use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::chart::{Chart, StateId, TransitionId, TransitionKind};
use crate::collections::OrderedSet;
use crate::configuration::{self, HistoryTable};
use crate::datamodel::{Data, Datamodel, DatamodelFactory};
use crate::error::FsmError;
use crate::event::{DoneData, Event, ExternalQueue, InvokeId, SendId, SessionId};
use crate::event_io_processor::{EventIOProcessor, SendTarget};
use crate::executable_content::{execute_block, ActionContext};
use crate::executor::{ChartRegistry, SessionRegistry};
use crate::invoke::{self, InvokeManager, InvokedAs, RunningInvoke};
use crate::scheduler::Scheduler;

/// Safety valve for the W3C Appendix D `mainEventLoop`'s inner eventless-transition
/// loop: a document with, say, two states whose eventless transitions target each
/// other indefinitely would otherwise spin forever. Exceeding this is a fatal
/// interpreter error, not a `error.execution` event, since no further progress is
/// possible within the session.
pub const MAX_EVENTLESS_MICROSTEPS: u32 = 10_000;

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

pub struct Session {
    pub session_id: SessionId,
    chart: Arc<Chart>,
    configuration: OrderedSet<StateId>,
    history: HistoryTable,
    internal_queue: crate::collections::Queue<Event>,
    external_queue: ExternalQueue,
    scheduler: Scheduler,
    datamodel: Box<dyn Datamodel>,
    invokes: Arc<Mutex<InvokeManager>>,
    registry: Arc<SessionRegistry>,
    charts: Arc<ChartRegistry>,
    io_processor: Box<dyn EventIOProcessor>,
    running: bool,
    current_event: Option<Event>,
    /// Set when this session was started via `<invoke>`, so outgoing `#_parent`
    /// sends can be stamped with the invoke id the parent's `<finalize>` needs to
    /// match them against, and so a completed run can report its done data back.
    invoked_as: Option<InvokedAs>,
    /// Namelist/param bindings resolved by the invoking session, applied to this
    /// session's data model right after initialization (W3C 6.4.1).
    invoke_bindings: Vec<(String, Data)>,
    /// `<donedata>` evaluated from the top-level `<final>` state that halted this
    /// session, if any; carried out of `run()` so an invoking session can build the
    /// `done.invoke.<id>` event from it.
    final_done_data: Option<DoneData>,
}

impl Session {
    /// `invokes` must be the same `Arc` the caller used to build `io_processor`'s
    /// `ScxmlEventIOProcessor` — it is this session's own invoke bookkeeping, looked
    /// up by its own `<send target="#_invokeid">` dispatch, not a fresh map.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        chart: Arc<Chart>,
        datamodel_factory: Arc<dyn DatamodelFactory>,
        registry: Arc<SessionRegistry>,
        charts: Arc<ChartRegistry>,
        io_processor: Box<dyn EventIOProcessor>,
        external_queue: ExternalQueue,
        invoked_as: Option<InvokedAs>,
        invoke_bindings: Vec<(String, Data)>,
        invokes: Arc<Mutex<InvokeManager>>,
    ) -> Session {
        let global = crate::datamodel::new_global_data_access(session_id, chart.name.clone());
        let mut datamodel = datamodel_factory.create(global, &chart);
        let _ = datamodel.setup_system_vars();

        Session {
            session_id,
            chart,
            configuration: OrderedSet::new(),
            history: HistoryTable::new(),
            internal_queue: crate::collections::Queue::new(),
            external_queue,
            scheduler: Scheduler::new(),
            datamodel,
            invokes,
            registry,
            charts,
            io_processor,
            running: false,
            current_event: None,
            invoked_as,
            invoke_bindings,
            final_done_data: None,
        }
    }

    pub fn external_sender(&self) -> std::sync::mpsc::Sender<Box<Event>> {
        self.external_queue.sender.clone()
    }

    pub fn configuration(&self) -> &OrderedSet<StateId> {
        &self.configuration
    }

    /// W3C Appendix D `interpret`: binds `In()` against the live configuration,
    /// initializes the data model, performs the initial entry, and runs the
    /// macrostep loop to completion or cancellation. Returns the `<donedata>` of
    /// whichever top-level `<final>` state halted the session, if any.
    pub fn run(mut self) -> (RunOutcome, Option<DoneData>) {
        self.bind_in_predicate();
        self.initialize_data_model();
        for (name, value) in std::mem::take(&mut self.invoke_bindings) {
            if let Err(e) = self.datamodel.assign(&name, value) {
                log::warn!(
                    "session {}: failed to bind invoke param '{name}': {e}",
                    self.session_id
                );
            }
        }
        self.running = true;

        let root_initial = self.chart.state(self.chart.root).initial;
        let entry_transitions: Vec<TransitionId> = root_initial.into_iter().collect();
        let (to_enter, default_entry) =
            configuration::compute_entry_set(&self.chart, &entry_transitions, &self.history);
        self.enter_states(&to_enter, &default_entry);

        let outcome = self.main_event_loop();
        (outcome, self.final_done_data.take())
    }

    fn bind_in_predicate(&mut self) {
        let configuration = Arc::new(Mutex::new(Vec::<String>::new()));
        // The real predicate is rebound after every microstep in `sync_in_predicate`
        // below; this initial empty binding exists only so `setup_system_vars` can
        // run before any state has been entered.
        let snapshot = configuration.clone();
        self.datamodel
            .register_in_predicate(Arc::new(move |name: &str| {
                snapshot.lock().unwrap().iter().any(|s| s == name)
            }));
        self.sync_in_predicate();
    }

    /// Re-derives the closure `In()` checks against, from the current
    /// configuration's state *names*. Called after every configuration change so
    /// `In()` always reflects the live configuration (W3C B.2.3).
    fn sync_in_predicate(&mut self) {
        let names: Vec<String> = self
            .configuration
            .iter()
            .map(|s| self.chart.state(*s).name.clone())
            .collect();
        let names = Arc::new(names);
        self.datamodel
            .register_in_predicate(Arc::new(move |name: &str| names.contains(&name.to_string())));
    }

    fn initialize_data_model(&mut self) {
        for state in &self.chart.states {
            for item in &state.data_items {
                let expr = item.expr.as_deref().or(item.inline.as_deref());
                if let Err(e) = self.datamodel.initialize_data_item(&item.id, expr) {
                    log::warn!(
                        "session {}: failed to initialize <data id=\"{}\">: {e}",
                        self.session_id,
                        item.id
                    );
                }
            }
        }
    }

    /// W3C Appendix D `mainEventLoop`.
    fn main_event_loop(&mut self) -> RunOutcome {
        while self.running {
            self.run_eventless_and_internal();

            if !self.running {
                break;
            }

            let wait = self.scheduler.next_deadline().unwrap_or(Duration::from_secs(3600));
            match self.external_queue.receiver.recv_timeout(wait) {
                Ok(boxed_event) => {
                    let event = *boxed_event;
                    if event.name == "cancel.session" {
                        self.running = false;
                        return RunOutcome::Cancelled;
                    }
                    self.process_external_event(event);
                }
                Err(RecvTimeoutError::Timeout) => {
                    // fall through: due scheduled events are drained at the top of
                    // the next iteration via `run_eventless_and_internal`.
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.running = false;
                }
            }
        }
        RunOutcome::Completed
    }

    /// Drains due scheduled sends into the external queue, then runs the W3C
    /// `mainEventLoop`'s inner loop: keep taking eventless transitions and draining
    /// the internal queue until neither has anything left to offer.
    fn run_eventless_and_internal(&mut self) {
        let due = self.scheduler.due_events();
        for (target, mut event) in due {
            let parsed = SendTarget::parse(&target);
            if parsed == SendTarget::Internal {
                self.internal_queue.enqueue(event);
                continue;
            }
            if parsed == SendTarget::Parent {
                if let Some(invoked) = &self.invoked_as {
                    event.invoke_id = Some(invoked.invoke_id.clone());
                    event.origin = Some(format!("#_scxml_{}", self.session_id));
                    event.origin_type = Some(crate::event_io_processor::SYS_IO_PROCESSOR_SCXML.to_string());
                }
            }
            if let Err(e) = self.io_processor.send(self.session_id, &target, event) {
                self.raise_error(e);
            }
        }

        let mut steps = 0u32;
        loop {
            if !self.running {
                return;
            }
            steps += 1;
            if steps > MAX_EVENTLESS_MICROSTEPS {
                log::error!(
                    "session {}: eventless-transition cycle exceeded {MAX_EVENTLESS_MICROSTEPS} steps, aborting",
                    self.session_id
                );
                self.running = false;
                return;
            }

            let (enabled, errors) = crate::selector::select_eventless_transitions(
                &self.chart,
                &self.configuration,
                self.datamodel.as_mut(),
            );
            for e in errors {
                self.handle_action_error(e);
            }
            if !enabled.is_empty() {
                self.microstep(&enabled);
                continue;
            }

            if let Some(event) = self.internal_queue.dequeue() {
                self.current_event = Some(event.clone());
                let _ = self.datamodel.set_event(&event);
                if event.is_error() || event.name.starts_with("done.") {
                    // still subject to ordinary selection below
                }
                let (enabled, errors) = self.select_for_event(&event.name);
                for e in errors {
                    self.handle_action_error(e);
                }
                if !enabled.is_empty() {
                    self.microstep(&enabled);
                }
                continue;
            }

            break;
        }
    }

    fn process_external_event(&mut self, event: Event) {
        // autoforward before anything else touches the event, per W3C 6.4.
        let active_invoking_states: Vec<StateId> = self
            .configuration
            .iter()
            .filter(|s| !self.chart.state(**s).invokes.is_empty())
            .copied()
            .collect();
        {
            let invokes = self.invokes.lock().unwrap();
            for state in &active_invoking_states {
                invokes.autoforward(*state, &event);
            }
        }

        // W3C 6.4's `<finalize>`: run it against the reply before the reply is
        // otherwise processed, so it can update the data model from the child's
        // result prior to any transition this event also triggers.
        let finalize_blocks = self
            .invokes
            .lock()
            .unwrap()
            .is_invoke_reply(&event)
            .map(|running| running.finalize.clone());

        self.current_event = Some(event.clone());
        let _ = self.datamodel.set_event(&event);

        if let Some(finalize_blocks) = finalize_blocks {
            for content_id in finalize_blocks {
                let block = self.chart.content(content_id).to_vec();
                execute_block(&block, self);
            }
        }

        let (enabled, errors) = self.select_for_event(&event.name);
        for e in errors {
            self.handle_action_error(e);
        }
        if !enabled.is_empty() {
            self.microstep(&enabled);
        }
    }

    fn select_for_event(&mut self, event_name: &str) -> (OrderedSet<TransitionId>, Vec<FsmError>) {
        crate::selector::select_transitions(&self.chart, &self.configuration, self.datamodel.as_mut(), event_name)
    }

    /// W3C Appendix D `microstep`: exit, then execute transition content, then
    /// enter, for one conflict-free transition set.
    fn microstep(&mut self, transitions: &OrderedSet<TransitionId>) {
        let ids: Vec<TransitionId> = transitions.iter().copied().collect();
        self.exit_states(&ids);
        for &t in &ids {
            let content = self.chart.transition(t).content.clone();
            for content_id in content {
                let block = self.chart.content(content_id).to_vec();
                execute_block(&block, self);
            }
        }
        let (to_enter, default_entry) = configuration::compute_entry_set(&self.chart, &ids, &self.history);
        self.enter_states(&to_enter, &default_entry);
    }

    /// W3C Appendix D `exitStates`: computes the exit set, records history, cancels
    /// invocations owned by exited states, runs `onexit`, and removes the states
    /// from the configuration.
    fn exit_states(&mut self, transitions: &[TransitionId]) {
        let mut exit_set: Vec<StateId> = configuration::compute_exit_set(&self.chart, transitions, &self.configuration)
            .iter()
            .copied()
            .collect();
        configuration::exit_order(&mut exit_set);

        for &state in &exit_set {
            let invokes_to_cancel = self.invokes.lock().unwrap().remove_owned_by(state);
            for running in invokes_to_cancel {
                let _ = running.child_sender.send(Box::new(Event::internal("cancel.session")));
            }
        }

        {
            let mut exiting = OrderedSet::new();
            for s in &exit_set {
                exiting.add(*s);
            }
            configuration::record_history(&self.chart, &exiting, &self.configuration, &mut self.history);
        }

        for &state in &exit_set {
            let on_exit = self.chart.state(state).on_exit.clone();
            for content_id in on_exit {
                let block = self.chart.content(content_id).to_vec();
                execute_block(&block, self);
            }
            self.configuration.delete(&state);
        }
        self.sync_in_predicate();
    }

    /// W3C Appendix D `enterStates`: adds states to the configuration in entry
    /// order, runs `onentry`, fires each final state's `done.state.*`, starts any
    /// `<invoke>` declared on newly-entered states, and halts the session if the
    /// chart's top-level state is now in a final configuration.
    fn enter_states(&mut self, to_enter: &OrderedSet<StateId>, default_entry: &OrderedSet<StateId>) {
        let mut entry_order: Vec<StateId> = to_enter.iter().copied().collect();
        configuration::document_order(&mut entry_order);

        let mut entered_finals: Vec<StateId> = Vec::new();
        for &state in &entry_order {
            self.configuration.add(state);
            let on_entry = self.chart.state(state).on_entry.clone();
            for content_id in on_entry {
                let block = self.chart.content(content_id).to_vec();
                execute_block(&block, self);
            }
            self.sync_in_predicate();

            if self.chart.state(state).is_final() {
                self.raise_final_state_done_event(state);
                entered_finals.push(state);
            }

            self.start_invokes(state);

            let _ = default_entry;
        }

        self.raise_parallel_done_events(&entered_finals);

        if configuration::is_in_final_state(&self.chart, self.chart.root, &self.configuration) {
            self.running = false;
        }
    }

    /// W3C 3.4: a `<parallel>` state is "done" once every one of its children is
    /// itself in a final state. Entering one region's `<final>` child can be the
    /// event that newly satisfies this for a parallel ancestor several levels up,
    /// so every just-entered final state's proper ancestors are checked, each
    /// satisfied parallel firing `done.state.<parallelId>` at most once per call.
    fn raise_parallel_done_events(&mut self, entered_finals: &[StateId]) {
        let mut signaled = std::collections::HashSet::new();
        for &final_state in entered_finals {
            for ancestor in self.chart.proper_ancestors(final_state, None) {
                if !self.chart.state(ancestor).is_parallel() || signaled.contains(&ancestor) {
                    continue;
                }
                if configuration::is_in_final_state(&self.chart, ancestor, &self.configuration) {
                    signaled.insert(ancestor);
                    let event = Event::internal(&format!("done.state.{}", self.chart.state(ancestor).name));
                    self.internal_queue.enqueue(event);
                }
            }
        }
    }

    /// Fires `done.state.<parent>` when a `<final>` child of a compound state is
    /// entered (W3C 3.7), carrying that final state's evaluated `<donedata>`. When
    /// the final state is a direct child of the document root, the whole session is
    /// about to halt, so its `<donedata>` is also stashed for `run()` to return —
    /// an invoking session turns it into the `done.invoke.<id>` payload.
    fn raise_final_state_done_event(&mut self, final_state: StateId) {
        let node = self.chart.state(final_state);
        let done_data = match &node.done_data {
            Some(template) => match invoke::evaluate_done_data(template, self.datamodel.as_mut()) {
                Ok(dd) => Some(dd),
                Err(e) => {
                    self.handle_action_error(e);
                    None
                }
            },
            None => None,
        };

        if self.chart.parent(final_state) == Some(self.chart.root) {
            self.final_done_data = done_data.clone();
        }

        let Some(parent) = self.chart.parent(final_state) else {
            return;
        };
        let parent_node = self.chart.state(parent);
        if !parent_node.is_compound() {
            return;
        }
        let mut event = Event::internal(&format!("done.state.{}", parent_node.name));
        event.content = done_data.and_then(|dd| invoke::done_data_to_content(&dd));
        self.internal_queue.enqueue(event);
    }

    /// Resolves and spawns a real child session for every `<invoke>` declared on
    /// `state`, per W3C 6.4: namelist/params are resolved against this session's
    /// data model *before* the child starts, and the child's own run happens on a
    /// dedicated thread so this session's macrostep loop is never blocked by it.
    fn start_invokes(&mut self, state: StateId) {
        let declared = self.chart.state(state).invokes.clone();
        for inv in declared {
            let invoke_id = inv
                .id
                .clone()
                .unwrap_or_else(|| InvokeManager::synthesize_id(&self.chart.state(state).name));

            let child_chart = match inv.src.as_deref().and_then(|src| self.charts.get(src)) {
                Some(chart) => chart,
                None => {
                    self.handle_action_error(FsmError::execution(format!(
                        "<invoke> on '{}' names unknown src '{}'",
                        self.chart.state(state).name,
                        inv.src.as_deref().unwrap_or("")
                    )));
                    continue;
                }
            };

            let bindings = match invoke::resolve_invoke_params(&inv, self.datamodel.as_mut()) {
                Ok(b) => b,
                Err(e) => {
                    self.handle_action_error(e);
                    continue;
                }
            };

            let child_session_id = self.registry.allocate_session_id();
            let external_queue = ExternalQueue::new();
            let sender = external_queue.sender.clone();
            self.registry
                .register(child_session_id, sender.clone(), Some(self.session_id));

            self.invokes.lock().unwrap().register(RunningInvoke {
                invoke_id: invoke_id.clone(),
                invoking_state: state,
                autoforward: inv.autoforward,
                child_session: child_session_id,
                child_sender: sender,
                finalize: inv.finalize.clone(),
            });

            let child_factory = match crate::datamodel::factory_for(&child_chart.binding_datamodel) {
                Ok(f) => f,
                Err(e) => {
                    self.handle_action_error(e);
                    continue;
                }
            };
            let child_invokes = Arc::new(Mutex::new(InvokeManager::new()));
            let child_io = Box::new(crate::event_io_processor::scxml_event_io_processor::ScxmlEventIOProcessor::new(
                self.registry.clone(),
                child_invokes.clone(),
            ));
            let child_session = Session::new(
                child_session_id,
                child_chart,
                child_factory,
                self.registry.clone(),
                self.charts.clone(),
                child_io,
                external_queue,
                Some(InvokedAs {
                    invoke_id: invoke_id.clone(),
                    parent_session: self.session_id,
                }),
                bindings,
                child_invokes,
            );

            let registry = self.registry.clone();
            let parent_session = self.session_id;
            std::thread::spawn(move || {
                let (outcome, done_data) = child_session.run();
                registry.deregister(child_session_id);
                // W3C 6.4: `done.invoke.<id>` is the invoked session reaching its own
                // final state, not the invoking state being exited out from under it
                // (which cancels the child via `remove_owned_by`/`cancel.session`
                // instead of letting it run to completion).
                if matches!(outcome, RunOutcome::Completed) {
                    let event = invoke::done_invoke_event(&invoke_id, done_data);
                    let _ = registry.send_to_session(parent_session, event);
                }
            });
        }
    }

    /// Classifies and queues an action-execution failure as its matching
    /// `error.execution`/`error.communication` internal event (W3C E.1), or halts the
    /// session outright for a fatal interpreter error.
    fn raise_error(&mut self, error: FsmError) {
        self.handle_action_error(error);
    }

    fn handle_action_error(&mut self, error: FsmError) {
        match error {
            FsmError::Fatal { .. } => {
                log::error!("session {}: fatal error: {}", self.session_id, error.message());
                self.running = false;
            }
            other => {
                if let Some(name) = other.event_name() {
                    let invoke_id = self.current_invoke_id().cloned();
                    self.internal_queue
                        .push_back(crate::event::error_event(name, other.message(), invoke_id));
                }
            }
        }
    }
}

impl ActionContext for Session {
    fn datamodel_mut(&mut self) -> &mut dyn Datamodel {
        self.datamodel.as_mut()
    }

    fn raise_internal(&mut self, event: Event) {
        self.internal_queue.enqueue(event);
    }

    fn schedule_send(&mut self, target: String, event: Event, delay: Duration, send_id: Option<SendId>) {
        // Routed through the scheduler even for delay="0"/omitted delay so a
        // `<cancel>` racing a zero-delay `<send>` always has a tombstone to find.
        self.scheduler.schedule(target, event, delay, send_id);
    }

    fn cancel_send(&mut self, send_id: &str) {
        self.scheduler.cancel(send_id);
    }

    fn log(&mut self, text: &str) {
        log::info!("session {}: {text}", self.session_id);
    }

    fn current_invoke_id(&self) -> Option<&InvokeId> {
        self.current_event.as_ref().and_then(|e| e.invoke_id.as_ref())
    }
}
