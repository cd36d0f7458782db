//! Transition Selector (C6): W3C Appendix C `selectTransitions` /
//! `selectEventlessTransitions` and `removeConflictingTransitions`.
//!
//! *W3C says* (3.13): "transitions are removed from the transition set if they are
//! preempted by a transition with higher priority (i.e. one whose source state is a
//! descendant of the first transition's source state), or if they conflict with a
//! higher-priority transition (taking the first one found in document order)."

use crate::chart::{Chart, StateId, TransitionId};
use crate::collections::OrderedSet;
use crate::datamodel::Datamodel;
use crate::error::FsmError;

/// Returns the first enabled transition (by document order) out of each atomic
/// state's own transitions and its ancestors', for every atomic state currently in
/// `configuration` — the shared body of both `selectTransitions` and
/// `selectEventlessTransitions`. `event_name` is `None` for eventless selection.
///
/// W3C 5.9.1: a guard that fails to evaluate does not abort the whole selection
/// pass — only that candidate is treated as not enabled (as if its `cond` were
/// false), and selection continues with the remaining candidates and atomic
/// states. Each such failure is returned in the second element of the result
/// tuple so the caller can raise exactly one `error.execution` per failure.
fn select_transitions_matching(
    chart: &Chart,
    configuration: &OrderedSet<StateId>,
    datamodel: &mut dyn Datamodel,
    event_name: Option<&str>,
) -> (OrderedSet<TransitionId>, Vec<FsmError>) {
    let mut enabled = OrderedSet::new();
    let mut errors = Vec::new();
    let mut atomic_states: Vec<StateId> = configuration
        .iter()
        .filter(|&&s| chart.state(s).is_atomic())
        .copied()
        .collect();
    atomic_states.sort_by_key(|s| s.0);

    for state in atomic_states {
        let mut found = false;
        let mut current = Some(state);
        'ancestors: while let Some(s) = current {
            let node = chart.state(s);
            let mut candidates: Vec<TransitionId> = node.transitions.clone();
            candidates.sort_by_key(|t| chart.transition(*t).document_order);
            for t in candidates {
                let transition = chart.transition(t);
                let event_ok = match event_name {
                    None => transition.is_eventless(),
                    Some(name) => !transition.is_eventless() && transition.matches_event(name),
                };
                if !event_ok {
                    continue;
                }
                let cond_ok = match &transition.cond {
                    None => true,
                    Some(expr) => match datamodel.eval_cond(expr) {
                        Ok(ok) => ok,
                        Err(e) => {
                            errors.push(e);
                            false
                        }
                    },
                };
                if cond_ok {
                    enabled.add(t);
                    found = true;
                    break 'ancestors;
                }
            }
            if found {
                break;
            }
            current = chart.parent(s);
        }
    }

    (remove_conflicting_transitions(chart, &enabled, configuration), errors)
}

pub fn select_eventless_transitions(
    chart: &Chart,
    configuration: &OrderedSet<StateId>,
    datamodel: &mut dyn Datamodel,
) -> (OrderedSet<TransitionId>, Vec<FsmError>) {
    select_transitions_matching(chart, configuration, datamodel, None)
}

pub fn select_transitions(
    chart: &Chart,
    configuration: &OrderedSet<StateId>,
    datamodel: &mut dyn Datamodel,
    event_name: &str,
) -> (OrderedSet<TransitionId>, Vec<FsmError>) {
    select_transitions_matching(chart, configuration, datamodel, Some(event_name))
}

/// W3C Appendix C `removeConflictingTransitions`: resolves conflicts so that the
/// returned set contains no two transitions whose exit sets intersect, preferring
/// the transition sourced from the more deeply nested (higher priority) state, and
/// within equal priority the one appearing first in document order.
fn remove_conflicting_transitions(
    chart: &Chart,
    enabled_transitions: &OrderedSet<TransitionId>,
    configuration: &OrderedSet<StateId>,
) -> OrderedSet<TransitionId> {
    let mut filtered = OrderedSet::new();
    for &t1 in enabled_transitions.iter() {
        let mut t1_preempted = false;
        let mut transitions_to_remove = OrderedSet::new();
        let exit1 = crate::configuration::compute_exit_set(chart, &[t1], configuration);

        for &t2 in filtered.iter() {
            let exit2 = crate::configuration::compute_exit_set(chart, &[t2], configuration);
            if exit1.has_intersection(&exit2) {
                if chart.is_descendant(chart.transition(t1).source, chart.transition(t2).source) {
                    transitions_to_remove.add(t2);
                } else {
                    t1_preempted = true;
                    break;
                }
            }
        }

        if !t1_preempted {
            for removed in transitions_to_remove.iter() {
                filtered.delete(removed);
            }
            filtered.add(t1);
        }
    }
    filtered
}
