//! Configuration Manager (C5): the hierarchical-configuration algorithms of W3C
//! Appendix C — `getTransitionDomain`, `findLCCA`, `computeExitSet`/
//! `computeEntrySet`, the `addDescendantStatesToEnter`/`addAncestorStatesToEnter`
//! pair, `isInFinalState`, and history (shallow/deep) recording and restoration.
//!
//! These are free functions over `&Chart` rather than methods on a stateful type —
//! the configuration itself (`OrderedSet<StateId>`) and the history table
//! (`HashMap<StateId, OrderedSet<StateId>>`) are owned by `Session` (C9) and passed
//! in by reference, matching the pseudocode's treatment of `configuration`/
//! `historyValue` as free-standing interpreter variables rather than object state.

use std::collections::HashMap;

use crate::chart::{Chart, HistoryKind, StateId, StateKind, TransitionId};
use crate::collections::OrderedSet;

pub type HistoryTable = HashMap<StateId, OrderedSet<StateId>>;

/// W3C Appendix C `documentOrder` / `entryOrder`: states ordered by ascending id,
/// since `ChartBuilder` assigns ids in document order as states are declared.
pub fn document_order(states: &mut [StateId]) {
    states.sort_by_key(|s| s.0);
}

/// W3C Appendix C `exitOrder`: states ordered by *descending* document order — the
/// reverse of entry order, since children must be exited before their ancestors.
pub fn exit_order(states: &mut [StateId]) {
    states.sort_by_key(|s| std::cmp::Reverse(s.0));
}

/// W3C Appendix C `getTransitionDomain`: the compound state whose exit/entry the
/// transition's effect is confined to.
pub fn get_transition_domain(chart: &Chart, t: TransitionId) -> Option<StateId> {
    let transition = chart.transition(t);
    if transition.targets.is_empty() {
        return None;
    }
    if transition.kind == crate::chart::TransitionKind::Internal
        && chart.state(transition.source).is_compound()
        && transition
            .targets
            .iter()
            .all(|s| chart.is_descendant(*s, transition.source))
    {
        return Some(transition.source);
    }
    let mut all = vec![transition.source];
    all.extend(transition.targets.iter().copied());
    find_lcca(chart, &all)
}

/// W3C Appendix C `findLCCA`: the Least Common Compound Ancestor of a set of states
/// — the nearest proper ancestor (or the state itself, if compound) that is a
/// compound state and a proper ancestor of every member.
pub fn find_lcca(chart: &Chart, state_list: &[StateId]) -> Option<StateId> {
    let head = *state_list.first()?;
    let mut candidates = chart.proper_ancestors(head, None);
    candidates.insert(0, head);
    for candidate in candidates {
        if !is_compound_or_root(chart, candidate) {
            continue;
        }
        if state_list
            .iter()
            .all(|s| *s == candidate || chart.is_descendant(*s, candidate))
        {
            return Some(candidate);
        }
    }
    None
}

fn is_compound_or_root(chart: &Chart, state: StateId) -> bool {
    chart.state(state).is_compound() || state == chart.root
}

/// Resolves a `<history>` pseudostate to the states it should enter: the recorded
/// set if present, otherwise the history node's own default transition's targets.
pub fn resolve_history(
    chart: &Chart,
    history_state: StateId,
    history: &HistoryTable,
) -> OrderedSet<StateId> {
    if let Some(recorded) = history.get(&history_state) {
        return recorded.clone();
    }
    let mut result = OrderedSet::new();
    if let Some(default_transition) = chart.state(history_state).initial {
        for &t in &chart.transition(default_transition).targets {
            result.add(t);
        }
    }
    result
}

/// W3C Appendix C `isInFinalState`: true if `state` is atomic-and-final, or
/// compound-with-an-active-final-child, or parallel-with-every-child-in-final-state.
pub fn is_in_final_state(chart: &Chart, state: StateId, configuration: &OrderedSet<StateId>) -> bool {
    let node = chart.state(state);
    match node.kind {
        StateKind::Compound => node
            .children
            .iter()
            .any(|&child| chart.state(child).is_final() && configuration.is_member(&child)),
        StateKind::Parallel => node
            .children
            .iter()
            .all(|&child| is_in_final_state(chart, child, configuration)),
        _ => false,
    }
}

/// W3C Appendix C `computeExitSet`: the set of active states that the given
/// transitions will exit. Callers walk the result in [`exit_order`] before acting on
/// it.
pub fn compute_exit_set(
    chart: &Chart,
    transitions: &[TransitionId],
    configuration: &OrderedSet<StateId>,
) -> OrderedSet<StateId> {
    let mut states_to_exit = OrderedSet::new();
    for &t in transitions {
        if chart.transition(t).targets.is_empty() {
            continue;
        }
        let domain = get_transition_domain(chart, t);
        // W3C Appendix C `computeExitSet`: strict descendants of the domain always
        // exit; the domain itself exits only for an *external* transition whose
        // domain happens to equal its source (e.g. a self-transition, or an external
        // transition from a compound state into its own descendant). An internal
        // transition's domain is its own compound source (see
        // `get_transition_domain`), which must never exit itself — that is the
        // whole point of "internal" (W3C test 505).
        let transition = chart.transition(t);
        for &s in configuration.iter() {
            if let Some(domain) = domain {
                if chart.is_descendant(s, domain) {
                    states_to_exit.add(s);
                } else if s == domain && transition.kind == crate::chart::TransitionKind::External {
                    states_to_exit.add(s);
                }
            }
        }
    }
    states_to_exit
}

/// W3C Appendix C `computeEntrySet` family: returns `(states_to_enter,
/// states_for_default_entry)` in entry order. `states_for_default_entry` marks which
/// compound states' entry should run their *initial* transition's content
/// (distinguishing "entered via default initial transition" from "entered because a
/// transition explicitly targeted a descendant").
pub fn compute_entry_set(
    chart: &Chart,
    transitions: &[TransitionId],
    history: &HistoryTable,
) -> (OrderedSet<StateId>, OrderedSet<StateId>) {
    let mut states_to_enter = OrderedSet::new();
    let mut states_for_default_entry = OrderedSet::new();

    for &t in transitions {
        let transition = chart.transition(t);
        if transition.targets.is_empty() {
            continue;
        }
        for &target in &transition.targets {
            add_descendant_states_to_enter(
                chart,
                target,
                history,
                &mut states_to_enter,
                &mut states_for_default_entry,
            );
        }
        if let Some(ancestor) = get_transition_domain(chart, t) {
            for &target in &transition.targets {
                add_ancestor_states_to_enter(
                    chart,
                    target,
                    ancestor,
                    history,
                    &mut states_to_enter,
                    &mut states_for_default_entry,
                );
            }
        }
    }

    let mut ordered: Vec<StateId> = states_to_enter.iter().copied().collect();
    document_order(&mut ordered);
    (OrderedSet::from_iter_preserving(ordered), states_for_default_entry)
}

fn already_covers(chart: &Chart, states_to_enter: &OrderedSet<StateId>, child: StateId) -> bool {
    states_to_enter
        .iter()
        .any(|s| *s == child || chart.is_descendant(*s, child))
}

fn add_descendant_states_to_enter(
    chart: &Chart,
    state: StateId,
    history: &HistoryTable,
    states_to_enter: &mut OrderedSet<StateId>,
    states_for_default_entry: &mut OrderedSet<StateId>,
) {
    if chart.state(state).is_history().is_some() {
        let parent = chart.parent(state).unwrap_or(state);
        let resolved = resolve_history(chart, state, history);
        for &s in resolved.iter() {
            add_descendant_states_to_enter(chart, s, history, states_to_enter, states_for_default_entry);
        }
        for &s in resolved.iter() {
            add_ancestor_states_to_enter(chart, s, parent, history, states_to_enter, states_for_default_entry);
        }
        return;
    }

    states_to_enter.add(state);
    let node = chart.state(state);
    if node.is_compound() {
        states_for_default_entry.add(state);
        let default_targets: Vec<StateId> = node
            .initial
            .map(|t| chart.transition(t).targets.clone())
            .unwrap_or_else(|| node.children.first().map(|c| vec![*c]).unwrap_or_default());
        for &s in &default_targets {
            add_descendant_states_to_enter(chart, s, history, states_to_enter, states_for_default_entry);
        }
        for &s in &default_targets {
            add_ancestor_states_to_enter(chart, s, state, history, states_to_enter, states_for_default_entry);
        }
    } else if node.is_parallel() {
        for &child in &node.children {
            if !already_covers(chart, states_to_enter, child) {
                add_descendant_states_to_enter(chart, child, history, states_to_enter, states_for_default_entry);
            }
        }
    }
}

fn add_ancestor_states_to_enter(
    chart: &Chart,
    state: StateId,
    ancestor: StateId,
    history: &HistoryTable,
    states_to_enter: &mut OrderedSet<StateId>,
    states_for_default_entry: &mut OrderedSet<StateId>,
) {
    for anc in chart.proper_ancestors(state, Some(ancestor)) {
        states_to_enter.add(anc);
        if chart.state(anc).is_parallel() {
            for &child in &chart.state(anc).children {
                if !already_covers(chart, states_to_enter, child) {
                    add_descendant_states_to_enter(chart, child, history, states_to_enter, states_for_default_entry);
                }
            }
        }
    }
}

/// Records history for every `<history>` pseudostate whose parent is in the exit
/// set, per W3C Appendix C `exitStates`'s history-recording step: shallow history
/// records the parent's direct active children; deep history records the parent's
/// active atomic descendants.
pub fn record_history(
    chart: &Chart,
    exiting: &OrderedSet<StateId>,
    configuration: &OrderedSet<StateId>,
    history: &mut HistoryTable,
) {
    for &s in exiting.iter() {
        for &child in &chart.state(s).children {
            if let Some(kind) = chart.state(child).is_history() {
                let recorded = match kind {
                    HistoryKind::Shallow => {
                        let mut r = OrderedSet::new();
                        for &active_child in &chart.state(s).children {
                            if configuration.is_member(&active_child) {
                                r.add(active_child);
                            }
                        }
                        r
                    }
                    HistoryKind::Deep => {
                        let mut r = OrderedSet::new();
                        for &active in configuration.iter() {
                            if chart.state(active).is_atomic() && chart.is_descendant(active, s) {
                                r.add(active);
                            }
                        }
                        r
                    }
                };
                history.insert(child, recorded);
            }
        }
    }
}

impl<T: Clone + PartialEq> OrderedSet<T> {
    /// Builds a set from an already-deduplicated, already-ordered `Vec`, skipping
    /// the linear `is_member` scan `add` would otherwise perform per element.
    pub fn from_iter_preserving(items: Vec<T>) -> OrderedSet<T> {
        let mut set = OrderedSet::new();
        for item in items {
            set.add(item);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartBuilder, StateKind, TransitionKind};

    fn build_parent_child_chart() -> (Chart, StateId, StateId, StateId) {
        let mut b = ChartBuilder::new("t");
        let root = b.add_state("root", StateKind::Compound, None);
        let a = b.add_state("a", StateKind::Compound, Some(root));
        let a1 = b.add_state("a1", StateKind::Atomic, Some(a));
        let a2 = b.add_state("a2", StateKind::Atomic, Some(a));
        let init = b.add_transition(a, vec![a1], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(a, init);
        let root_init = b.add_transition(root, vec![a], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(root, root_init);
        let chart = b.build().unwrap();
        (chart, a, a1, a2)
    }

    #[test]
    fn find_lcca_of_siblings_is_their_parent() {
        let (chart, a, a1, a2) = build_parent_child_chart();
        let lcca = find_lcca(&chart, &[a1, a2]);
        assert_eq!(lcca, Some(a));
    }

    #[test]
    fn is_in_final_state_true_when_final_child_active() {
        let mut b = ChartBuilder::new("t");
        let root = b.add_state("root", StateKind::Compound, None);
        let done = b.add_state("done", StateKind::Final, Some(root));
        let chart = b.build().unwrap();
        let mut config = OrderedSet::new();
        config.add(done);
        assert!(is_in_final_state(&chart, root, &config));
    }

    #[test]
    fn compute_entry_set_includes_default_initial_descendants() {
        let (chart, a, a1, _a2) = build_parent_child_chart();
        let history = HistoryTable::new();
        let root_init = chart.state(chart.root).initial.unwrap();
        let (to_enter, default_entry) = compute_entry_set(&chart, &[root_init], &history);
        assert!(to_enter.is_member(&a));
        assert!(to_enter.is_member(&a1));
        assert!(default_entry.is_member(&a));
    }

    /// Builds `p` (compound, children `a`/`b`/`histShallow`/`histDeep`) where `a` is
    /// itself compound with a nested compound child `a1` (atomic grandchildren `a1x`/
    /// `a1y`), so shallow and deep history have different things to record: shallow
    /// sees only `a` as `p`'s active direct child, deep sees the atomic leaf `a1x`.
    fn build_history_chart() -> (Chart, StateId, StateId, StateId, StateId, StateId, StateId, TransitionId) {
        let mut b = ChartBuilder::new("hist");
        let root = b.add_state("root", StateKind::Compound, None);
        let p = b.add_state("p", StateKind::Compound, Some(root));
        let a = b.add_state("a", StateKind::Compound, Some(p));
        let a1 = b.add_state("a1", StateKind::Compound, Some(a));
        let a1x = b.add_state("a1x", StateKind::Atomic, Some(a1));
        let _a1y = b.add_state("a1y", StateKind::Atomic, Some(a1));
        let _b_state = b.add_state("b", StateKind::Atomic, Some(p));
        let hist_shallow = b.add_state("histShallow", StateKind::History(HistoryKind::Shallow), Some(p));
        let hist_deep = b.add_state("histDeep", StateKind::History(HistoryKind::Deep), Some(p));

        let a1_init = b.add_transition(a1, vec![a1x], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(a1, a1_init);
        let a_init = b.add_transition(a, vec![a1], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(a, a_init);
        let p_init = b.add_transition(p, vec![a], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(p, p_init);
        let root_init = b.add_transition(root, vec![p], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(root, root_init);
        // Shallow history's own default transition (used if nothing was ever recorded).
        let hist_shallow_default = b.add_transition(hist_shallow, vec![a], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(hist_shallow, hist_shallow_default);
        let hist_deep_default = b.add_transition(hist_deep, vec![a1x], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(hist_deep, hist_deep_default);
        // A re-entry transition targeting the deep history pseudostate directly, so
        // tests can exercise `compute_entry_set` against it without reaching into
        // `ChartBuilder` internals after `build()`.
        let reenter_via_deep_history = b.add_transition(p, vec![hist_deep], vec!["go".to_string()], None, TransitionKind::External, vec![]);

        let chart = b.build().unwrap();
        (chart, p, a, a1, a1x, hist_shallow, hist_deep, reenter_via_deep_history)
    }

    /// Law: "if a compound state P with shallow history H is exited with child C
    /// active and re-entered via H, the next active child of P is C" — here C is `a`
    /// (P's direct active child), not the deeper `a1x` that also happens to be active.
    #[test]
    fn shallow_history_records_only_direct_active_child() {
        let (chart, p, a, a1, a1x, hist_shallow, _hist_deep, _reentry) = build_history_chart();
        let mut config = OrderedSet::new();
        config.add(p);
        config.add(a);
        config.add(a1);
        config.add(a1x);
        let mut exiting = OrderedSet::new();
        exiting.add(p);
        exiting.add(a);
        exiting.add(a1);
        exiting.add(a1x);

        let mut history = HistoryTable::new();
        record_history(&chart, &exiting, &config, &mut history);

        let recorded = history.get(&hist_shallow).expect("shallow history recorded");
        assert_eq!(recorded.as_slice(), &[a]);
        assert!(!recorded.is_member(&a1x));

        let resolved = resolve_history(&chart, hist_shallow, &history);
        assert_eq!(resolved.as_slice(), &[a]);
    }

    /// Law: deep history restores the entire leaf-descendant configuration under P —
    /// here the atomic grandchild `a1x`, not just P's direct child `a`.
    #[test]
    fn deep_history_restores_full_leaf_configuration() {
        let (chart, p, a, a1, a1x, _hist_shallow, hist_deep, reenter_via_deep_history) = build_history_chart();
        let mut config = OrderedSet::new();
        config.add(p);
        config.add(a);
        config.add(a1);
        config.add(a1x);
        let mut exiting = OrderedSet::new();
        exiting.add(p);
        exiting.add(a);
        exiting.add(a1);
        exiting.add(a1x);

        let mut history = HistoryTable::new();
        record_history(&chart, &exiting, &config, &mut history);

        let recorded = history.get(&hist_deep).expect("deep history recorded");
        assert_eq!(recorded.as_slice(), &[a1x]);

        // Re-entering via the deep history pseudostate must restore the full chain
        // of ancestors down to the recorded leaf, not just the leaf itself.
        let (to_enter, _default_entry) = compute_entry_set(&chart, &[reenter_via_deep_history], &history);
        assert!(to_enter.is_member(&a));
        assert!(to_enter.is_member(&a1));
        assert!(to_enter.is_member(&a1x));
    }

    /// W3C test 505: an internal transition whose source is compound and whose
    /// target is a proper descendant of that source must not exit the source
    /// itself, only the descendant it is re-entering.
    #[test]
    fn internal_transition_does_not_exit_its_compound_source() {
        let mut b = ChartBuilder::new("t2");
        let root = b.add_state("root", StateKind::Compound, None);
        let s1 = b.add_state("s1", StateKind::Compound, Some(root));
        let s11 = b.add_state("s11", StateKind::Atomic, Some(s1));
        let inner_init = b.add_transition(s1, vec![s11], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(s1, inner_init);
        let root_init = b.add_transition(root, vec![s1], vec![], None, TransitionKind::External, vec![]);
        b.set_initial(root, root_init);
        let foo = b.add_transition(s1, vec![s11], vec!["foo".to_string()], None, TransitionKind::Internal, vec![]);
        let chart = b.build().unwrap();

        let mut config = OrderedSet::new();
        config.add(s1);
        config.add(s11);
        let exit_set = compute_exit_set(&chart, &[foo], &config);
        assert!(!exit_set.is_member(&s1));
        assert!(exit_set.is_member(&s11));
    }
}
