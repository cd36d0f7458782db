//! General-purpose ordered collection types used throughout the algorithm.
//!
//! The W3C SCXML Appendix C pseudocode is written against an `OrderedSet` and a
//! `Queue` with a handful of named operations (`isMember`, `hasIntersection`,
//! `enqueue`/`dequeue`, ...). Rather than translate every pseudocode line through
//! `Vec`/`HashSet`/`VecDeque` ad hoc, the core keeps these two small wrappers so the
//! algorithms in [`crate::configuration`] and [`crate::selector`] read the same
//! shape as the spec they implement.

use std::collections::VecDeque;
use std::slice::Iter;

/// W3C pseudocode `OrderedSet` — insertion-ordered, no duplicate members.
///
/// *W3C says*: the algorithm assumes a Lisp-like semantics in which the empty set
/// `null` is equivalent to boolean `false` and all other entities are equivalent to
/// `true`.
#[derive(Debug, Clone)]
pub struct OrderedSet<T> {
    data: Vec<T>,
}

impl<T> Default for OrderedSet<T> {
    fn default() -> Self {
        OrderedSet { data: Vec::new() }
    }
}

impl<T: Clone + PartialEq> OrderedSet<T> {
    pub fn new() -> OrderedSet<T> {
        OrderedSet { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Adds `e` to the set if it is not already a member.
    pub fn add(&mut self, e: T) {
        if !self.is_member(&e) {
            self.data.push(e);
        }
    }

    pub fn delete(&mut self, e: &T) {
        self.data.retain(|x| x != e);
    }

    /// Adds all members of `s` that are not already members of this set.
    pub fn union(&mut self, s: &OrderedSet<T>) {
        for item in &s.data {
            self.add(item.clone());
        }
    }

    pub fn is_member(&self, e: &T) -> bool {
        self.data.contains(e)
    }

    pub fn some<F: Fn(&T) -> bool>(&self, f: F) -> bool {
        self.data.iter().any(|t| f(t))
    }

    pub fn every<F: Fn(&T) -> bool>(&self, f: F) -> bool {
        self.data.iter().all(|t| f(t))
    }

    /// True if this set and `s` have at least one member in common.
    pub fn has_intersection(&self, s: &OrderedSet<T>) -> bool {
        self.data.iter().any(|x| s.is_member(x))
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Returns the set's members as a plain slice, preserving insertion order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.data.iter()
    }
}

impl<T: PartialEq> PartialEq for OrderedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data.len() == other.data.len() && self.data.iter().all(|x| other.data.contains(x))
    }
}

/// Plain internal-queue FIFO. External cross-thread handoff uses `mpsc` channels
/// directly (see [`crate::event::ExternalQueue`]) rather than this type, since the
/// internal queue never crosses a thread boundary.
#[derive(Debug, Default)]
pub struct Queue<T> {
    data: VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Queue<T> {
        Queue {
            data: VecDeque::new(),
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn enqueue(&mut self, e: T) {
        self.data.push_back(e);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.data.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
