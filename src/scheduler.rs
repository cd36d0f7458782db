//! Delayed-send scheduler (C4): `<send delay="...">`'s deferred delivery, and its
//! cancellation via `<cancel sendid="...">`.
//!
//! *W3C says* (6.2.4): "the SCXML Processor MUST evaluate the delay and sendid ...
//! the event MUST NOT be delivered if the SCXML Processor has received a `<cancel>`
//! tag with the matching 'sendid' before the delay has elapsed." A tombstone set
//! checked at delivery time, rather than removing heap entries in place (a binary
//! heap has no efficient arbitrary-element removal), gives exactly that behavior.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use crate::event::{Event, SendId};

/// A delayed event waiting in the scheduler's heap.
#[derive(Debug)]
struct ScheduledEvent {
    fire_at: Instant,
    /// Insertion sequence, used only to keep ordering deterministic for two entries
    /// scheduled at the exact same instant (oldest fires first).
    seq: u64,
    send_id: Option<SendId>,
    target: String,
    event: Event,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    /// `BinaryHeap` is a max-heap; reverse both fields so `.pop()` yields the
    /// earliest-firing, lowest-sequence entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending delayed sends for one session, plus the cancellation
/// tombstone set. Not `Send`-shared: lives entirely inside the owning session's
/// thread, polled once per iteration of the macrostep loop's idle wait.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<ScheduledEvent>,
    cancelled: HashSet<SendId>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Schedules `event` to be dispatched to `target` after `delay`, associated with
    /// `send_id` so a later `<cancel>` can find it.
    pub fn schedule(&mut self, target: String, event: Event, delay: Duration, send_id: Option<SendId>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledEvent {
            fire_at: Instant::now() + delay,
            seq,
            send_id,
            target,
            event,
        });
    }

    /// W3C 6.2.4 `<cancel>`: marks `send_id` so it is dropped silently when (if) it
    /// would otherwise fire. A no-op if the id already fired or never existed.
    pub fn cancel(&mut self, send_id: &str) {
        self.cancelled.insert(send_id.to_string());
    }

    /// The duration the caller should block for before the next pending event fires,
    /// or `None` if the heap is empty (block indefinitely on the external queue).
    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|e| {
            e.fire_at
                .saturating_duration_since(Instant::now())
        })
    }

    /// Pops and returns every `(target, event)` pair whose fire time has passed,
    /// skipping (and discarding the tombstone for) any that were cancelled. Called
    /// once per macrostep loop iteration after the idle wait returns.
    pub fn due_events(&mut self) -> Vec<(String, Event)> {
        let now = Instant::now();
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.fire_at > now {
                break;
            }
            let scheduled = self.heap.pop().unwrap();
            if let Some(id) = &scheduled.send_id {
                if self.cancelled.remove(id) {
                    continue;
                }
            }
            due.push((scheduled.target, scheduled.event));
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Parses the W3C 6.2.4 delay grammar: a non-negative number, optionally suffixed
/// with a unit (`ms`, `s`, `min`, `h`; no suffix means milliseconds). Whitespace
/// around the number is tolerated, matching typical XML attribute authoring. Per
/// spec, an empty, unparseable, or negative delay is not an error: it yields a
/// zero delay rather than aborting the enclosing `<send>`.
pub fn parse_delay(text: &str) -> Duration {
    let text = text.trim();
    if text.is_empty() {
        return Duration::ZERO;
    }
    let split_at = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number_part, unit_part) = text.split_at(split_at);
    let number: f64 = match number_part.parse() {
        Ok(n) if n >= 0.0 => n,
        _ => return Duration::ZERO,
    };
    let millis = match unit_part.trim() {
        "" | "ms" => number,
        "s" => number * 1000.0,
        "min" => number * 60_000.0,
        "h" => number * 3_600_000.0,
        _ => return Duration::ZERO,
    };
    Duration::from_millis(millis.round() as u64)
}
