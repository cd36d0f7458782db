//! Event and identifier types shared by every component (W3C 5.10, 6.4).

use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{Receiver, Sender};

use crate::datamodel::Data;

/// Opaque session identifier. Sessions are created in increasing order starting at 1;
/// `0` is reserved as "no session" (used as a placeholder before a child invoke's
/// session is spawned).
pub type SessionId = u32;

/// Identifier of a running `<invoke>`, unique within the invoking session.
pub type InvokeId = String;

/// Identifier of a pending `<send>`, used later by `<cancel>`.
pub type SendId = String;

/// Generates a `send_<n>` id for a `<send>` that did not supply its own `sendid`
/// (W3C 6.2.4: "If the 'id' attribute is not present, the SCXML Processor must
/// generate an id"), process-wide and monotonic so ids never collide across
/// sessions sharing one process.
pub fn generate_send_id() -> SendId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("send_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// The three places W3C 5.10.1 distinguishes an event as having originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Raised internally (`<raise>`, `done.state.*`, `error.*`, autoforwarded...).
    Internal,
    /// Came from outside the session (external queue), including from a sibling
    /// session's `<send>`.
    External,
    /// Came from the session's own platform (implementation-defined origin).
    Platform,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Internal => "internal",
            EventType::External => "external",
            EventType::Platform => "platform",
        };
        write!(f, "{s}")
    }
}

/// A single `<param>` resolved to a concrete value, passed along with a `<send>` or
/// `<invoke>`.
#[derive(Debug, Clone)]
pub struct ParamPair {
    pub name: String,
    pub value: Data,
}

/// `<content>` resolved for a `<send>`/`<invoke>`: either raw text or a structured
/// value produced by evaluating an expression.
#[derive(Debug, Clone)]
pub enum CommonContent {
    None,
    Text(String),
    Value(Data),
}

/// The final `<donedata>` payload attached to a `done.state.*`/`done.invoke.*` event.
#[derive(Debug, Clone, Default)]
pub struct DoneData {
    pub content: Option<CommonContent>,
    pub params: Vec<ParamPair>,
}

/// An SCXML event (W3C 5.10.1 `_event`). `origin`/`origintype`/`invoke_id` are
/// populated exactly the way the W3C table prescribes so `<send target="#_parent">`
/// and the invoke autoforward/finalize machinery can thread the reply back correctly.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub event_type: EventType,
    pub send_id: Option<SendId>,
    pub origin: Option<String>,
    pub origin_type: Option<String>,
    /// Set when the event was produced by, or is a reply to, an `<invoke>` — e.g. an
    /// autoforwarded event carries the invoking state's invoke id.
    pub invoke_id: Option<InvokeId>,
    pub content: Option<CommonContent>,
    pub params: Vec<ParamPair>,
}

impl Event {
    pub fn new(name: &str, event_type: EventType) -> Event {
        Event {
            name: name.to_string(),
            event_type,
            send_id: None,
            origin: None,
            origin_type: None,
            invoke_id: None,
            content: None,
            params: Vec::new(),
        }
    }

    pub fn internal(name: &str) -> Event {
        Event::new(name, EventType::Internal)
    }

    pub fn external(name: &str) -> Event {
        Event::new(name, EventType::External)
    }

    /// True if `name` is matched by an event descriptor as defined by W3C 3.12.1:
    /// `descriptor` may end in `.*` (prefix match) or be exactly `*` (matches
    /// anything). A plain descriptor with no wildcard is itself a token-prefix match —
    /// `foo` matches `foo`, `foo.bar`, and `foo.bar.baz` — not just an exact name, so
    /// `event="error"` fires on `error.execution` and `event="done.invoke"` fires on
    /// `done.invoke.childinv`.
    pub fn name_matches_descriptor(name: &str, descriptor: &str) -> bool {
        if descriptor == "*" {
            return true;
        }
        if let Some(prefix) = descriptor.strip_suffix(".*") {
            return name == prefix || name.starts_with(&format!("{prefix}."));
        }
        if let Some(prefix) = descriptor.strip_suffix("*") {
            return name.starts_with(prefix);
        }
        name == descriptor || name.starts_with(&format!("{descriptor}."))
    }

    pub fn is_error(&self) -> bool {
        self.name.starts_with("error.")
    }
}

/// W3C test 178: folds a sequence of name/value pairs into a `(name, value)` list
/// where a name used more than once becomes a single entry holding an array of each
/// value in the order given, rather than the last occurrence silently overwriting
/// the first. Shared by `_event.data` construction, `<donedata>`, and `<invoke>`
/// namelist/param resolution — every place W3C 6.3.2/178 requires the same rule.
pub fn fold_duplicate_names(pairs: impl IntoIterator<Item = (String, Data)>) -> Vec<(String, Data)> {
    let mut folded: Vec<(String, Data)> = Vec::new();
    for (name, value) in pairs {
        match folded.iter().position(|(n, _)| *n == name) {
            Some(i) => match &mut folded[i].1 {
                Data::Array(items) => items.push(value),
                existing => {
                    let first = existing.clone();
                    *existing = Data::Array(vec![first, value]);
                }
            },
            None => folded.push((name, value)),
        }
    }
    folded
}

/// W3C 5.10/test 178: resolves what `_event.data` is for a given event. `content` (if
/// present) becomes the entire payload verbatim; otherwise `params` are folded into an
/// object via [`fold_duplicate_names`].
pub fn event_data(content: &Option<CommonContent>, params: &[ParamPair]) -> Data {
    match content {
        Some(CommonContent::Text(t)) => Data::String(t.clone()),
        Some(CommonContent::Value(v)) => v.clone(),
        Some(CommonContent::None) | None => {
            if params.is_empty() {
                return Data::None;
            }
            let pairs = params.iter().map(|p| (p.name.clone(), p.value.clone()));
            Data::Object(fold_duplicate_names(pairs))
        }
    }
}

/// Builds a W3C `error.execution`/`error.communication` event. Content carries the
/// error message so a datamodel implementation can surface it via `_event.data`.
pub fn error_event(error_name: &str, message: &str, invoke_id: Option<InvokeId>) -> Event {
    let mut ev = Event::internal(error_name);
    ev.content = Some(CommonContent::Text(message.to_string()));
    ev.invoke_id = invoke_id;
    ev
}

/// The external, cross-thread event queue half owned by a session's handle: a
/// `Sender<Box<Event>>` other sessions/threads hold to enqueue external events, and
/// the matching blocking `Receiver` the session's own thread drains. Mirrors the
/// teacher's `BlockingQueue`, built directly on `std::sync::mpsc` instead of a
/// hand-rolled condvar queue, since that is exactly what `mpsc` already provides.
pub struct ExternalQueue {
    pub sender: Sender<Box<Event>>,
    pub receiver: Receiver<Box<Event>>,
}

impl ExternalQueue {
    pub fn new() -> ExternalQueue {
        let (sender, receiver) = std::sync::mpsc::channel();
        ExternalQueue { sender, receiver }
    }
}

impl Default for ExternalQueue {
    fn default() -> Self {
        ExternalQueue::new()
    }
}
