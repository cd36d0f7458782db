//! Event I/O Processors (part of C3): target-based dispatch for `<send>`.
//!
//! *W3C says* (6.2): "the 'target' ... specifies ... where the event should be
//! dispatched" via special targets `#_internal`, `#_parent`, `#_scxml_sessionid`,
//! `#_invokeid`, or a processor-specific target such as an absolute URI.

use std::fmt::Debug;

use crate::error::FsmError;
use crate::event::{Event, SessionId};

#[cfg(feature = "BasicHttpEventIOProcessor")]
pub mod http_event_io_processor;

pub mod scxml_event_io_processor;

pub const SYS_IO_PROCESSOR_SCXML: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";

/// A resolved `<send>` target, per W3C 6.2's special-target grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Internal,
    /// No `target` attribute: the sending session's own external queue (W3C 6.2:
    /// "If the 'target' is not specified... add the event to the external event
    /// queue of the sending session"). Represented as an empty string on the wire
    /// (see `executable_content::Send::execute`) since there is no `#_...` spelling
    /// for it in the grammar.
    SelfExternal,
    Parent,
    Session(SessionId),
    Invoke(String),
    Uri(String),
    Invalid(String),
}

impl SendTarget {
    pub fn parse(target: &str) -> SendTarget {
        if target.is_empty() {
            return SendTarget::SelfExternal;
        }
        if target == "#_internal" {
            return SendTarget::Internal;
        }
        if target == "#_parent" {
            return SendTarget::Parent;
        }
        if let Some(rest) = target.strip_prefix("#_scxml_") {
            return match rest.parse::<SessionId>() {
                Ok(id) => SendTarget::Session(id),
                Err(_) => SendTarget::Invalid(target.to_string()),
            };
        }
        if let Some(rest) = target.strip_prefix("#_") {
            if !rest.is_empty() {
                return SendTarget::Invoke(rest.to_string());
            }
        }
        if target.starts_with('!') {
            return SendTarget::Invalid(target.to_string());
        }
        if target.starts_with("http://") || target.starts_with("https://") {
            return SendTarget::Uri(target.to_string());
        }
        SendTarget::Invalid(target.to_string())
    }
}

/// Bound to one session; dispatches a resolved event to its target. Held by
/// `Session` (C9), constructed with a handle onto the owning `SessionRegistry` so
/// `#_parent`/`#_scxml_<id>`/`#_<invokeid>` targets can be routed without the
/// session needing direct knowledge of its siblings.
pub trait EventIOProcessor: Debug + Send {
    fn types(&self) -> &[&'static str];

    fn send(&self, from_session: SessionId, target: &str, event: Event) -> Result<(), FsmError>;
}
