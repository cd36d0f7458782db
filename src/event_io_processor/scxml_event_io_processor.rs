//! Implementation of the SCXML I/O Event Processor: type
//! `http://www.w3.org/TR/scxml/#SCXMLEventProcessor` (or the shortcut `scxml`).
//!
//! *W3C says*: `#_internal` adds the event to the sending session's own internal
//! queue; `#_scxml_sessionid` and `#_parent` add it to another session's *external*
//! queue; `#_invokeid` likewise, for a session the sender started via `<invoke>`.
//! Any other, unsupported target must raise `error.communication`.

use std::fmt::Debug;

use crate::error::FsmError;
use crate::event::{Event, SessionId};
use crate::event_io_processor::{EventIOProcessor, SendTarget};
use crate::executor::SessionRegistry;
use crate::invoke::InvokeManager;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct ScxmlEventIOProcessor {
    registry: Arc<SessionRegistry>,
    invokes: Arc<Mutex<InvokeManager>>,
    #[cfg(feature = "BasicHttpEventIOProcessor")]
    http: crate::event_io_processor::http_event_io_processor::BasicHttpEventIOProcessor,
}

impl ScxmlEventIOProcessor {
    pub fn new(registry: Arc<SessionRegistry>, invokes: Arc<Mutex<InvokeManager>>) -> ScxmlEventIOProcessor {
        ScxmlEventIOProcessor {
            registry,
            invokes,
            #[cfg(feature = "BasicHttpEventIOProcessor")]
            http: crate::event_io_processor::http_event_io_processor::BasicHttpEventIOProcessor::new(),
        }
    }
}

impl EventIOProcessor for ScxmlEventIOProcessor {
    fn types(&self) -> &[&'static str] {
        &[
            "http://www.w3.org/TR/scxml/#SCXMLEventProcessor",
            "scxml",
        ]
    }

    fn send(&self, from_session: SessionId, target: &str, event: Event) -> Result<(), FsmError> {
        match SendTarget::parse(target) {
            SendTarget::Internal => {
                // The session driver intercepts `#_internal` before ever reaching an
                // I/O processor (it is simply `raise_internal`); reaching here means
                // a caller routed a `#_internal` send through dispatch by mistake.
                Err(FsmError::communication(
                    "#_internal must be handled by the session, not dispatched",
                ))
            }
            SendTarget::SelfExternal => self
                .registry
                .send_to_session(from_session, event)
                .map_err(FsmError::communication),
            SendTarget::Session(id) => self
                .registry
                .send_to_session(id, event)
                .map_err(FsmError::communication),
            SendTarget::Parent => {
                let parent = self
                    .registry
                    .parent_of(from_session)
                    .ok_or_else(|| FsmError::communication("session has no parent"))?;
                self.registry
                    .send_to_session(parent, event)
                    .map_err(FsmError::communication)
            }
            SendTarget::Invoke(invoke_id) => {
                let invokes = self.invokes.lock().unwrap();
                let running = invokes
                    .get(&invoke_id)
                    .ok_or_else(|| FsmError::communication(format!("no invoke '{invoke_id}'")))?;
                running
                    .child_sender
                    .send(Box::new(event))
                    .map_err(|e| FsmError::communication(e.to_string()))
            }
            #[cfg(feature = "BasicHttpEventIOProcessor")]
            SendTarget::Uri(uri) => self.http.send(from_session, &uri, event),
            #[cfg(not(feature = "BasicHttpEventIOProcessor"))]
            SendTarget::Uri(_) => Err(FsmError::communication(format!(
                "target '{target}' requires the BasicHttpEventIOProcessor feature"
            ))),
            SendTarget::Invalid(_) => {
                Err(FsmError::communication(format!("unsupported send target '{target}'")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_unknown_invoke_is_a_communication_error() {
        let registry = Arc::new(SessionRegistry::new());
        let invokes = Arc::new(Mutex::new(InvokeManager::new()));
        let processor = ScxmlEventIOProcessor::new(registry, invokes);
        let result = processor.send(1, "#_nosuchinvoke", Event::internal("x"));
        assert!(matches!(result, Err(FsmError::Communication { .. })));
    }

    #[test]
    fn send_to_internal_target_is_rejected_here() {
        let registry = Arc::new(SessionRegistry::new());
        let invokes = Arc::new(Mutex::new(InvokeManager::new()));
        let processor = ScxmlEventIOProcessor::new(registry, invokes);
        let result = processor.send(1, "#_internal", Event::internal("x"));
        assert!(result.is_err());
    }
}
