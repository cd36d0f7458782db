//! I/O Processor implementation for type
//! `http://www.w3.org/TR/scxml/#BasicHTTPEventProcessor`. Included only if feature
//! "BasicHttpEventIOProcessor" is enabled.
//!
//! The inbound HTTP transport server (accepting events from the outside world) is
//! the out-of-scope "HTTP transport server" external collaborator named in this
//! crate's purpose section; this processor only covers the outbound half —
//! dispatching a `<send target="http(s)://...">` as an HTTP POST — using `ureq`,
//! a plain blocking client, since the session's macrostep loop is itself
//! single-threaded and synchronous.

use std::fmt::Debug;

use crate::datamodel::Data;
use crate::error::FsmError;
use crate::event::{CommonContent, Event, SessionId};
use crate::event_io_processor::EventIOProcessor;

pub const BASIC_HTTP_EVENT_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#BasicHTTPEventProcessor";

#[derive(Debug, Default)]
pub struct BasicHttpEventIOProcessor;

impl BasicHttpEventIOProcessor {
    pub fn new() -> BasicHttpEventIOProcessor {
        BasicHttpEventIOProcessor
    }

    fn data_to_param_string(value: &Data) -> String {
        match value {
            Data::String(s) => s.clone(),
            Data::None => String::new(),
            other => format!("{other:?}"),
        }
    }
}

impl EventIOProcessor for BasicHttpEventIOProcessor {
    fn types(&self) -> &[&'static str] {
        &[BASIC_HTTP_EVENT_PROCESSOR, "basichttp"]
    }

    /// Builds the `application/x-www-form-urlencoded` body per §6: `_scxmleventname`
    /// carries the event name exactly once, followed by one pair per `<param>`/
    /// namelist entry. A `<content>`-only send (no params, content given) posts the
    /// content verbatim instead, since the content there stands in for the whole
    /// body rather than a single field.
    fn send(&self, _from_session: SessionId, target: &str, event: Event) -> Result<(), FsmError> {
        if event.params.is_empty() {
            if let Some(CommonContent::Text(body)) = &event.content {
                return ureq::post(target)
                    .send_string(body)
                    .map(|_| ())
                    .map_err(|e| FsmError::communication(format!("POST {target} failed: {e}")));
            }
        }

        let mut form: Vec<(String, String)> = vec![("_scxmleventname".to_string(), event.name.clone())];
        for param in &event.params {
            form.push((param.name.clone(), Self::data_to_param_string(&param.value)));
        }
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        ureq::post(target)
            .send_form(&pairs)
            .map(|_| ())
            .map_err(|e| FsmError::communication(format!("POST {target} failed: {e}")))
    }
}
