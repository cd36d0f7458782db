//! Data Model Engine Bridge (C2): the trait every scripting backend implements, plus
//! the session-global data shared across a datamodel's lifetime and the trivial
//! `NullDatamodel` (W3C Appendix B.1 — `datamodel="null"`).
//!
//! *W3C says*: "the Null data model... provides the minimal functionality required
//! by the algorithm, and is intended for apps that use SCXML for flow control and
//! event handling, but not for storing data." The only expression form it must
//! support is `In(stateId)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::chart::Chart;
use crate::error::FsmError;
use crate::event::{Event, SessionId};

/// JSON-compatible value exchanged across the bridge: assignment targets, `<param>`
/// values, `_event.data`, and `<donedata>` content all flow through this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    None,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<Data>),
    Object(Vec<(String, Data)>),
}

impl Data {
    pub fn is_array(&self) -> bool {
        matches!(self, Data::Array(_))
    }

    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Data::None => false,
            Data::Bool(b) => *b,
            Data::Integer(i) => *i != 0,
            Data::Double(d) => *d != 0.0,
            Data::String(s) => !s.is_empty(),
            Data::Array(a) => !a.is_empty(),
            Data::Object(o) => !o.is_empty(),
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Bool(b)
    }
}

/// Data shared by every state in one session's data model (the `_sessionid`,
/// `_name`, `_ioprocessors` system variables plus `_event`), kept behind a lock so
/// the owning session's single-threaded macrostep loop and any callback the
/// scripting engine invokes synchronously see the same view. Grounded on the
/// teacher's `GlobalDataAccess`/`GlobalData` pair.
#[derive(Debug, Clone)]
pub struct GlobalData {
    pub session_id: SessionId,
    pub name: String,
    pub io_processors: Vec<String>,
    pub running: bool,
}

pub type GlobalDataAccess = Arc<Mutex<GlobalData>>;

pub fn new_global_data_access(session_id: SessionId, name: String) -> GlobalDataAccess {
    Arc::new(Mutex::new(GlobalData {
        session_id,
        name,
        io_processors: vec!["http://www.w3.org/TR/scxml/#SCXMLEventProcessor".to_string()],
        running: true,
    }))
}

/// The bridge contract (C2). One instance is created per session and lives for the
/// session's lifetime; `In(stateId)` is registered as a native callback against the
/// session's live configuration via `register_native`, so the predicate always
/// reflects the *current* macrostep's configuration rather than a stale snapshot.
pub trait Datamodel: Send {
    fn global(&self) -> &GlobalDataAccess;

    fn name(&self) -> &'static str;

    /// Binds the read-only system variables (`_sessionid`, `_name`,
    /// `_ioprocessors`) into the engine, rejecting later writes to them.
    fn setup_system_vars(&mut self) -> Result<(), FsmError>;

    /// Registers the native `In(stateId)` predicate against `is_in_state`, a
    /// closure the session provides so the datamodel never needs its own copy of
    /// the live configuration.
    fn register_in_predicate(&mut self, is_in_state: Arc<dyn Fn(&str) -> bool + Send + Sync>);

    /// Initializes `<datamodel>` children at document/state entry, per `<data>`
    /// item. `expr` is evaluated against the current bindings; omitted for items
    /// with only inline content.
    fn initialize_data_item(&mut self, id: &str, expr: Option<&str>) -> Result<(), FsmError>;

    /// Rebinds `_event` ahead of evaluating a transition's condition/content for the
    /// event that triggered it. Not called for eventless transitions or `<onentry>`.
    fn set_event(&mut self, event: &Event) -> Result<(), FsmError>;

    fn get(&mut self, location: &str) -> Result<Data, FsmError>;

    /// `<assign>`: sets `location` to `value`. Implementations preserve object
    /// identity for in-place updates where the target already exists, per W3C
    /// B.2.2's "manipulate... without creating a new object" guidance.
    fn assign(&mut self, location: &str, value: Data) -> Result<(), FsmError>;

    fn eval_expr(&mut self, expr: &str) -> Result<Data, FsmError>;

    fn eval_cond(&mut self, expr: &str) -> Result<bool, FsmError> {
        Ok(self.eval_expr(expr)?.truthy())
    }

    fn exec_script(&mut self, script: &str) -> Result<(), FsmError>;

    /// `<log>`: evaluates `expr` (if any) and returns the resulting text; the caller
    /// is responsible for emitting it through the logging facade.
    fn eval_log(&mut self, label: Option<&str>, expr: Option<&str>) -> Result<String, FsmError> {
        let value = match expr {
            Some(e) => self.eval_expr(e)?,
            None => Data::None,
        };
        Ok(match label {
            Some(l) => format!("{l}: {value:?}"),
            None => format!("{value:?}"),
        })
    }
}

/// W3C Appendix B.1: the minimal data model. The only expression it evaluates is
/// `In(stateId)`, matched with a regex rather than a full expression parser — no
/// scripting surface exists to abuse, so a regex is sufficient and matches the
/// teacher's own `NullDatamodel` approach.
pub struct NullDatamodel {
    global: GlobalDataAccess,
    is_in_state: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    in_pattern: Regex,
}

impl NullDatamodel {
    pub fn new(global: GlobalDataAccess) -> NullDatamodel {
        NullDatamodel {
            global,
            is_in_state: None,
            in_pattern: Regex::new(r#"^\s*In\s*\(\s*'([^']*)'\s*\)\s*$"#).unwrap(),
        }
    }
}

impl Datamodel for NullDatamodel {
    fn global(&self) -> &GlobalDataAccess {
        &self.global
    }

    fn name(&self) -> &'static str {
        "null"
    }

    fn setup_system_vars(&mut self) -> Result<(), FsmError> {
        Ok(())
    }

    fn register_in_predicate(&mut self, is_in_state: Arc<dyn Fn(&str) -> bool + Send + Sync>) {
        self.is_in_state = Some(is_in_state);
    }

    fn initialize_data_item(&mut self, _id: &str, _expr: Option<&str>) -> Result<(), FsmError> {
        Err(FsmError::execution(
            "the null data model does not support <data>",
        ))
    }

    fn set_event(&mut self, _event: &Event) -> Result<(), FsmError> {
        Ok(())
    }

    fn get(&mut self, _location: &str) -> Result<Data, FsmError> {
        Err(FsmError::execution(
            "the null data model has no locations to read",
        ))
    }

    fn assign(&mut self, _location: &str, _value: Data) -> Result<(), FsmError> {
        Err(FsmError::execution(
            "the null data model does not support <assign>",
        ))
    }

    fn eval_expr(&mut self, expr: &str) -> Result<Data, FsmError> {
        if let Some(caps) = self.in_pattern.captures(expr) {
            let state_name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let result = self
                .is_in_state
                .as_ref()
                .map(|f| f(state_name))
                .unwrap_or(false);
            return Ok(Data::Bool(result));
        }
        Err(FsmError::execution(format!(
            "the null data model only supports In(stateId), got '{expr}'"
        )))
    }

    fn exec_script(&mut self, _script: &str) -> Result<(), FsmError> {
        Err(FsmError::execution(
            "the null data model does not support <script>",
        ))
    }
}

/// Factory so the session driver can create a fresh datamodel per session without
/// knowing which concrete backend the chart requested.
pub trait DatamodelFactory: Send + Sync {
    fn create(&self, global: GlobalDataAccess, chart: &Arc<Chart>) -> Box<dyn Datamodel>;
}

pub struct NullDatamodelFactory;

impl DatamodelFactory for NullDatamodelFactory {
    fn create(&self, global: GlobalDataAccess, _chart: &Arc<Chart>) -> Box<dyn Datamodel> {
        Box::new(NullDatamodel::new(global))
    }
}

/// Resolves the factory for a chart's declared `datamodel` attribute value.
pub fn factory_for(name: &str) -> Result<Arc<dyn DatamodelFactory>, FsmError> {
    match name {
        "null" | "" => Ok(Arc::new(NullDatamodelFactory)),
        #[cfg(feature = "ECMAScriptModel")]
        "ecmascript" => Ok(Arc::new(crate::ecma_datamodel::EcmaScriptDatamodelFactory)),
        other => Err(FsmError::fatal(format!(
            "unsupported datamodel '{other}'"
        ))),
    }
}

/// A store of named values kept outside the scripting engine, used by
/// implementations (like `NullDatamodel`) that have no real variable storage of
/// their own but still need a place to stash transient session fields.
#[derive(Debug, Default, Clone)]
pub struct DataStore {
    values: HashMap<String, Data>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore::default()
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Data) {
        self.values.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_datamodel_evaluates_in_predicate() {
        let global = new_global_data_access(1, "test".to_string());
        let mut dm = NullDatamodel::new(global);
        dm.register_in_predicate(Arc::new(|name: &str| name == "active"));
        assert_eq!(dm.eval_expr("In('active')").unwrap(), Data::Bool(true));
        assert_eq!(dm.eval_expr("In('idle')").unwrap(), Data::Bool(false));
    }

    #[test]
    fn null_datamodel_rejects_assign() {
        let global = new_global_data_access(1, "test".to_string());
        let mut dm = NullDatamodel::new(global);
        assert!(dm.assign("x", Data::Integer(1)).is_err());
    }

    #[test]
    fn data_truthy_matches_ecmascript_coercion_for_primitives() {
        assert!(!Data::None.truthy());
        assert!(!Data::Integer(0).truthy());
        assert!(Data::Integer(1).truthy());
        assert!(!Data::String(String::new()).truthy());
        assert!(Data::String("x".to_string()).truthy());
    }
}
