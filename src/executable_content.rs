//! Action Executor (C7): the executable-content element set — `<raise>`, `<send>`,
//! `<cancel>`, `<assign>`, `<log>`, `<if>/<elseif>/<else>`, `<foreach>`, `<script>`.
//!
//! *W3C says* (4.x): each element is executed in document order; if any element in a
//! block raises `error.execution`, the Processor "MUST NOT process further child
//! elements of the parent element" — implemented by every `execute()` in this module
//! returning the first error and the caller (blocks below, and the session driver)
//! short-circuiting on `Err`.

use std::fmt::Debug;
use std::time::Duration;

use crate::datamodel::{Data, Datamodel};
use crate::error::FsmError;
use crate::event::{CommonContent, Event, EventType, InvokeId, ParamPair, SendId};

/// Everything an action needs from its owning session without depending on the
/// session's concrete type. Implemented by `crate::session::Session`.
pub trait ActionContext {
    fn datamodel_mut(&mut self) -> &mut dyn Datamodel;

    /// `<raise>`: appends to the internal event queue (processed before the
    /// external queue in the very next microstep, W3C 3.13).
    fn raise_internal(&mut self, event: Event);

    /// `<send>`: always routed through the scheduler, even for `delay="0"` or an
    /// omitted delay, so cancellation semantics stay uniform (SPEC_FULL.md Open
    /// Question resolution).
    fn schedule_send(&mut self, target: String, event: Event, delay: Duration, send_id: Option<SendId>);

    /// `<cancel>`.
    fn cancel_send(&mut self, send_id: &str);

    fn log(&mut self, text: &str);

    fn current_invoke_id(&self) -> Option<&InvokeId>;

    /// For error events raised during action execution (W3C 5.10's error.execution /
    /// error.communication go onto the *internal* queue of the session that was
    /// executing the content).
    fn raise_error(&mut self, error: FsmError) {
        let name = match error.event_name() {
            Some(n) => n,
            None => return,
        };
        let mut ev = Event::internal(name);
        ev.content = Some(CommonContent::Text(error.message().to_string()));
        ev.invoke_id = self.current_invoke_id().cloned();
        self.raise_internal(ev);
    }
}

/// A single executable-content element. `execute` returns `Err` only for a failure
/// that should stop the *enclosing block* (W3C 4.x "MUST NOT process further child
/// elements"); the caller is responsible for turning that into a queued error event
/// via `ActionContext::raise_error` — actions do not queue their own error events
/// directly, keeping that policy in one place.
pub trait ExecutableContent: Debug + Send + Sync {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError>;
}

/// Executes a document-ordered block of actions, stopping and returning at the first
/// error. Used by `execute_block` (the top-level swallow-and-raise driver) and by
/// nested constructs (`<if>`, `<foreach>`) that must propagate a nested failure to
/// their own caller instead of swallowing it, so one `<foreach>` iteration's error
/// stops the loop and aborts the enclosing `onentry`/`onexit` block (W3C 4.x).
pub fn execute_block_propagating(
    block: &[std::sync::Arc<dyn ExecutableContent>],
    ctx: &mut dyn ActionContext,
) -> Result<(), FsmError> {
    for action in block {
        action.execute(ctx)?;
    }
    Ok(())
}

/// Executes a document-ordered block of actions, stopping at the first error and
/// raising it as `error.execution`/`error.communication` rather than propagating it —
/// the top-level driver for `onentry`/`onexit`/transition content.
pub fn execute_block(block: &[std::sync::Arc<dyn ExecutableContent>], ctx: &mut dyn ActionContext) {
    if let Err(e) = execute_block_propagating(block, ctx) {
        ctx.raise_error(e);
    }
}

#[derive(Debug)]
pub struct Raise {
    pub event_name: String,
}

impl ExecutableContent for Raise {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        ctx.raise_internal(Event::internal(&self.event_name));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum DelayValue {
    Literal(String),
    Expr(String),
}

#[derive(Debug)]
pub struct Send {
    pub event_name: Option<String>,
    pub event_expr: Option<String>,
    pub target: Option<String>,
    pub target_expr: Option<String>,
    /// `type`/`typeexpr`: resolves the event I/O processor (W3C 6.2). `None` means
    /// no `type` attribute, which resolves to the SCXML processor same as an
    /// explicit `#SCXMLEventProcessor`.
    pub type_name: Option<String>,
    pub type_expr: Option<String>,
    pub delay: Option<DelayValue>,
    pub send_id: Option<String>,
    pub id_location: Option<String>,
    pub namelist: Vec<String>,
    pub params: Vec<(String, String)>,
    pub content_expr: Option<String>,
}

impl ExecutableContent for Send {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        let name = match (&self.event_name, &self.event_expr) {
            (Some(n), _) => n.clone(),
            (None, Some(expr)) => ctx
                .datamodel_mut()
                .eval_expr(expr)?
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            (None, None) => {
                return Err(FsmError::execution("<send> has neither 'event' nor 'eventexpr'"))
            }
        };

        let target = match (&self.target, &self.target_expr) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(expr)) => ctx
                .datamodel_mut()
                .eval_expr(expr)?
                .as_str()
                .map(|s| s.to_string()),
            (None, None) => None,
        };

        // W3C 6.2/test 159: a target starting with `!` is rejected synchronously —
        // `error.execution` and the rest of this block does not run — rather than
        // discovered only once the scheduler tries to dispatch it.
        if let Some(t) = &target {
            if matches!(
                crate::event_io_processor::SendTarget::parse(t),
                crate::event_io_processor::SendTarget::Invalid(_)
            ) {
                return Err(FsmError::execution(format!("invalid <send> target '{t}'")));
            }
        }

        // W3C 6.2: resolve which event I/O processor this send names; an
        // unrecognized type is `error.execution` raised before anything is
        // scheduled.
        let type_value = match (&self.type_name, &self.type_expr) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(expr)) => ctx
                .datamodel_mut()
                .eval_expr(expr)?
                .as_str()
                .map(|s| s.to_string()),
            (None, None) => None,
        };
        match type_value.as_deref() {
            None | Some("") | Some("http://www.w3.org/TR/scxml/#SCXMLEventProcessor") | Some("scxml") => {}
            Some("http://www.w3.org/TR/scxml/#BasicHTTPEventProcessor") | Some("basichttp") => {}
            Some(other) => {
                return Err(FsmError::execution(format!("<send> has unsupported type '{other}'")))
            }
        }

        let delay = match &self.delay {
            None => Duration::ZERO,
            Some(DelayValue::Literal(text)) => crate::scheduler::parse_delay(text),
            Some(DelayValue::Expr(expr)) => {
                let value = ctx.datamodel_mut().eval_expr(expr)?;
                let text = value.as_str().map(|s| s.to_string()).unwrap_or_default();
                crate::scheduler::parse_delay(&text)
            }
        };

        let mut params = Vec::new();
        for name_ref in &self.namelist {
            let value = ctx.datamodel_mut().get(name_ref)?;
            params.push(ParamPair {
                name: name_ref.clone(),
                value,
            });
        }
        for (param_name, expr) in &self.params {
            let value = ctx.datamodel_mut().eval_expr(expr)?;
            params.push(ParamPair {
                name: param_name.clone(),
                value,
            });
        }

        let content = match &self.content_expr {
            Some(expr) => Some(CommonContent::Value(ctx.datamodel_mut().eval_expr(expr)?)),
            None => None,
        };

        // W3C 6.2.4: generate a sendid when none was given, and publish it via
        // `idlocation` so the caller can later `<cancel>` this exact send.
        let send_id = self.send_id.clone().unwrap_or_else(crate::event::generate_send_id);
        if let Some(location) = &self.id_location {
            ctx.datamodel_mut()
                .assign(location, Data::String(send_id.clone()))?;
        }

        let mut event = Event::new(&name, EventType::External);
        event.send_id = Some(send_id.clone());
        event.params = params;
        event.content = content;

        // An absent `target` means "this session's own external queue" (W3C 6.2),
        // represented as the empty string so the I/O processor can route it back to
        // the sending session rather than the internal queue `#_internal` means.
        let target = target.unwrap_or_default();
        ctx.schedule_send(target, event, delay, Some(send_id));
        Ok(())
    }
}

#[derive(Debug)]
pub struct Cancel {
    pub send_id: Option<String>,
    pub send_id_expr: Option<String>,
}

impl ExecutableContent for Cancel {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        let id = match (&self.send_id, &self.send_id_expr) {
            (Some(id), _) => id.clone(),
            (None, Some(expr)) => ctx
                .datamodel_mut()
                .eval_expr(expr)?
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            (None, None) => {
                return Err(FsmError::execution("<cancel> has neither 'sendid' nor 'sendidexpr'"))
            }
        };
        ctx.cancel_send(&id);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Assign {
    pub location: String,
    pub expr: String,
}

impl ExecutableContent for Assign {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        // W3C B.2.2 requires object-reference identity to survive `<assign>` when
        // the right-hand side is itself a reference (most commonly `_event` or one
        // of its fields) — round-tripping through `Data` would clone it instead.
        // Run `location = (expr);` as one statement in that case; otherwise
        // evaluate then assign, which is both simpler and what `NullDatamodel`-style
        // backends without a scripting surface still need to support.
        if is_bare_reference(&self.expr) {
            return ctx
                .datamodel_mut()
                .exec_script(&format!("{} = ({});", self.location, self.expr));
        }
        let value = ctx.datamodel_mut().eval_expr(&self.expr)?;
        ctx.datamodel_mut().assign(&self.location, value)
    }
}

/// True if `expr` is a bare identifier/property-access/index chain (`_event`,
/// `_event.data.x`, `items[0]`) with no operators — the shape that must preserve
/// reference identity rather than be copied through [`Data`].
fn is_bare_reference(expr: &str) -> bool {
    let expr = expr.trim();
    let mut chars = expr.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    expr.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '[' | ']' | '\''))
}

#[derive(Debug)]
pub struct Log {
    pub label: Option<String>,
    pub expr: Option<String>,
}

impl ExecutableContent for Log {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        let text = ctx
            .datamodel_mut()
            .eval_log(self.label.as_deref(), self.expr.as_deref())?;
        ctx.log(&text);
        Ok(())
    }
}

/// One `<if>`/`<elseif>`/`<else>` chain. `branches` holds `(cond, body)` pairs in
/// document order; `cond == None` marks the trailing `<else>` (at most one, always
/// last — enforced by the builder that constructs this, not here).
#[derive(Debug)]
pub struct If {
    pub branches: Vec<(Option<String>, Vec<std::sync::Arc<dyn ExecutableContent>>)>,
}

impl ExecutableContent for If {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        for (cond, body) in &self.branches {
            let take_branch = match cond {
                Some(expr) => ctx.datamodel_mut().eval_cond(expr)?,
                None => true,
            };
            if take_branch {
                return execute_block_propagating(body, ctx);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ForEach {
    pub array_expr: String,
    pub item: String,
    pub index: Option<String>,
    pub body: Vec<std::sync::Arc<dyn ExecutableContent>>,
}

impl ExecutableContent for ForEach {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        let array = ctx.datamodel_mut().eval_expr(&self.array_expr)?;
        let items = match array {
            Data::Array(items) => items,
            other => {
                return Err(FsmError::execution(format!(
                    "<foreach> array expression did not evaluate to an array: {other:?}"
                )))
            }
        };
        for (i, value) in items.into_iter().enumerate() {
            ctx.datamodel_mut().assign(&self.item, value)?;
            if let Some(index_var) = &self.index {
                ctx.datamodel_mut()
                    .assign(index_var, Data::Integer(i as i64))?;
            }
            execute_block_propagating(&self.body, ctx)?;
        }
        Ok(())
    }
}

/// `<script>`. `src` (a fetched script) is out of scope along with the rest of the
/// resource-fetching surface the XML parser would own; only inline script bodies are
/// supported. Rejects any body that looks like a filesystem path escape (`../`) as a
/// guard against a body string that was itself built by concatenating an
/// attacker-controlled path.
#[derive(Debug)]
pub struct Script {
    pub body: String,
}

impl ExecutableContent for Script {
    fn execute(&self, ctx: &mut dyn ActionContext) -> Result<(), FsmError> {
        if self.body.contains("../") {
            return Err(FsmError::execution(
                "<script> body rejected: contains a path-traversal sequence",
            ));
        }
        ctx.datamodel_mut().exec_script(&self.body)
    }
}
