//! ECMAScript-backed data model (C2), the `datamodel="ecmascript"` backend, built on
//! `boa_engine`: a `boa_engine::Context` per session, `In()` bound as a native global
//! function via a captured closure, system variables bound as non-writable global
//! properties.

#![cfg(feature = "ECMAScriptModel")]

use std::sync::{Arc, Mutex};

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::{Attribute, PropertyDescriptor};
use boa_engine::{js_string, Context, JsNativeError, JsValue, NativeFunction, Source};

use crate::chart::Chart;
use crate::datamodel::{Data, Datamodel, DatamodelFactory, GlobalDataAccess};
use crate::error::FsmError;
use crate::event::Event;

pub struct EcmaScriptDatamodelFactory;

impl DatamodelFactory for EcmaScriptDatamodelFactory {
    fn create(&self, global: GlobalDataAccess, _chart: &Arc<Chart>) -> Box<dyn Datamodel> {
        Box::new(EcmaScriptDatamodel::new(global))
    }
}

pub struct EcmaScriptDatamodel {
    global: GlobalDataAccess,
    context: Context,
}

impl EcmaScriptDatamodel {
    pub fn new(global: GlobalDataAccess) -> EcmaScriptDatamodel {
        EcmaScriptDatamodel {
            global,
            context: Context::default(),
        }
    }

    fn js_to_data(value: &JsValue, ctx: &mut Context) -> Data {
        if value.is_null_or_undefined() {
            Data::None
        } else if let Some(b) = value.as_boolean() {
            Data::Bool(b)
        } else if let Some(n) = value.as_number() {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Data::Integer(n as i64)
            } else {
                Data::Double(n)
            }
        } else if let Some(s) = value.as_string() {
            Data::String(s.to_std_string_escaped())
        } else if let Some(obj) = value.as_object() {
            if obj.is_array() {
                let len = obj
                    .get(js_string!("length"), ctx)
                    .ok()
                    .and_then(|v| v.as_number())
                    .unwrap_or(0.0) as usize;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    let item = obj.get(i as u32, ctx).unwrap_or(JsValue::undefined());
                    items.push(Self::js_to_data(&item, ctx));
                }
                Data::Array(items)
            } else {
                Data::String(
                    value
                        .to_string(ctx)
                        .map(|s| s.to_std_string_escaped())
                        .unwrap_or_default(),
                )
            }
        } else {
            Data::None
        }
    }

    fn data_to_js(value: &Data, ctx: &mut Context) -> JsValue {
        match value {
            Data::None => JsValue::null(),
            Data::Bool(b) => JsValue::from(*b),
            Data::Integer(i) => JsValue::from(*i as f64),
            Data::Double(d) => JsValue::from(*d),
            Data::String(s) => JsValue::from(js_string!(s.as_str())),
            Data::Array(items) => {
                let array = boa_engine::object::builtins::JsArray::new(ctx);
                for item in items {
                    let _ = array.push(Self::data_to_js(item, ctx), ctx);
                }
                array.into()
            }
            Data::Object(fields) => {
                let obj = boa_engine::JsObject::with_object_proto(ctx.intrinsics());
                for (k, v) in fields {
                    let value = Self::data_to_js(v, ctx);
                    let _ = obj.set(js_string!(k.as_str()), value, false, ctx);
                }
                obj.into()
            }
        }
    }

    fn eval_internal(&mut self, expr: &str) -> Result<JsValue, FsmError> {
        self.context
            .eval(Source::from_bytes(expr))
            .map_err(|e| FsmError::execution(format!("{e}")))
    }

    fn bind_readonly(&mut self, name: &str, value: JsValue) -> Result<(), FsmError> {
        self.context
            .global_object()
            .define_property_or_throw(
                js_string!(name),
                PropertyDescriptor::builder()
                    .value(value)
                    .writable(false)
                    .enumerable(true)
                    .configurable(false)
                    .build(),
                &mut self.context,
            )
            .map_err(|e| FsmError::execution(format!("{e}")))?;
        Ok(())
    }
}

impl Datamodel for EcmaScriptDatamodel {
    fn global(&self) -> &GlobalDataAccess {
        &self.global
    }

    fn name(&self) -> &'static str {
        "ecmascript"
    }

    fn setup_system_vars(&mut self) -> Result<(), FsmError> {
        let (session_id, name, io_processors) = {
            let g = self.global.lock().unwrap();
            (g.session_id, g.name.clone(), g.io_processors.clone())
        };
        let session_id_js = JsValue::from(session_id as f64);
        self.bind_readonly("_sessionid", session_id_js)?;
        let name_js = JsValue::from(js_string!(name.as_str()));
        self.bind_readonly("_name", name_js)?;
        let processors = boa_engine::object::builtins::JsArray::new(&mut self.context);
        for p in &io_processors {
            let _ = processors.push(JsValue::from(js_string!(p.as_str())), &mut self.context);
        }
        let processors_js: JsValue = processors.into();
        self.bind_readonly("_ioprocessors", processors_js)?;
        Ok(())
    }

    fn register_in_predicate(&mut self, is_in_state: Arc<dyn Fn(&str) -> bool + Send + Sync>) {
        let captured = Mutex::new(is_in_state);
        let native = NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures, _ctx| {
                let state_id = args
                    .first()
                    .and_then(|v| v.as_string())
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_default();
                let predicate = captures.lock().unwrap();
                Ok(JsValue::from(predicate(state_id.as_str())))
            },
            captured,
        );
        let function = FunctionObjectBuilder::new(self.context.realm(), native)
            .name("In")
            .length(1)
            .build();
        self.context
            .global_object()
            .set(js_string!("In"), function, false, &mut self.context)
            .ok();
    }

    fn initialize_data_item(&mut self, id: &str, expr: Option<&str>) -> Result<(), FsmError> {
        let value = match expr {
            Some(e) => self.eval_internal(e)?,
            None => JsValue::undefined(),
        };
        self.context
            .global_object()
            .set(js_string!(id), value, true, &mut self.context)
            .map_err(|e| FsmError::execution(format!("{e}")))?;
        Ok(())
    }

    fn set_event(&mut self, event: &Event) -> Result<(), FsmError> {
        let obj = boa_engine::JsObject::with_object_proto(self.context.intrinsics());
        let _ = obj.set(
            js_string!("name"),
            JsValue::from(js_string!(event.name.as_str())),
            false,
            &mut self.context,
        );
        let type_str = match event.event_type {
            crate::event::EventType::Internal => "internal",
            crate::event::EventType::External => "external",
            crate::event::EventType::Platform => "platform",
        };
        let _ = obj.set(
            js_string!("type"),
            JsValue::from(js_string!(type_str)),
            false,
            &mut self.context,
        );
        let send_id = event
            .send_id
            .clone()
            .map(|s| JsValue::from(js_string!(s.as_str())))
            .unwrap_or(JsValue::null());
        let _ = obj.set(js_string!("sendid"), send_id, false, &mut self.context);
        // W3C 5.10/test 178: `content` (if any) is the whole payload; otherwise fold
        // `params` into an object, duplicate names becoming arrays.
        let data = crate::event::event_data(&event.content, &event.params);
        let data = Self::data_to_js(&data, &mut self.context);
        let _ = obj.set(js_string!("data"), data, false, &mut self.context);

        self.context
            .global_object()
            .define_property_or_throw(
                js_string!("_event"),
                PropertyDescriptor::builder()
                    .value(obj)
                    .writable(true)
                    .enumerable(true)
                    .configurable(true)
                    .build(),
                &mut self.context,
            )
            .map_err(|e| FsmError::execution(format!("{e}")))?;
        Ok(())
    }

    fn get(&mut self, location: &str) -> Result<Data, FsmError> {
        self.eval_expr(location)
    }

    fn assign(&mut self, location: &str, value: Data) -> Result<(), FsmError> {
        // W3C 5.9's `<assign>` strategy for a dotted/indexed path (`foo.bar`,
        // `foo[0]`): a plain `global_object().set(location, ...)` would define a
        // property literally named "foo.bar" instead of mutating `foo.bar`. Run the
        // assignment as a statement instead, staging the value through a hidden
        // global so the assigned-to object's identity (and any other live
        // references to it) is preserved rather than replaced.
        if location.contains('.') || location.contains('[') {
            let js_value = Self::data_to_js(&value, &mut self.context);
            self.context
                .global_object()
                .set(js_string!("__scxml_assign_tmp"), js_value, true, &mut self.context)
                .map_err(|e| FsmError::execution(format!("{e}")))?;
            self.eval_internal(&format!("{location} = __scxml_assign_tmp;"))?;
            return Ok(());
        }
        let js_value = Self::data_to_js(&value, &mut self.context);
        self.context
            .global_object()
            .set(js_string!(location), js_value, true, &mut self.context)
            .map_err(|e| FsmError::execution(format!("{e}")))?;
        Ok(())
    }

    fn eval_expr(&mut self, expr: &str) -> Result<Data, FsmError> {
        let value = self.eval_internal(expr)?;
        Ok(Self::js_to_data(&value, &mut self.context))
    }

    fn exec_script(&mut self, script: &str) -> Result<(), FsmError> {
        self.eval_internal(script)?;
        Ok(())
    }
}

/// Reports a required, but missing, native binding as an `error.execution`-shaped
/// message consistent with `JsNativeError`'s own formatting, used by callers that
/// build native errors directly rather than going through `eval_internal`.
#[allow(dead_code)]
fn missing_binding(name: &str) -> JsNativeError {
    JsNativeError::reference().with_message(format!("'{name}' is not defined"))
}
