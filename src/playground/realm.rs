//! Isolated execution realms.
//!
//! An [`ExecutionContext`] is a plain name-to-binding map owned by the host.
//! Running a [`Script`] against it creates a fresh engine realm, copies the
//! bindings in, evaluates, copies global mutations back out and disposes the
//! realm, whether evaluation succeeded or not.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::PropertyDescriptor;
use boa_engine::{Context, JsObject, JsResult, JsString, JsValue, NativeFunction, Source};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{parse_js_exception, PlaygroundError, Result};
use crate::playground::js::{array_items, as_object, object_static, render_thrown, to_rust_string};
use crate::playground::limits::ExecutionLimits;
use crate::playground::serializer::{number_value, Data, Serializer};

/// Intrinsic globals that are copied between context and realm.
pub const INTRINSIC_GLOBALS: &[&str] = &[
    "Array",
    "Boolean",
    "Date",
    "Error",
    "EvalError",
    "Function",
    "Infinity",
    "JSON",
    "Math",
    "NaN",
    "Number",
    "Object",
    "RangeError",
    "ReferenceError",
    "RegExp",
    "String",
    "SyntaxError",
    "TypeError",
    "URIError",
    "decodeURI",
    "decodeURIComponent",
    "encodeURI",
    "encodeURIComponent",
    "escape",
    "eval",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
    "undefined",
    "unescape",
    "fetch",
    "Promise",
];

/// Check if a global name is one of [`INTRINSIC_GLOBALS`].
pub fn is_intrinsic(name: &str) -> bool {
    INTRINSIC_GLOBALS.contains(&name)
}

type HostFn = dyn Fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue> + Send + Sync;

/// A Rust function exposed to scripts.
#[derive(Clone)]
pub struct HostFunction {
    call: Arc<HostFn>,
    length: usize,
}

impl HostFunction {
    /// Wrap a closure as a host function.
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue> + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(call),
            length: 0,
        }
    }

    /// Set the reported `length` of the function.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Invoke the function directly.
    pub fn invoke(&self, this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        (self.call)(this, args, context)
    }

    fn to_object(&self, name: &str, context: &mut Context) -> JsObject {
        let call = Arc::clone(&self.call);
        // SAFETY: host functions are `Send + Sync` and therefore cannot
        // capture garbage-collected engine values.
        let native = unsafe { NativeFunction::from_closure(move |this, args, ctx| call(this, args, ctx)) };
        FunctionObjectBuilder::new(context.realm(), native)
            .name(JsString::from(name))
            .length(self.length)
            .constructor(false)
            .build()
            .into()
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A value held by an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub enum Binding {
    /// Plain data.
    Value(Value),
    /// A host function.
    Function(HostFunction),
    /// An object whose members are bindings.
    Namespace(BTreeMap<String, Binding>),
    /// Inert snapshot of a script value that has no plain-data form.
    Captured(Data),
}

impl Binding {
    /// The plain-data form, if this binding has one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The captured snapshot, if this binding is one.
    pub fn as_captured(&self) -> Option<&Data> {
        match self {
            Binding::Captured(data) => Some(data),
            _ => None,
        }
    }

    fn to_js(&self, name: &str, context: &mut Context) -> JsResult<JsValue> {
        match self {
            Binding::Value(value) => JsValue::from_json(value, context),
            Binding::Function(function) => Ok(function.to_object(name, context).into()),
            Binding::Namespace(members) => {
                let object = ObjectInitializer::new(context).build();
                for (member, binding) in members {
                    let value = binding.to_js(member, context)?;
                    object.set(JsString::from(member.as_str()), value, true, context)?;
                }
                Ok(object.into())
            }
            // Snapshots come back as their rendered form.
            Binding::Captured(data) => match data.parsed() {
                Some(value) => JsValue::from_json(&value, context),
                None => Ok(JsString::from(data.value.as_str()).into()),
            },
        }
    }

    /// Capture a script value after evaluation.
    fn capture(value: &JsValue, serializer: &Serializer, context: &mut Context) -> Self {
        if value.is_null() {
            return Binding::Value(Value::Null);
        }
        if let Some(boolean) = value.as_boolean() {
            return Binding::Value(Value::Bool(boolean));
        }
        if let Some(number) = value.as_number().filter(|number| number.is_finite()) {
            return Binding::Value(number_value(number));
        }
        if value.is_string() {
            if let Ok(text) = to_rust_string(value, context) {
                return Binding::Value(Value::String(text));
            }
        }
        Binding::Captured(serializer.serialize(value, context))
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

impl From<HostFunction> for Binding {
    fn from(function: HostFunction) -> Self {
        Binding::Function(function)
    }
}

/// One entry of an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct Property {
    pub binding: Binding,
    pub enumerable: bool,
}

/// The host-side global scope of one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    properties: BTreeMap<String, Property>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an enumerable entry.
    pub fn add_property(&mut self, name: impl Into<String>, binding: impl Into<Binding>) {
        self.insert(name, binding.into(), true);
    }

    /// Add or replace a non-enumerable entry.
    pub fn add_hidden_property(&mut self, name: impl Into<String>, binding: impl Into<Binding>) {
        self.insert(name, binding.into(), false);
    }

    fn insert(&mut self, name: impl Into<String>, binding: Binding, enumerable: bool) {
        self.properties
            .insert(name.into(), Property { binding, enumerable });
    }

    /// Look up an entry's binding.
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.properties.get(name).map(|property| &property.binding)
    }

    /// Look up an entry.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.properties.remove(name).map(|property| property.binding)
    }

    /// Names of enumerable entries.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, property)| property.enumerable)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties
            .iter()
            .map(|(name, property)| (name.as_str(), property))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Engine-level limits applied to a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RealmOptions {
    /// Iterations allowed per loop before the engine stops it.
    pub loop_iteration_limit: Option<u64>,
    /// Nested calls allowed before the engine stops the script.
    pub recursion_limit: Option<usize>,
}

impl RealmOptions {
    /// Backstops that sit behind the script-level guards.
    pub fn from_limits(limits: &ExecutionLimits) -> Self {
        Self {
            loop_iteration_limit: Some(limits.max_iterations.saturating_mul(4)),
            recursion_limit: Some(limits.max_depth.saturating_mul(4)),
        }
    }
}

/// A live engine realm. Dropping it disposes the realm.
pub struct Realm {
    context: Context,
    serializer: Serializer,
    installed: Vec<(String, JsObject)>,
}

impl Realm {
    /// Create a realm holding only engine intrinsics.
    pub fn new(options: &RealmOptions) -> Self {
        let mut context = Context::default();
        if let Some(limit) = options.loop_iteration_limit {
            context.runtime_limits_mut().set_loop_iteration_limit(limit);
        }
        if let Some(limit) = options.recursion_limit {
            context.runtime_limits_mut().set_recursion_limit(limit);
        }
        trace!(?options, "realm created");
        Self {
            context,
            serializer: Serializer::default(),
            installed: Vec::new(),
        }
    }

    /// The underlying engine context.
    pub fn context(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Copy context entries onto the realm's global object.
    ///
    /// Snapshots of intrinsics are skipped so the realm keeps its own.
    pub fn install(&mut self, execution: &ExecutionContext) -> Result<()> {
        let global = self.context.global_object();
        for (name, property) in execution.iter() {
            if is_intrinsic(name) && matches!(property.binding, Binding::Captured(_)) {
                continue;
            }
            let value = property
                .binding
                .to_js(name, &mut self.context)
                .map_err(|err| PlaygroundError::RealmInit(format!("{name}: {err}")))?;
            if let Some(object) = as_object(&value) {
                if matches!(property.binding, Binding::Function(_) | Binding::Namespace(_)) {
                    self.installed.push((name.to_string(), object));
                }
            }
            let descriptor = PropertyDescriptor::builder()
                .value(value)
                .writable(true)
                .enumerable(property.enumerable)
                .configurable(true)
                .build();
            global
                .define_property_or_throw(JsString::from(name), descriptor, &mut self.context)
                .map_err(|err| PlaygroundError::RealmInit(format!("{name}: {err}")))?;
        }
        Ok(())
    }

    /// Own property names of the global object.
    pub fn global_names(&mut self) -> BTreeSet<String> {
        let global = JsValue::from(self.context.global_object());
        let names = object_static("getOwnPropertyNames", &[global], &mut self.context)
            .and_then(|names| array_items(&names, &mut self.context));
        match names {
            Ok(names) => names
                .iter()
                .filter_map(|name| to_rust_string(name, &mut self.context).ok())
                .collect(),
            Err(err) => {
                warn!(error = %err, "failed to list realm globals");
                BTreeSet::new()
            }
        }
    }

    /// Evaluate a script and drain the job queue.
    pub fn evaluate(&mut self, code: &str) -> Result<Binding> {
        let outcome = self
            .context
            .eval(Source::from_bytes(code))
            .and_then(|value| self.context.run_jobs().map(|()| value));
        match outcome {
            Ok(value) => Ok(Binding::capture(&value, &self.serializer, &mut self.context)),
            Err(err) => {
                let rendered = render_thrown(&err, &mut self.context);
                debug!(error = %rendered, "script threw");
                Err(parse_js_exception(&rendered))
            }
        }
    }

    /// Copy global mutations back into the execution context.
    ///
    /// Names already tracked, or created during evaluation, are copied back.
    /// Intrinsics the context does not track yet come back as hidden entries.
    /// Host objects the script left in place keep their host binding.
    pub fn reconcile(&mut self, execution: &mut ExecutionContext, before: &BTreeSet<String>) {
        let global = self.context.global_object();
        for name in self.global_names() {
            let tracked = execution.contains(&name);
            let created = !before.contains(&name);
            if !(tracked || created || is_intrinsic(&name)) {
                continue;
            }

            let value = match global.get(JsString::from(name.as_str()), &mut self.context) {
                Ok(value) => value,
                Err(err) => {
                    trace!(name = %name, error = %err, "global not readable");
                    continue;
                }
            };

            if self.is_untouched_host_object(&name, &value) {
                continue;
            }

            let binding = Binding::capture(&value, &self.serializer, &mut self.context);
            if tracked || created {
                let enumerable = execution
                    .property(&name)
                    .map(|property| property.enumerable)
                    .unwrap_or(true);
                execution.insert(name, binding, enumerable);
            } else {
                execution.insert(name, binding, false);
            }
        }
    }

    fn is_untouched_host_object(&self, name: &str, value: &JsValue) -> bool {
        let Some(object) = as_object(value) else {
            return false;
        };
        self.installed
            .iter()
            .any(|(installed, host)| installed == name && JsObject::equals(host, &object))
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        trace!("realm disposed");
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("installed", &self.installed.len())
            .finish_non_exhaustive()
    }
}

/// Prepared source ready to run against an [`ExecutionContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    code: String,
}

impl Script {
    /// Wrap prepared source code.
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// The source this script evaluates.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Run in a fresh realm without engine backstops.
    pub fn run_in_context(&self, context: &mut ExecutionContext) -> Result<Binding> {
        self.run_in_context_with(context, &RealmOptions::default())
    }

    /// Run in a fresh realm configured with `options`.
    ///
    /// The context is reconciled after evaluation even when the script throws.
    pub fn run_in_context_with(
        &self,
        context: &mut ExecutionContext,
        options: &RealmOptions,
    ) -> Result<Binding> {
        let mut realm = Realm::new(options);
        realm.install(context)?;
        let before = realm.global_names();
        let outcome = realm.evaluate(&self.code);
        realm.reconcile(context, &before);
        outcome
    }

    /// Run against a copy of `context`, then write the copy's enumerable
    /// entries back.
    pub fn run_in_new_context(&self, context: &mut ExecutionContext) -> Result<Binding> {
        let mut sandbox = context.clone();
        let outcome = self.run_in_context(&mut sandbox);
        for (name, property) in sandbox.properties {
            if property.enumerable {
                context.insert(name, property.binding, true);
            }
        }
        outcome
    }
}
