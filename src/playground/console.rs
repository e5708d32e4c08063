//! The `console` object exposed to scripts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use boa_engine::{Context, JsArgs, JsResult, JsString, JsValue};

use crate::playground::js::{array_length, as_object, is_array, object_static, to_rust_string};
use crate::playground::output::{OutputCollector, OutputKind};
use crate::playground::realm::{Binding, HostFunction};
use crate::playground::serializer::{Data, Serializer, TRUNCATED};
use crate::playground::table::{render_table, TableRow};

const DEFAULT_TIMER_LABEL: &str = "default";
const INVALID_TABLE_DATA: &str = "Invalid data for console.table";

/// Named timers for `console.time` / `console.timeEnd`.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, Instant>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for `label`.
    pub fn start(&self, label: &str) {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.to_string(), Instant::now());
    }

    /// Stop the timer for `label`, returning its elapsed time.
    pub fn finish(&self, label: &str) -> Option<Duration> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label)
            .map(|started| started.elapsed())
    }
}

/// Builds the `console` namespace for one run.
#[derive(Debug, Clone)]
pub struct ConsoleProxy {
    output: OutputCollector,
    serializer: Serializer,
    timers: Arc<TimerRegistry>,
}

impl ConsoleProxy {
    /// Create a proxy writing into `output`.
    pub fn new(output: OutputCollector, serializer: Serializer) -> Self {
        Self {
            output,
            serializer,
            timers: Arc::new(TimerRegistry::new()),
        }
    }

    /// The `console` binding.
    pub fn binding(&self) -> Binding {
        let mut members = BTreeMap::new();
        for (name, kind) in [
            ("log", OutputKind::Log),
            ("info", OutputKind::Log),
            ("debug", OutputKind::Log),
            ("warn", OutputKind::Warn),
            ("error", OutputKind::Error),
        ] {
            members.insert(name.to_string(), Binding::Function(self.entry(kind)));
        }
        members.insert("table".to_string(), Binding::Function(self.table()));
        members.insert("time".to_string(), Binding::Function(self.time()));
        members.insert("timeEnd".to_string(), Binding::Function(self.time_end()));
        Binding::Namespace(members)
    }

    fn entry(&self, kind: OutputKind) -> HostFunction {
        let output = self.output.clone();
        let serializer = self.serializer;
        HostFunction::new(move |_this, args, ctx| {
            let data = args
                .iter()
                .map(|arg| serializer.serialize(arg, ctx))
                .collect();
            output.append(kind, data);
            Ok(JsValue::undefined())
        })
    }

    fn table(&self) -> HostFunction {
        let output = self.output.clone();
        let serializer = self.serializer;
        HostFunction::new(move |_this, args, ctx| {
            let data = args.get_or_undefined(0);
            let is_table_source = as_object(data).is_some_and(|object| !object.is_callable());
            if !is_table_source {
                output.append(OutputKind::Error, vec![Data::string(INVALID_TABLE_DATA)]);
                return Ok(JsValue::undefined());
            }
            let rows = table_rows(data, &serializer, ctx)?;
            output.append(OutputKind::Table, vec![Data::raw_string(render_table(&rows))]);
            Ok(JsValue::undefined())
        })
        .with_length(1)
    }

    fn time(&self) -> HostFunction {
        let timers = Arc::clone(&self.timers);
        HostFunction::new(move |_this, args, ctx| {
            timers.start(&timer_label(args, ctx)?);
            Ok(JsValue::undefined())
        })
    }

    fn time_end(&self) -> HostFunction {
        let timers = Arc::clone(&self.timers);
        let output = self.output.clone();
        HostFunction::new(move |_this, args, ctx| {
            let label = timer_label(args, ctx)?;
            match timers.finish(&label) {
                Some(elapsed) => output.append(
                    OutputKind::Log,
                    vec![Data::string(&format!("{label}: {}ms", elapsed.as_millis()))],
                ),
                None => output.append(
                    OutputKind::Error,
                    vec![Data::string(&format!("Timer '{label}' does not exist"))],
                ),
            }
            Ok(JsValue::undefined())
        })
    }
}

fn timer_label(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let label = args.get_or_undefined(0);
    if label.is_undefined() {
        return Ok(DEFAULT_TIMER_LABEL.to_string());
    }
    to_rust_string(label, context)
}

/// Rows of a table: array elements, or an object's own enumerable values.
///
/// Rows stop once their cell text exceeds the serializer's length bound; a
/// final `[Truncated]` row marks the cut.
fn table_rows(data: &JsValue, serializer: &Serializer, context: &mut Context) -> JsResult<Vec<TableRow>> {
    let items = if is_array(data, context)? {
        as_object(data)
    } else {
        as_object(&object_static("values", &[data.clone()], context)?)
    };
    let Some(items) = items else {
        return Ok(Vec::new());
    };

    let budget = serializer.max_length();
    let mut used = 0usize;
    let mut rows = Vec::new();
    for index in 0..array_length(&items, context)? {
        if used > budget {
            rows.push(TableRow::Value(TRUNCATED.to_string()));
            break;
        }
        let item = items.get(index, context)?;
        let row = match as_object(&item).filter(|object| !object.is_callable()) {
            Some(object) => {
                let keys = object_static("keys", &[item.clone()], context)?;
                let keys = as_object(&keys);
                let mut fields = Vec::new();
                if let Some(keys) = keys {
                    for key_index in 0..array_length(&keys, context)? {
                        if used > budget {
                            break;
                        }
                        let key = to_rust_string(&keys.get(key_index, context)?, context)?;
                        let cell = object.get(JsString::from(key.as_str()), context)?;
                        let cell = cell_text(&cell, serializer, context);
                        used += key.len() + cell.len();
                        fields.push((key, cell));
                    }
                }
                TableRow::Fields(fields)
            }
            None => {
                let cell = cell_text(&item, serializer, context);
                used += cell.len();
                TableRow::Value(cell)
            }
        };
        rows.push(row);
    }
    Ok(rows)
}

/// Strings appear as-is; everything else in its serialized form.
fn cell_text(value: &JsValue, serializer: &Serializer, context: &mut Context) -> String {
    if value.is_string() {
        if let Ok(text) = to_rust_string(value, context) {
            return text;
        }
    }
    serializer.serialize(value, context).value
}
