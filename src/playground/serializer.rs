//! Bounded, cycle-safe rendering of runtime values.
//!
//! Every value is turned into a [`Data`]: a semantic type tag plus compact
//! JSON text. The text is always valid JSON so renderers can re-parse it.

use boa_engine::{Context, JsNativeError, JsObject, JsResult, JsString, JsValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::playground::js::{
    array_length, array_static, as_object, call_method, display_text, is_array, object_static,
    property_text, to_rust_string, to_string_tag,
};

/// Default nesting bound.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Default bound on emitted text.
pub const DEFAULT_MAX_LENGTH: usize = 100_000;

/// Text bound used for console arguments.
pub const CONSOLE_MAX_LENGTH: usize = 5_000;

pub(crate) const UNABLE_TO_SERIALIZE: &str = "[Unable to serialize]";
const MAX_DEPTH_REACHED: &str = "[Max Depth Reached]";
const CIRCULAR: &str = "[Circular]";
pub(crate) const TRUNCATED: &str = "[Truncated]";
const INACCESSIBLE: &str = "[Property inaccessible]";

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Semantic type of a serialized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Undefined,
    Null,
    Boolean,
    Number,
    Bigint,
    String,
    Symbol,
    Function,
    Array,
    Object,
    Map,
    Set,
    Date,
    Regexp,
    Error,
    Class,
    Circular,
    Unknown,
}

/// One serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// Semantic type tag.
    #[serde(rename = "type")]
    pub kind: DataType,
    /// Rendered text.
    pub value: String,
}

impl Data {
    /// Create a new data entry.
    pub fn new(kind: DataType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// A string entry whose value is the JSON encoding of `text`.
    pub fn string(text: &str) -> Self {
        Self::new(DataType::String, Value::from(text).to_string())
    }

    /// A string entry holding `text` verbatim, not JSON-encoded.
    pub fn raw_string(text: impl Into<String>) -> Self {
        Self::new(DataType::String, text)
    }

    /// An error entry carrying `{"name": ..., "message": ...}`.
    pub fn error(name: &str, message: &str) -> Self {
        Self::new(
            DataType::Error,
            json!({ "name": name, "message": message }).to_string(),
        )
    }

    /// Parse the rendered text back into a JSON tree.
    pub fn parsed(&self) -> Option<Value> {
        serde_json::from_str(&self.value).ok()
    }
}

/// Renders values with depth and length bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serializer {
    max_depth: usize,
    max_length: usize,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_LENGTH)
    }
}

impl Serializer {
    /// Create a serializer with explicit bounds.
    pub fn new(max_depth: usize, max_length: usize) -> Self {
        Self {
            max_depth,
            max_length,
        }
    }

    /// Serializer used for console arguments.
    pub fn for_console(max_depth: usize) -> Self {
        Self::new(max_depth, CONSOLE_MAX_LENGTH)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Serialize a value. Never fails; failures degrade to a marker string.
    pub fn serialize(&self, value: &JsValue, context: &mut Context) -> Data {
        let kind = classify(value, context).unwrap_or(DataType::Unknown);
        let mut walk = Walk {
            context,
            max_depth: self.max_depth,
            max_length: self.max_length,
            ancestors: Vec::new(),
            total: 0,
            truncated: false,
        };
        let tree = walk.visit(value, 0);
        let tree = if walk.truncated {
            json!({ "notice": TRUNCATED, "partial": tree })
        } else {
            tree
        };
        Data::new(kind, tree.to_string())
    }
}

/// Decide the semantic type tag of a value.
pub fn classify(value: &JsValue, context: &mut Context) -> JsResult<DataType> {
    if value.is_undefined() {
        return Ok(DataType::Undefined);
    }
    if value.is_null() {
        return Ok(DataType::Null);
    }
    if value.as_boolean().is_some() {
        return Ok(DataType::Boolean);
    }
    if value.as_number().is_some() {
        return Ok(DataType::Number);
    }
    if value.is_string() {
        return Ok(DataType::String);
    }
    if value.is_bigint() {
        return Ok(DataType::Bigint);
    }
    if value.is_symbol() {
        return Ok(DataType::Symbol);
    }
    let Some(object) = as_object(value) else {
        return Ok(DataType::Unknown);
    };
    if object.is_callable() {
        return Ok(DataType::Function);
    }
    if is_array(value, context)? {
        return Ok(DataType::Array);
    }
    let kind = match to_string_tag(&object, context)?.as_str() {
        "[object Map]" => DataType::Map,
        "[object Set]" => DataType::Set,
        "[object Date]" => DataType::Date,
        "[object RegExp]" => DataType::Regexp,
        "[object Error]" => DataType::Error,
        _ if is_plain(&object, context)? => DataType::Object,
        _ => DataType::Class,
    };
    Ok(kind)
}

/// JSON form of a number; non-finite values become strings.
pub(crate) fn number_value(number: f64) -> Value {
    if number.is_nan() {
        return Value::from("NaN");
    }
    if number.is_infinite() {
        return Value::from(if number > 0.0 { "Infinity" } else { "-Infinity" });
    }
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        return Value::from(number as i64);
    }
    serde_json::Number::from_f64(number)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(UNABLE_TO_SERIALIZE))
}

/// Whether an object's prototype is `Object.prototype` or null.
fn is_plain(object: &JsObject, context: &mut Context) -> JsResult<bool> {
    let prototype = object_static("getPrototypeOf", &[object.clone().into()], context)?;
    let Some(prototype) = as_object(&prototype) else {
        return Ok(true);
    };
    let object_prototype = context.intrinsics().constructors().object().prototype();
    Ok(JsObject::equals(&prototype, &object_prototype))
}

/// Name of the constructor behind an object's prototype.
fn class_name(object: &JsObject, context: &mut Context) -> String {
    let constructor = object
        .get(JsString::from("constructor"), context)
        .ok()
        .and_then(|constructor| as_object(&constructor));
    constructor
        .and_then(|constructor| property_text(&constructor, "name", context))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Object".to_string())
}

struct Walk<'a> {
    context: &'a mut Context,
    max_depth: usize,
    max_length: usize,
    ancestors: Vec<JsObject>,
    total: usize,
    truncated: bool,
}

impl Walk<'_> {
    fn visit(&mut self, value: &JsValue, depth: usize) -> Value {
        if depth > self.max_depth {
            return self.text(MAX_DEPTH_REACHED.to_string());
        }
        match self.try_visit(value, depth) {
            Ok(rendered) => rendered,
            Err(_) => self.text(UNABLE_TO_SERIALIZE.to_string()),
        }
    }

    fn try_visit(&mut self, value: &JsValue, depth: usize) -> JsResult<Value> {
        if value.is_undefined() {
            return Ok(self.text("undefined".to_string()));
        }
        if value.is_null() {
            self.charge(4);
            return Ok(Value::Null);
        }
        if let Some(boolean) = value.as_boolean() {
            self.charge(if boolean { 4 } else { 5 });
            return Ok(Value::Bool(boolean));
        }
        if let Some(number) = value.as_number() {
            let number = number_value(number);
            self.charge(number.to_string().len());
            return Ok(number);
        }
        if value.is_string() {
            let text = to_rust_string(value, self.context)?;
            return Ok(self.text(text));
        }
        if value.is_bigint() {
            let digits = to_rust_string(value, self.context)?;
            return Ok(self.text(format!("{digits}n")));
        }
        if value.is_symbol() {
            let text = display_text(value, self.context)?;
            return Ok(self.text(text));
        }

        let Some(object) = as_object(value) else {
            return Ok(self.text(UNABLE_TO_SERIALIZE.to_string()));
        };

        if object.is_callable() {
            let name = property_text(&object, "name", self.context)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "anonymous".to_string());
            return Ok(self.text(format!("[Function: {name}]")));
        }

        let tag = to_string_tag(&object, self.context)?;
        match tag.as_str() {
            "[object Date]" => {
                let iso = self.date_text(&object);
                return Ok(self.text(iso));
            }
            "[object RegExp]" => {
                let source = property_text(&object, "source", self.context).unwrap_or_default();
                let flags = property_text(&object, "flags", self.context).unwrap_or_default();
                return Ok(self.text(format!("/{source}/{flags}")));
            }
            "[object Error]" => return Ok(self.error_value(&object)),
            _ => {}
        }

        if self
            .ancestors
            .iter()
            .any(|ancestor| JsObject::equals(ancestor, &object))
        {
            return Ok(self.text(CIRCULAR.to_string()));
        }

        self.ancestors.push(object.clone());
        let result = self.visit_container(value, &object, &tag, depth);
        self.ancestors.pop();
        result
    }

    fn visit_container(
        &mut self,
        value: &JsValue,
        object: &JsObject,
        tag: &str,
        depth: usize,
    ) -> JsResult<Value> {
        if is_array(value, self.context)? {
            return Ok(Value::Array(self.visit_indexed(object, depth)?));
        }

        match tag {
            "[object Map]" => {
                let entries = self.snapshot_entries(value)?;
                let length = array_length(&entries, self.context)?;
                let mut pairs = Vec::new();
                for index in 0..length {
                    if self.truncated {
                        break;
                    }
                    let entry = entries.get(index, self.context)?;
                    let Some(entry) = as_object(&entry) else {
                        continue;
                    };
                    self.charge(1);
                    pairs.push(Value::Array(self.visit_indexed(&entry, depth)?));
                }
                Ok(json!({ "[Map]": pairs }))
            }
            "[object Set]" => {
                let members = self.snapshot_entries(value)?;
                Ok(json!({ "[Set]": self.visit_indexed(&members, depth)? }))
            }
            _ => self.visit_properties(object, depth),
        }
    }

    /// `Array.from(value)` as an object.
    fn snapshot_entries(&mut self, value: &JsValue) -> JsResult<JsObject> {
        let entries = array_static("from", &[value.clone()], self.context)?;
        as_object(&entries).ok_or_else(|| {
            JsNativeError::typ()
                .with_message("Array.from returned a primitive")
                .into()
        })
    }

    /// Elements of an array-like, read one index at a time until truncated.
    fn visit_indexed(&mut self, list: &JsObject, depth: usize) -> JsResult<Vec<Value>> {
        let length = array_length(list, self.context)?;
        let mut rendered = Vec::new();
        for index in 0..length {
            if self.truncated {
                break;
            }
            let item = list.get(index, self.context)?;
            self.charge(1);
            rendered.push(self.visit(&item, depth + 1));
        }
        Ok(rendered)
    }

    fn visit_properties(&mut self, object: &JsObject, depth: usize) -> JsResult<Value> {
        let target = JsValue::from(object.clone());
        let names = object_static("getOwnPropertyNames", &[target.clone()], self.context)?;
        let symbols = object_static("getOwnPropertySymbols", &[target.clone()], self.context)?;
        let key_lists: Vec<JsObject> = [names, symbols].iter().filter_map(as_object).collect();

        let mut properties = Map::new();
        for keys in &key_lists {
            let count = array_length(keys, self.context)?;
            for index in 0..count {
                if self.truncated {
                    break;
                }
                let key = keys.get(index, self.context)?;
                self.visit_property(&target, &key, depth, &mut properties);
            }
        }

        if is_plain(object, self.context)? {
            return Ok(Value::Object(properties));
        }
        let name = class_name(object, self.context);
        self.charge(name.len() + 4);
        let mut wrapper = Map::new();
        wrapper.insert(format!("[{name}]"), Value::Object(properties));
        Ok(Value::Object(wrapper))
    }

    fn visit_property(&mut self, target: &JsValue, key: &JsValue, depth: usize, properties: &mut Map<String, Value>) {
        let Ok(key_text) = display_text(key, self.context) else {
            return;
        };
        // Quotes, colon and separator.
        self.charge(key_text.chars().count() + 4);
        match self.property(target, key, depth) {
            Ok(Some(rendered)) => {
                properties.insert(key_text, rendered);
            }
            Ok(None) => {}
            Err(_) => {
                let marker = self.text(INACCESSIBLE.to_string());
                properties.insert(key_text, marker);
            }
        }
    }

    /// Render one own property from its descriptor; accessors are never invoked.
    fn property(&mut self, target: &JsValue, key: &JsValue, depth: usize) -> JsResult<Option<Value>> {
        let descriptor = object_static(
            "getOwnPropertyDescriptor",
            &[target.clone(), key.clone()],
            self.context,
        )?;
        let Some(descriptor) = as_object(&descriptor) else {
            return Ok(None);
        };

        let getter = descriptor.get(JsString::from("get"), self.context)?;
        let setter = descriptor.get(JsString::from("set"), self.context)?;
        if !getter.is_undefined() || !setter.is_undefined() {
            let mut accessor = Map::new();
            if !getter.is_undefined() {
                accessor.insert("get".to_string(), self.text("[Getter]".to_string()));
            }
            if !setter.is_undefined() {
                accessor.insert("set".to_string(), self.text("[Setter]".to_string()));
            }
            return Ok(Some(Value::Object(accessor)));
        }

        let value = descriptor.get(JsString::from("value"), self.context)?;
        Ok(Some(self.visit(&value, depth + 1)))
    }

    fn date_text(&mut self, date: &JsObject) -> String {
        let prototype = self.context.intrinsics().constructors().date().prototype();
        call_method(
            &prototype,
            "toISOString",
            &JsValue::from(date.clone()),
            &[],
            self.context,
        )
        .and_then(|iso| to_rust_string(&iso, self.context))
        .unwrap_or_else(|_| "Invalid Date".to_string())
    }

    fn error_value(&mut self, error: &JsObject) -> Value {
        let name = property_text(error, "name", self.context).unwrap_or_else(|| "Error".to_string());
        let message = property_text(error, "message", self.context).unwrap_or_default();
        let stack = property_text(error, "stack", self.context).unwrap_or_default();
        self.charge(r#"{"name":,"message":,"stack":}"#.len());
        json!({
            "name": self.text(name),
            "message": self.text(message),
            "stack": self.text(stack),
        })
    }

    fn charge(&mut self, length: usize) {
        self.total = self.total.saturating_add(length);
        if self.total > self.max_length {
            self.truncated = true;
        }
    }

    /// A string leaf, charged with its quotes.
    fn text(&mut self, text: String) -> Value {
        self.charge(2);
        Value::from(self.truncate(text))
    }

    fn truncate(&mut self, text: String) -> String {
        let length = text.chars().count();
        let allowed = self.max_length.saturating_sub(self.total);
        self.total = self.total.saturating_add(length);
        if length > allowed {
            self.truncated = true;
            return text.chars().take(allowed).collect();
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn render(code: &str) -> Data {
        render_with(Serializer::default(), code)
    }

    fn render_with(serializer: Serializer, code: &str) -> Data {
        let mut context = Context::default();
        let value = context.eval(Source::from_bytes(code)).unwrap();
        serializer.serialize(&value, &mut context)
    }

    #[test]
    fn test_primitives() {
        assert_eq!(render("undefined"), Data::new(DataType::Undefined, "\"undefined\""));
        assert_eq!(render("null"), Data::new(DataType::Null, "null"));
        assert_eq!(render("1 + 1"), Data::new(DataType::Number, "2"));
        assert_eq!(render("0.5"), Data::new(DataType::Number, "0.5"));
        assert_eq!(render("true"), Data::new(DataType::Boolean, "true"));
        assert_eq!(render("'hi'"), Data::new(DataType::String, "\"hi\""));
        assert_eq!(render("NaN"), Data::new(DataType::Number, "\"NaN\""));
        assert_eq!(render("-Infinity"), Data::new(DataType::Number, "\"-Infinity\""));
    }

    #[test]
    fn test_bigint_and_symbol() {
        assert_eq!(render("10n ** 20n").value, "\"100000000000000000000n\"");
        let symbol = render("Symbol('tag')");
        assert_eq!(symbol.kind, DataType::Symbol);
        assert_eq!(symbol.value, "\"Symbol(tag)\"");
    }

    #[test]
    fn test_functions() {
        let named = render("(function greet() {})");
        assert_eq!(named.kind, DataType::Function);
        assert_eq!(named.value, "\"[Function: greet]\"");
        assert_eq!(render("(() => {})").value, "\"[Function: anonymous]\"");
    }

    #[test]
    fn test_date_and_regexp() {
        let date = render("new Date(0)");
        assert_eq!(date.kind, DataType::Date);
        assert_eq!(date.value, "\"1970-01-01T00:00:00.000Z\"");
        assert_eq!(render("new Date(NaN)").value, "\"Invalid Date\"");

        let regexp = render("/ab+c/gi");
        assert_eq!(regexp.kind, DataType::Regexp);
        assert_eq!(regexp.value, "\"/ab+c/gi\"");
    }

    #[test]
    fn test_error() {
        let error = render("new RangeError('out of range')");
        assert_eq!(error.kind, DataType::Error);
        let parsed = error.parsed().unwrap();
        assert_eq!(parsed["name"], "RangeError");
        assert_eq!(parsed["message"], "out of range");
        assert!(parsed.get("stack").is_some());
    }

    #[test]
    fn test_collections() {
        let map = render("new Map([['a', 1]])");
        assert_eq!(map.kind, DataType::Map);
        assert_eq!(map.parsed().unwrap(), json!({ "[Map]": [["a", 1]] }));

        let set = render("new Set([1, 2, 2])");
        assert_eq!(set.kind, DataType::Set);
        assert_eq!(set.parsed().unwrap(), json!({ "[Set]": [1, 2] }));

        let array = render("[1, 'x', [true]]");
        assert_eq!(array.kind, DataType::Array);
        assert_eq!(array.parsed().unwrap(), json!([1, "x", [true]]));
    }

    #[test]
    fn test_plain_object_and_class_instance() {
        let plain = render("({ a: 1, b: { c: 'd' } })");
        assert_eq!(plain.kind, DataType::Object);
        assert_eq!(plain.parsed().unwrap(), json!({ "a": 1, "b": { "c": "d" } }));

        let instance = render("class Point { constructor() { this.x = 1; } }; new Point()");
        assert_eq!(instance.kind, DataType::Class);
        assert_eq!(instance.parsed().unwrap(), json!({ "[Point]": { "x": 1 } }));
    }

    #[test]
    fn test_accessors_are_not_invoked() {
        let data = render(
            "var calls = 0; ({ get a() { calls++; return 1; }, set b(v) {} })",
        );
        assert_eq!(
            data.parsed().unwrap(),
            json!({ "a": { "get": "[Getter]" }, "b": { "set": "[Setter]" } })
        );
    }

    #[test]
    fn test_circular_reference() {
        let data = render("const o = { name: 'root' }; o.self = o; o");
        assert_eq!(data.kind, DataType::Object);
        assert_eq!(
            data.parsed().unwrap(),
            json!({ "name": "root", "self": "[Circular]" })
        );
    }

    #[test]
    fn test_shared_reference_is_not_circular() {
        let data = render("const s = { v: 1 }; ({ a: s, b: s })");
        assert_eq!(
            data.parsed().unwrap(),
            json!({ "a": { "v": 1 }, "b": { "v": 1 } })
        );
    }

    #[test]
    fn test_max_depth() {
        let data = render_with(Serializer::new(2, DEFAULT_MAX_LENGTH), "({ a: { b: { c: { d: 1 } } } })");
        assert_eq!(
            data.parsed().unwrap(),
            json!({ "a": { "b": { "c": "[Max Depth Reached]" } } })
        );
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let data = render("let n = {}; const root = n; for (let i = 0; i < 10000; i++) { n.next = {}; n = n.next; } root");
        assert!(data.value.contains("[Max Depth Reached]"));
    }

    #[test]
    fn test_truncation_envelope() {
        let data = render_with(Serializer::new(10, 15), "['abcdef', 'ghijkl', 'mnop']");
        assert_eq!(data.kind, DataType::Array);
        assert_eq!(
            data.parsed().unwrap(),
            json!({ "notice": "[Truncated]", "partial": ["abcdef", "ghi"] })
        );
    }

    #[test]
    fn test_huge_sparse_array_is_bounded() {
        let data = render_with(
            Serializer::new(10, 100),
            "const a = []; a.length = 4294967295; a",
        );
        assert_eq!(data.kind, DataType::Array);
        assert!(data.value.contains("[Truncated]"));
        assert!(data.value.len() < 300, "{}", data.value);
    }

    #[test]
    fn test_markers_and_keys_count_toward_length() {
        let data = render_with(
            Serializer::new(10, 50),
            "({ aaaaaaaaaa: null, bbbbbbbbbb: null, cccccccccc: null, dddddddddd: null })",
        );
        let parsed = data.parsed().unwrap();
        assert_eq!(parsed["notice"], "[Truncated]");
        assert!(parsed["partial"].as_object().unwrap().len() < 4);
    }

    #[test]
    fn test_output_is_always_json() {
        for code in [
            "'quote \" and \\\\ backslash'",
            "({ [Symbol('k')]: 1 })",
            "new Proxy({}, { ownKeys() { throw new Error('nope'); } })",
        ] {
            let data = render(code);
            assert!(data.parsed().is_some(), "not JSON: {}", data.value);
        }
    }

    #[test]
    fn test_wire_shape() {
        let data = Data::new(DataType::Regexp, "\"/a/\"");
        let encoded = serde_json::to_value(&data).unwrap();
        assert_eq!(encoded, json!({ "type": "regexp", "value": "\"/a/\"" }));
    }
}
