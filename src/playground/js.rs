//! Small helpers over the engine's value API.
//!
//! Type inspection goes through the realm's own intrinsics
//! (`Object.getOwnPropertyNames`, `Array.from`, ...) so that it behaves the
//! same way user code observes it.

use boa_engine::{Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue};

/// The object behind a value, if any.
pub(crate) fn as_object(value: &JsValue) -> Option<JsObject> {
    value.as_object().map(|object| object.clone())
}

/// Convert a value to a Rust string using the engine's `ToString`.
pub(crate) fn to_rust_string(value: &JsValue, context: &mut Context) -> JsResult<String> {
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// Read a property and render it as text; `None` when missing or unreadable.
pub(crate) fn property_text(object: &JsObject, key: &str, context: &mut Context) -> Option<String> {
    let value = object.get(JsString::from(key), context).ok()?;
    if value.is_undefined() {
        return None;
    }
    to_rust_string(&value, context).ok()
}

/// Call `target[name]` with an explicit receiver.
pub(crate) fn call_method(
    target: &JsObject,
    name: &str,
    this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let method = target.get(JsString::from(name), context)?;
    let method = as_object(&method)
        .filter(|method| method.is_callable())
        .ok_or_else(|| JsNativeError::typ().with_message(format!("{name} is not a function")))?;
    method.call(this, args, context)
}

/// Call a static method of the `Object` constructor.
pub(crate) fn object_static(name: &str, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let object = context.intrinsics().constructors().object().constructor();
    call_method(&object, name, &JsValue::from(object.clone()), args, context)
}

/// Call a static method of the `Array` constructor.
pub(crate) fn array_static(name: &str, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let array = context.intrinsics().constructors().array().constructor();
    call_method(&array, name, &JsValue::from(array.clone()), args, context)
}

/// Whether `Array.isArray(value)` holds.
pub(crate) fn is_array(value: &JsValue, context: &mut Context) -> JsResult<bool> {
    Ok(array_static("isArray", &[value.clone()], context)?.to_boolean())
}

/// The `[object Tag]` string of `Object.prototype.toString`.
pub(crate) fn to_string_tag(object: &JsObject, context: &mut Context) -> JsResult<String> {
    let prototype = context.intrinsics().constructors().object().prototype();
    let tag = call_method(&prototype, "toString", &JsValue::from(object.clone()), &[], context)?;
    to_rust_string(&tag, context)
}

/// The `length` of an array-like object, clamped to the array index range.
pub(crate) fn array_length(object: &JsObject, context: &mut Context) -> JsResult<u32> {
    let length = object
        .get(JsString::from("length"), context)?
        .to_length(context)?;
    Ok(u32::try_from(length).unwrap_or(u32::MAX))
}

/// The elements of an array-like value.
///
/// Reads every index up to `length`; only use it on arrays the engine built.
pub(crate) fn array_items(value: &JsValue, context: &mut Context) -> JsResult<Vec<JsValue>> {
    let Some(object) = as_object(value) else {
        return Ok(Vec::new());
    };
    let length = array_length(&object, context)?;
    let mut items = Vec::with_capacity(length.min(1_024) as usize);
    for index in 0..length {
        items.push(object.get(index, context)?);
    }
    Ok(items)
}

/// Text of any value, including symbols (`String(sym)` semantics).
pub(crate) fn display_text(value: &JsValue, context: &mut Context) -> JsResult<String> {
    if value.is_symbol() {
        let string = context.intrinsics().constructors().string().constructor();
        let rendered = string.call(&JsValue::undefined(), &[value.clone()], context)?;
        return to_rust_string(&rendered, context);
    }
    to_rust_string(value, context)
}

/// Render a thrown value as `Name: message`.
///
/// Native engine errors (including runtime limits, which cannot be turned
/// into script values) render as `Kind: message` without the engine's trace.
pub(crate) fn render_thrown(error: &JsError, context: &mut Context) -> String {
    if let Some(native) = error.as_native() {
        let message = native.message().trim();
        return if message.is_empty() {
            native.kind.to_string()
        } else {
            format!("{}: {message}", native.kind)
        };
    }
    let Some(value) = error.as_opaque() else {
        return "Uncaught exception".to_string();
    };

    if let Some(object) = as_object(value) {
        if let Some(name) = property_text(&object, "name", context) {
            return match property_text(&object, "message", context) {
                Some(message) if !message.is_empty() => format!("{name}: {message}"),
                _ => name,
            };
        }
    }

    display_text(value, context).unwrap_or_else(|_| "Uncaught exception".to_string())
}
