//! # Host-Object Model
//!
//! Dynamic, JavaScript-like objects for the browser shim. Every host object
//! is an [`Object`]: a [`Kind`] (which carries the variant-specific payload
//! such as a boxed string, a compiled regex, or a VM closure) plus an
//! insertion-ordered dynamic property table.
//!
//! ## Property access contract (what the VM depends on)
//! - Lookup order: kind-computed properties (e.g. `Array.length`), then
//!   instance properties, then builtin methods (materialized lazily as
//!   bound-method objects), then the per-kind fallbacks (element
//!   attributes/styles, registered event listeners).
//! - A **missing read returns `Undefined`** and logs at debug level — those
//!   logs are the main signal of which probes a payload makes.
//! - Reads through `Null` raise the catchable TypeError
//!   `Cannot read properties of null (reading 'X')`; that is the only way a
//!   plain VM instruction can fault.
//! - Integer and float keys are stringified; the well-known
//!   `Symbol.iterator` routes to the internal `__iter__` name.
//!
//! ## Callables
//! Four callable shapes exist, mirroring the reference implementation's
//! split between function proxies and bare Python callables:
//! - `Kind::Function` — a VM closure made by the `vm_factory` opcode. Its
//!   first call argument is the `this` binding (falsy → window).
//! - `Kind::Bound` — a builtin method bound to a receiver.
//! - `Kind::NativeThunk` — a bare native callable (the parse-time `Date`
//!   static forwarder).
//! - `Kind::Ctor` — a constructor/namespace object (`window.Array`,
//!   `window.Math`, ...); calling it constructs.
//!
//! Only `Kind::Function` receives the window as `this` when invoked through
//! the `wincall` opcode; the others are called plainly, exactly as the
//! reference distinguishes function proxies from everything else.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use crate::error::VmError;
use crate::value::{fmt_float, value_eq, ObjRef, Value};
use crate::vm::VmClosure;

pub mod builtins;
pub mod element;
pub mod window;

/// Bare native callable: receives evaluated arguments, returns a value.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, VmError>>;

/// A host object: variant payload + dynamic properties.
pub struct Object {
    pub kind: Kind,
    props: RefCell<Vec<(String, Value)>>,
}

/// Variant payloads for host objects.
pub enum Kind {
    /// Generic dictionary object.
    Object,
    /// JS array; elements live in the property table under stringified
    /// indices, `length` is derived.
    Array,
    /// Boxed string (carries the string methods).
    Str(String),
    /// VM closure produced by the `vm_factory` opcode.
    Function(VmClosure),
    /// Bare native callable (not a function proxy).
    NativeThunk(NativeFn),
    /// Builtin method bound to a receiver, dispatched by name at call time.
    Bound { recv: Value, name: String },
    /// Constructor / namespace object exposed on the window.
    Ctor(Builtin),
    RegExp(RegExpData),
    Date(chrono::DateTime<chrono::FixedOffset>),
    /// Boxed number (`Number.toFixed` receiver).
    Number(f64),
    Symbol(Option<String>),
    /// Eager promise; `result`/`exc` are ordinary properties.
    Promise,
    /// Boxed caught exception (`message`, `stack` properties).
    Exception,
    Window(window::WindowState),
    Document(window::DocumentState),
    Navigator,
    /// sessionStorage / localStorage.
    Storage,
    Console,
    /// `window.CSS`.
    CssModel,
    RtcPeer(window::RtcState),
    Element(element::ElementData),
    Context2d,
    ContextGl,
    /// Result of `getComputedStyle`.
    ComputedStyle,
}

/// Constructors and namespaces reachable from the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Object,
    Array,
    String,
    Number,
    Date,
    RegExp,
    Symbol,
    Error,
    Math,
    Json,
    RtcPeerConnection,
}

/// Compiled regular expression plus the JS-level flags the shim tracks.
pub struct RegExpData {
    pub regex: regex::Regex,
    pub global: bool,
    pub source: String,
}

impl Object {
    /// Allocate a new object of `kind` with no properties.
    pub fn new(kind: Kind) -> ObjRef {
        Rc::new(Object {
            kind,
            props: RefCell::new(Vec::new()),
        })
    }

    /// Allocate with an initial property list (insertion order kept).
    pub fn with_props(kind: Kind, props: Vec<(String, Value)>) -> ObjRef {
        Rc::new(Object {
            kind,
            props: RefCell::new(props),
        })
    }

    /// Raw property read: instance table only, no computed values, no
    /// side effects.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.props
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Raw property write, preserving first-insertion order.
    pub fn set_raw(&self, key: &str, value: Value) {
        let mut props = self.props.borrow_mut();
        if let Some(entry) = props.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            props.push((key.to_string(), value));
        }
    }

    /// Raw property removal; returns the removed value if present.
    pub fn remove_raw(&self, key: &str) -> Option<Value> {
        let mut props = self.props.borrow_mut();
        let idx = props.iter().position(|(k, _)| k == key)?;
        Some(props.remove(idx).1)
    }

    /// Snapshot of the instance properties, in insertion order.
    pub fn props_snapshot(&self) -> Vec<(String, Value)> {
        self.props.borrow().clone()
    }

    /// Short label for diagnostics and error messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            Kind::Object => "Object",
            Kind::Array => "Array",
            Kind::Str(_) => "String",
            Kind::Function(_) => "Function",
            Kind::NativeThunk(_) => "Function",
            Kind::Bound { .. } => "Function",
            Kind::Ctor(_) => "Function",
            Kind::RegExp(_) => "RegExp",
            Kind::Date(_) => "Date",
            Kind::Number(_) => "Number",
            Kind::Symbol(_) => "Symbol",
            Kind::Promise => "Promise",
            Kind::Exception => "Error",
            Kind::Window(_) => "Window",
            Kind::Document(_) => "Document",
            Kind::Navigator => "Navigator",
            Kind::Storage => "Storage",
            Kind::Console => "Console",
            Kind::CssModel => "CSS",
            Kind::RtcPeer(_) => "RTCPeerConnection",
            Kind::Element(_) => "HTMLElement",
            Kind::Context2d => "CanvasRenderingContext2D",
            Kind::ContextGl => "WebGLRenderingContext",
            Kind::ComputedStyle => "CSSStyleDeclaration",
        }
    }

    /// Whether calling this object is meaningful.
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            Kind::Function(_) | Kind::NativeThunk(_) | Kind::Bound { .. } | Kind::Ctor(_)
        )
    }
}

/// Box a raw string so member lookups can reach the string methods.
pub fn boxed_str(s: &str) -> ObjRef {
    Object::new(Kind::Str(s.to_string()))
}

/// Build an array object from a slice of element values.
pub fn new_array(items: &[Value]) -> ObjRef {
    let props = items
        .iter()
        .enumerate()
        .map(|(i, v)| (i.to_string(), v.clone()))
        .collect();
    Object::with_props(Kind::Array, props)
}

/// Derived array length: highest numeric key plus one.
pub fn array_length(obj: &Object) -> i64 {
    obj.props
        .borrow()
        .iter()
        .filter_map(|(k, _)| k.parse::<i64>().ok())
        .filter(|i| *i >= 0)
        .max()
        .map_or(0, |m| m + 1)
}

/// Elements `0..length`, with holes reading as `Undefined`.
pub fn array_elements(obj: &Object) -> Vec<Value> {
    let len = array_length(obj);
    (0..len)
        .map(|i| obj.get_raw(&i.to_string()).unwrap_or(Value::Undefined))
        .collect()
}

/// Assigning `length` truncates high indices and densifies the rest.
fn array_set_length(obj: &Object, value: &Value) -> Result<(), VmError> {
    let n = value.as_number()? as i64;
    let keys: Vec<i64> = obj
        .props
        .borrow()
        .iter()
        .filter_map(|(k, _)| k.parse::<i64>().ok())
        .collect();
    for k in keys.iter().filter(|k| **k >= n) {
        obj.remove_raw(&k.to_string());
    }
    for i in 0..n {
        if !keys.contains(&i) {
            obj.set_raw(&i.to_string(), Value::Undefined);
        }
    }
    Ok(())
}

/// Convert a property-key value to its string form.
///
/// Integers stringify plainly, floats keep their fraction marker, and the
/// well-known iterator symbol routes to the internal `__iter__` name.
pub fn prop_key(v: &Value) -> Result<String, VmError> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(if *f == f.trunc() && f.is_finite() {
            format!("{:.1}", f)
        } else {
            fmt_float(*f)
        }),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Object(o) => match &o.kind {
            Kind::Symbol(tag) if tag.as_deref() == Some("Symbol.iterator") => {
                Ok("__iter__".to_string())
            }
            Kind::Str(s) => Ok(s.clone()),
            _ => Err(VmError::Type("property name must be a string".to_string())),
        },
        other => Err(VmError::Type(format!(
            "property name must be a string, not {}",
            other.type_name()
        ))),
    }
}

/// Full property read with the documented lookup order.
pub fn get_prop(obj: &ObjRef, key: &str) -> Result<Value, VmError> {
    if let Some(v) = computed_prop(obj, key)? {
        return Ok(v);
    }
    if let Some(v) = obj.get_raw(key) {
        return Ok(v);
    }
    if builtins::has_method(obj, key) {
        return Ok(Value::Object(Rc::new(Object {
            kind: Kind::Bound {
                recv: Value::Object(Rc::clone(obj)),
                name: key.to_string(),
            },
            props: RefCell::new(Vec::new()),
        })));
    }
    if let Kind::Element(data) = &obj.kind {
        if let Some(v) = element::attr_or_style(data, key) {
            return Ok(v);
        }
    }
    if let Some(events) = event_table(obj) {
        if let Some(listener) = events
            .borrow()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, l)| l.clone())
        {
            return Ok(listener);
        }
    }
    debug!(kind = obj.kind_name(), key, "missing property read");
    Ok(Value::Undefined)
}

fn event_table(obj: &Object) -> Option<&RefCell<Vec<(String, Value)>>> {
    match &obj.kind {
        Kind::Window(state) => Some(&state.events),
        Kind::Document(state) => Some(&state.events),
        _ => None,
    }
}

fn computed_prop(obj: &ObjRef, key: &str) -> Result<Option<Value>, VmError> {
    Ok(match &obj.kind {
        Kind::Array if key == "length" => Some(Value::Int(array_length(obj))),
        Kind::Str(s) if key == "length" => Some(Value::Int(s.chars().count() as i64)),
        Kind::RegExp(data) if key == "G" => Some(Value::Bool(data.global)),
        Kind::Window(_) => window::window_computed(obj, key)?,
        Kind::Element(data) => element::element_computed(obj, data, key)?,
        _ => None,
    })
}

/// Full property write, honoring the per-kind hooks.
pub fn set_prop(obj: &ObjRef, key: &str, value: Value) -> Result<(), VmError> {
    match &obj.kind {
        // Element writes land on the attribute map, stringified.
        Kind::Element(data) => {
            element::set_attr(data, key, &value);
            Ok(())
        }
        Kind::Array if key == "length" => array_set_length(obj, &value),
        // The ICE-candidate hook fires synchronously on listener install.
        Kind::RtcPeer(state) => {
            obj.set_raw(key, value.clone());
            if key == "onicecandidate" {
                window::fire_ice_candidate(state, &value)?;
            }
            Ok(())
        }
        _ => {
            obj.set_raw(key, value);
            Ok(())
        }
    }
}

/// Property deletion. Deleting a missing property is an attribute error,
/// which the VM's unwind machinery can trap.
pub fn delete_prop(obj: &ObjRef, key: &str) -> Result<(), VmError> {
    let removed = match &obj.kind {
        Kind::Element(data) => element::remove_attr(data, key),
        _ => obj.remove_raw(key).map(|_| ()),
    };
    removed.ok_or_else(|| {
        VmError::Attribute(format!("{} has no property '{}'", obj.kind_name(), key))
    })
}

/// Membership test used by the `in` operator and the post-delete flag:
/// true iff a full lookup yields something other than `Undefined`.
pub fn has_prop(obj: &ObjRef, key: &str) -> Result<bool, VmError> {
    Ok(!matches!(get_prop(obj, key)?, Value::Undefined))
}

/// Member read on an arbitrary value. Reads through `Null`/`Undefined`
/// raise the catchable TypeError the payload's probes expect; raw strings
/// and lists index like sequences.
pub fn get_member(base: &Value, key: &Value) -> Result<Value, VmError> {
    match base {
        Value::Null => Err(VmError::Type(format!(
            "Cannot read properties of null (reading '{}')",
            key.to_display()
        ))),
        Value::Undefined => Err(VmError::Type(format!(
            "Cannot read properties of undefined (reading '{}')",
            key.to_display()
        ))),
        Value::Object(o) => get_prop(o, &prop_key(key)?),
        Value::Str(s) => match key {
            Value::Int(i) => seq_index(s.chars().count(), *i)
                .map(|idx| Value::Str(s.chars().nth(idx).unwrap().to_string()))
                .ok_or_else(|| VmError::Invariant("string index out of range".to_string())),
            _ => Err(VmError::Type(
                "string indices must be integers".to_string(),
            )),
        },
        Value::List(l) => match key {
            Value::Int(i) => {
                let list = l.borrow();
                seq_index(list.len(), *i)
                    .map(|idx| list[idx].clone())
                    .ok_or_else(|| VmError::Invariant("list index out of range".to_string()))
            }
            _ => Err(VmError::Type("list indices must be integers".to_string())),
        },
        other => Err(VmError::Type(format!(
            "cannot read property '{}' of {}",
            key.to_display(),
            other.type_name()
        ))),
    }
}

/// Member write on an arbitrary value.
pub fn set_member(base: &Value, key: &Value, value: Value) -> Result<(), VmError> {
    match base {
        Value::Object(o) => set_prop(o, &prop_key(key)?, value),
        Value::List(l) => match key {
            Value::Int(i) => {
                let mut list = l.borrow_mut();
                let len = list.len();
                match seq_index(len, *i) {
                    Some(idx) => {
                        list[idx] = value;
                        Ok(())
                    }
                    None => Err(VmError::Invariant(
                        "list assignment index out of range".to_string(),
                    )),
                }
            }
            _ => Err(VmError::Type("list indices must be integers".to_string())),
        },
        other => Err(VmError::Type(format!(
            "cannot set property '{}' on {}",
            key.to_display(),
            other.type_name()
        ))),
    }
}

/// Membership (`in`) on an arbitrary container.
pub fn contains(key: &Value, container: &Value) -> Result<bool, VmError> {
    match container {
        Value::Object(o) => has_prop(o, &prop_key(key)?),
        Value::List(l) => Ok(l.borrow().iter().any(|v| value_eq(v, key))),
        Value::Str(s) => match key {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(VmError::Type(
                "'in <string>' requires a string key".to_string(),
            )),
        },
        other => Err(VmError::Type(format!(
            "'in' is not supported on {}",
            other.type_name()
        ))),
    }
}

/// Sequence index with from-the-end negatives.
fn seq_index(len: usize, i: i64) -> Option<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx >= 0 && (idx as usize) < len {
        Some(idx as usize)
    } else {
        None
    }
}

/// Invoke a callable host object with raw positional arguments.
///
/// For VM closures the first argument is the `this` binding (the shim's
/// call sites pass `Null` there to mean "use the window").
pub fn call_function(f: &ObjRef, args: &[Value]) -> Result<Value, VmError> {
    match &f.kind {
        Kind::Function(closure) => crate::vm::run_closure(closure, f, args),
        Kind::NativeThunk(native) => native(args),
        Kind::Bound { recv, name } => builtins::call_method(recv, name, args),
        Kind::Ctor(builtin) => builtins::construct(f, *builtin, args),
        _ => Err(VmError::Type(format!(
            "{} is not a function",
            f.kind_name()
        ))),
    }
}

/// Box a caught error into the exception object the payload inspects
/// (`err.message`, `err.stack`, `err.toString()`).
pub fn make_exception(err: &VmError, trace: String) -> ObjRef {
    Object::with_props(
        Kind::Exception,
        vec![
            ("message".to_string(), err.message_value()),
            ("stack".to_string(), Value::Str(trace)),
        ],
    )
}

/// Stringify a host object the way a browser would.
pub fn display_object(obj: &ObjRef) -> String {
    let mut seen = HashSet::new();
    display_inner(obj, &mut seen)
}

fn display_inner(obj: &ObjRef, seen: &mut HashSet<usize>) -> String {
    let ptr = Rc::as_ptr(obj) as usize;
    if !seen.insert(ptr) {
        return "...".to_string();
    }
    match &obj.kind {
        Kind::Str(s) => s.clone(),
        Kind::Number(n) => fmt_float(*n),
        Kind::Array => {
            let parts: Vec<String> = array_elements(obj)
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    Value::Object(o) => display_inner(o, seen),
                    other => other.to_display(),
                })
                .collect();
            parts.join(",")
        }
        Kind::Function(_) | Kind::NativeThunk(_) | Kind::Bound { .. } | Kind::Ctor(_) => {
            "function () { [native code] }".to_string()
        }
        Kind::RegExp(data) => format!("/{}/", data.source),
        Kind::Date(d) => d.to_rfc3339(),
        Kind::Symbol(tag) => format!("Symbol({})", tag.as_deref().unwrap_or("")),
        Kind::Exception => {
            let msg = obj
                .get_raw("message")
                .map(|m| m.to_display())
                .unwrap_or_default();
            format!("Error: {}", msg)
        }
        Kind::Window(_) => "[object Window]".to_string(),
        Kind::Document(_) => "[object HTMLDocument]".to_string(),
        Kind::Element(_) => "[object HTMLElement]".to_string(),
        _ => "[object Object]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reads_are_undefined_but_null_faults() {
        let obj = Object::new(Kind::Object);
        let got = get_prop(&obj, "nope").unwrap();
        assert!(matches!(got, Value::Undefined));

        let err = get_member(&Value::Null, &Value::Str("x".into())).unwrap_err();
        assert!(err.is_catchable());
        assert!(err
            .to_string()
            .contains("Cannot read properties of null (reading 'x')"));
    }

    #[test]
    fn array_length_derivation_and_truncation() {
        let arr = new_array(&[Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(array_length(&arr), 3);

        set_prop(&arr, "7", Value::Int(9)).unwrap();
        assert_eq!(array_length(&arr), 8);

        set_prop(&arr, "length", Value::Int(2)).unwrap();
        assert_eq!(array_length(&arr), 2);
        assert!(matches!(arr.get_raw("7"), None));
    }

    #[test]
    fn prop_keys_stringify_numbers() {
        assert_eq!(prop_key(&Value::Int(3)).unwrap(), "3");
        assert_eq!(prop_key(&Value::Float(1.0)).unwrap(), "1.0");
        assert!(prop_key(&Value::Null).is_err());
    }

    #[test]
    fn deleting_missing_property_is_attribute_error() {
        let obj = Object::new(Kind::Object);
        obj.set_raw("a", Value::Int(1));
        delete_prop(&obj, "a").unwrap();
        let err = delete_prop(&obj, "a").unwrap_err();
        assert!(matches!(err, VmError::Attribute(_)));
    }

    #[test]
    fn negative_indices_read_from_the_end() {
        let s = Value::Str("abc".to_string());
        let got = get_member(&s, &Value::Int(-1)).unwrap();
        assert!(matches!(got, Value::Str(ref c) if c == "c"));
    }

    #[test]
    fn boxed_string_length_matches_char_count() {
        let boxed = boxed_str("héllo");
        let len = get_prop(&boxed, "length").unwrap();
        assert!(matches!(len, Value::Int(5)));
    }
}
