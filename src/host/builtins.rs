//! # Builtin method dispatch for the host shim
//!
//! This module is the shim's **standard library**: every method a payload
//! can invoke on a host object resolves here, by `(kind, name)` pair, the
//! same way the runtime's builtins have always dispatched by name.
//!
//! ## Design highlights
//! - **Pure dispatch:** [`call_method`] takes the receiver, the method
//!   name, and already-evaluated arguments, and returns a `Value` or a
//!   `VmError`. Nothing here reads VM registers.
//! - **Lazy binding:** property reads materialize methods as `Kind::Bound`
//!   objects; [`has_method`] is consulted first so that unknown names keep
//!   reading as `Undefined`.
//! - **Reference quirks preserved where payloads can see them:** `test`
//!   anchors at the start of the string, `replace` compiles string patterns
//!   as regexes and replaces *all* occurrences, `match` with a global flag
//!   returns the find-all list, and a single capture group makes find-all
//!   return the group instead of the whole match.
//!
//! ## Error conventions
//! - Wrong receiver/argument types → `VmError::Type` (catchable; payload
//!   probes depend on being able to trap these).
//! - Unknown method names never reach this module.

use std::rc::Rc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::RegexBuilder;

use super::element;
use super::window;
use super::{
    array_elements, array_length, boxed_str, call_function, get_member, new_array, set_member,
    Builtin, Kind, Object, RegExpData,
};
use crate::error::VmError;
use crate::value::{value_eq, ObjRef, Value};

/// Fixed shim timezone: UTC+8, matching the hardcoded browser profile.
pub fn shim_tz() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("static offset")
}

/// Method names exposed by each object kind.
fn method_names(obj: &Object) -> &'static [&'static str] {
    match &obj.kind {
        Kind::Array => &[
            "push", "unshift", "slice", "indexOf", "join", "reverse", "forEach",
        ],
        Kind::Str(_) => &[
            "split",
            "indexOf",
            "match",
            "replace",
            "slice",
            "substr",
            "toLowerCase",
            "toUpperCase",
            "charCodeAt",
        ],
        Kind::RegExp(_) => &["exec", "test"],
        Kind::Date(_) => &["getTime", "getTimezoneOffset"],
        Kind::Number(_) => &["toFixed"],
        Kind::Promise => &["then"],
        Kind::Exception => &["toString"],
        Kind::Function(_) | Kind::NativeThunk(_) | Kind::Bound { .. } => &["call", "apply"],
        Kind::Ctor(b) => match b {
            Builtin::Object => &["defineProperty", "getOwnPropertyDescriptor"],
            Builtin::String => &["fromCharCode"],
            Builtin::Math => &["random", "floor"],
            Builtin::Json => &["stringify"],
            Builtin::Symbol => &["for"],
            Builtin::Date => &["now"],
            _ => &[],
        },
        Kind::Window(_) => &[
            "btoa",
            "setTimeout",
            "setInterval",
            "clearInterval",
            "parseInt",
            "encodeURIComponent",
            "getComputedStyle",
            "matchMedia",
            "addEventListener",
        ],
        Kind::Document(_) => &["createElement", "getElementById", "addEventListener"],
        Kind::Navigator => &["requestMIDIAccess"],
        Kind::Storage => &["getItem", "setItem"],
        Kind::Console => &["log"],
        Kind::CssModel => &["supports"],
        Kind::RtcPeer(_) => &["createDataChannel", "createOffer", "setLocalDescription"],
        Kind::Element(data) => element::method_names(data),
        Kind::Context2d => &["fillRect", "fillText"],
        Kind::ContextGl => &["getSupportedExtensions", "getExtension", "getParameter"],
        Kind::ComputedStyle => &["getPropertyValue"],
        _ => &[],
    }
}

/// Whether `name` is a builtin method on `obj`.
pub fn has_method(obj: &Object, name: &str) -> bool {
    method_names(obj).contains(&name)
}

/// Dispatch a method call on a receiver value. Raw strings box themselves
/// first so the string methods apply.
pub fn call_method(recv: &Value, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match recv {
        Value::Object(obj) => call_object_method(obj, name, args),
        Value::Str(s) => call_object_method(&boxed_str(s), name, args),
        other => Err(VmError::Type(format!(
            "{} has no method '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn call_object_method(obj: &ObjRef, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match &obj.kind {
        Kind::Array => array_method(obj, name, args),
        Kind::Str(s) => string_method(s, name, args),
        Kind::RegExp(data) => regexp_method(data, name, args),
        Kind::Date(d) => date_method(d, name),
        Kind::Number(n) => match name {
            "toFixed" => {
                let digits = args.first().map_or(Ok(0.0), |v| v.as_number())? as usize;
                Ok(Value::Str(format!("{:.*}", digits, n)))
            }
            _ => unknown(obj, name),
        },
        Kind::Promise => match name {
            "then" => promise_then(obj, args),
            _ => unknown(obj, name),
        },
        Kind::Exception => match name {
            "toString" => {
                let msg = obj
                    .get_raw("message")
                    .map(|m| m.to_display())
                    .unwrap_or_default();
                Ok(Value::Str(format!("Error: {}", msg)))
            }
            _ => unknown(obj, name),
        },
        Kind::Function(_) | Kind::NativeThunk(_) | Kind::Bound { .. } => {
            function_method(obj, name, args)
        }
        Kind::Ctor(b) => ctor_static(obj, *b, name, args),
        Kind::Window(_) => window::window_method(obj, name, args),
        Kind::Document(_) => window::document_method(obj, name, args),
        Kind::Navigator => window::navigator_method(name, args),
        Kind::Storage => window::storage_method(obj, name, args),
        Kind::Console => window::console_method(name, args),
        Kind::CssModel => match name {
            "supports" => Ok(Value::Bool(true)),
            _ => unknown(obj, name),
        },
        Kind::RtcPeer(state) => window::rtc_method(obj, state, name, args),
        Kind::Element(data) => element::element_method(obj, data, name, args),
        Kind::Context2d => match name {
            // Drawing is a no-op; only toDataURL output matters.
            "fillRect" | "fillText" => Ok(Value::Undefined),
            _ => unknown(obj, name),
        },
        Kind::ContextGl => element::webgl_method(name, args),
        Kind::ComputedStyle => match name {
            "getPropertyValue" => Ok(Value::Str("rgb(0, 255, 0)".to_string())),
            _ => unknown(obj, name),
        },
        _ => unknown(obj, name),
    }
}

fn unknown(obj: &Object, name: &str) -> Result<Value, VmError> {
    Err(VmError::Type(format!(
        "{}.{} is not a function",
        obj.kind_name(),
        name
    )))
}

// =====================================================
//                      Array
// =====================================================

fn array_method(obj: &ObjRef, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        "push" => {
            let len = array_length(obj);
            obj.set_raw(
                &len.to_string(),
                args.first().cloned().unwrap_or(Value::Undefined),
            );
            Ok(Value::Int(array_length(obj)))
        }
        "unshift" => {
            let n = args.len() as i64;
            let len = array_length(obj);
            for i in (0..len).rev() {
                let v = obj
                    .get_raw(&i.to_string())
                    .unwrap_or(Value::Undefined);
                obj.set_raw(&(i + n).to_string(), v);
            }
            for (i, e) in args.iter().enumerate() {
                obj.set_raw(&i.to_string(), e.clone());
            }
            Ok(Value::Undefined)
        }
        "indexOf" => {
            let target = args.first().cloned().unwrap_or(Value::Undefined);
            for (k, v) in obj.props_snapshot() {
                if value_eq(&v, &target) {
                    if let Ok(i) = k.parse::<i64>() {
                        return Ok(Value::Int(i));
                    }
                }
            }
            Ok(Value::Int(-1))
        }
        "join" => {
            let sep = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(v) => str_arg(v).ok_or_else(|| {
                    VmError::Type("join() separator must be a string".to_string())
                })?,
            };
            let parts: Vec<String> = array_elements(obj)
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display(),
                })
                .collect();
            Ok(Value::Str(parts.join(&sep)))
        }
        "slice" => {
            let len = array_length(obj);
            let mut start = args.first().map_or(Ok(0.0), |v| match v {
                Value::Undefined => Ok(0.0),
                v => v.as_number(),
            })? as i64;
            let end = match args.get(1) {
                None | Some(Value::Undefined) => len,
                Some(v) => v.as_number()? as i64,
            };
            if start < 0 {
                start += len;
            }
            let mut items = Vec::new();
            for i in start..end {
                items.push(obj.get_raw(&i.to_string()).unwrap_or(Value::Undefined));
            }
            Ok(Value::Object(new_array(&items)))
        }
        "reverse" => {
            let elems = array_elements(obj);
            for (i, v) in elems.into_iter().rev().enumerate() {
                obj.set_raw(&i.to_string(), v);
            }
            Ok(Value::Object(Rc::clone(obj)))
        }
        "forEach" => {
            let pred = callable_arg(args.first())?;
            for v in array_elements(obj) {
                call_function(&pred, &[Value::Null, v])?;
            }
            Ok(Value::Undefined)
        }
        _ => unknown(obj, name),
    }
}

// =====================================================
//                      String
// =====================================================

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        "split" => match args.first() {
            Some(v) => {
                if let Some(sep) = str_arg(v) {
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str())
                            .map(|p| Value::Str(p.to_string()))
                            .collect()
                    };
                    Ok(Value::Object(new_array(&parts)))
                } else if let Some(re) = regexp_arg(v) {
                    let parts: Vec<Value> = re
                        .regex
                        .split(s)
                        .map(|p| Value::Str(p.to_string()))
                        .collect();
                    Ok(Value::Object(new_array(&parts)))
                } else {
                    Err(VmError::Type(
                        "split() expects a string or RegExp separator".to_string(),
                    ))
                }
            }
            None => Err(VmError::Type("split() expects a separator".to_string())),
        },
        "indexOf" => {
            let sub = args.first().and_then(str_arg).ok_or_else(|| {
                VmError::Type("indexOf() expects a string".to_string())
            })?;
            match s.find(sub.as_str()) {
                Some(byte_idx) => Ok(Value::Int(s[..byte_idx].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }
        "match" => {
            let re = args.first().and_then(regexp_arg).ok_or_else(|| {
                VmError::Type("match() expects a RegExp".to_string())
            })?;
            if re.global {
                // Find-all, with the reference's per-group-count shape:
                // no groups → the whole match, one group → that group's
                // text, several groups → the tuple of group texts.
                let groups = re.regex.captures_len() - 1;
                let mut found = Vec::new();
                for caps in re.regex.captures_iter(s) {
                    match groups {
                        0 => found.push(Value::Str(caps[0].to_string())),
                        1 => {
                            let g = caps.get(1).map_or("", |m| m.as_str());
                            found.push(Value::Str(g.to_string()));
                        }
                        _ => {
                            let tuple: Vec<Value> = (1..=groups)
                                .map(|i| {
                                    let g = caps.get(i).map_or("", |m| m.as_str());
                                    Value::Str(g.to_string())
                                })
                                .collect();
                            found.push(crate::value::new_list(tuple));
                        }
                    }
                }
                Ok(Value::Object(new_array(&found)))
            } else {
                regexp_exec(re, s)
            }
        }
        "replace" => {
            let re = match args.first() {
                Some(v) => {
                    if let Some(pat) = str_arg(v) {
                        // String patterns compile as regexes, as the
                        // reference does.
                        RegexBuilder::new(&pat).build().map_err(|e| {
                            VmError::Type(format!("invalid regular expression: {}", e))
                        })?
                    } else if let Some(r) = regexp_arg(v) {
                        r.regex.clone()
                    } else {
                        return Err(VmError::Type(
                            "replace() expects a string or RegExp".to_string(),
                        ));
                    }
                }
                None => {
                    return Err(VmError::Type(
                        "replace() expects a pattern".to_string(),
                    ))
                }
            };
            match args.get(1) {
                Some(rep) if callable_value(rep).is_some() => {
                    let f = callable_value(rep).unwrap();
                    let mut out = String::new();
                    let mut last = 0;
                    for m in re.find_iter(s) {
                        out.push_str(&s[last..m.start()]);
                        let r = call_function(
                            &f,
                            &[Value::Null, Value::Str(m.as_str().to_string())],
                        )?;
                        out.push_str(&r.to_display());
                        last = m.end();
                    }
                    out.push_str(&s[last..]);
                    Ok(Value::Str(out))
                }
                Some(rep) => {
                    let rep = str_arg(rep).ok_or_else(|| {
                        VmError::Type("replace() expects a string or function".to_string())
                    })?;
                    Ok(Value::Str(
                        re.replace_all(s, regex::NoExpand(&rep)).to_string(),
                    ))
                }
                None => Err(VmError::Type(
                    "replace() expects a replacement".to_string(),
                )),
            }
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = int_arg(args.first());
            let stop = match args.get(1) {
                None | Some(Value::Undefined) => None,
                Some(v) => Some(v.as_number()? as i64),
            };
            let (a, b) = py_slice(chars.len(), start, stop);
            Ok(Value::Str(chars[a..b].iter().collect()))
        }
        "substr" => {
            let chars: Vec<char> = s.chars().collect();
            let start = int_arg(args.first());
            let (a, _) = py_slice(chars.len(), start, None);
            let tail: Vec<char> = chars[a..].to_vec();
            let taken = match args.get(1) {
                None | Some(Value::Undefined) => tail,
                Some(v) => {
                    let (ta, tb) = py_slice(tail.len(), 0, Some(v.as_number()? as i64));
                    tail[ta..tb].to_vec()
                }
            };
            Ok(Value::Str(taken.into_iter().collect()))
        }
        "toLowerCase" => Ok(Value::Str(s.to_lowercase())),
        "toUpperCase" => Ok(Value::Str(s.to_uppercase())),
        "charCodeAt" => {
            let i = int_arg(args.first());
            let chars: Vec<char> = s.chars().collect();
            if i >= chars.len() as i64 {
                return Ok(Value::Float(f64::NAN));
            }
            let idx = if i < 0 { i + chars.len() as i64 } else { i };
            match chars.get(idx.max(0) as usize) {
                Some(c) if idx >= 0 => Ok(Value::Int(*c as u32 as i64)),
                _ => Err(VmError::Invariant("string index out of range".to_string())),
            }
        }
        _ => Err(VmError::Type(format!("String.{} is not a function", name))),
    }
}

/// Python-style slice bounds: negatives count from the end, results clamp
/// into range, inverted ranges collapse to empty.
fn py_slice(len: usize, start: i64, stop: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let norm = |i: i64| -> i64 {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len)
    };
    let a = norm(start);
    let b = norm(stop.unwrap_or(len));
    if a > b {
        (a as usize, a as usize)
    } else {
        (a as usize, b as usize)
    }
}

// =====================================================
//                      RegExp
// =====================================================

fn regexp_method(data: &RegExpData, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let s = args.first().and_then(str_arg).ok_or_else(|| {
        VmError::Type(format!("RegExp.{} expects a string", name))
    })?;
    match name {
        "exec" => regexp_exec(data, &s),
        // Anchored at the start, exactly like the reference's matcher.
        "test" => Ok(Value::Bool(
            data.regex.find(&s).map_or(false, |m| m.start() == 0),
        )),
        _ => Err(VmError::Type(format!("RegExp.{} is not a function", name))),
    }
}

/// Search anywhere; on a hit return `[whole, group1, ...]`, else `null`.
fn regexp_exec(data: &RegExpData, s: &str) -> Result<Value, VmError> {
    match data.regex.captures(s) {
        Some(caps) => {
            let mut items = vec![Value::Str(caps[0].to_string())];
            for g in caps.iter().skip(1) {
                items.push(match g {
                    Some(m) => Value::Str(m.as_str().to_string()),
                    None => Value::Undefined,
                });
            }
            Ok(Value::Object(new_array(&items)))
        }
        None => Ok(Value::Null),
    }
}

/// Build a RegExp object from pattern + modifier strings.
pub fn regexp_construct(args: &[Value]) -> Result<Value, VmError> {
    let pattern = args.first().and_then(str_arg).ok_or_else(|| {
        VmError::Type("RegExp() expects a pattern string".to_string())
    })?;
    let modifiers = args.get(1).and_then(str_arg).unwrap_or_default();
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(modifiers.contains('i'))
        .multi_line(modifiers.contains('m'))
        .build()
        .map_err(|e| VmError::Type(format!("invalid regular expression: {}", e)))?;
    Ok(Value::Object(Object::new(Kind::RegExp(RegExpData {
        regex,
        global: modifiers.contains('g'),
        source: pattern,
    }))))
}

// =====================================================
//                      Date
// =====================================================

fn date_method(d: &DateTime<FixedOffset>, name: &str) -> Result<Value, VmError> {
    match name {
        "getTime" => Ok(Value::Int(d.timestamp_millis())),
        // Minutes west of UTC, negated per JS convention.
        "getTimezoneOffset" => Ok(Value::Int(
            -(d.offset().local_minus_utc() as i64) / 60,
        )),
        _ => Err(VmError::Type(format!("Date.{} is not a function", name))),
    }
}

/// `new Date()` / `new Date(millis)` / `new Date(iso_string)`.
pub fn date_construct(args: &[Value]) -> Result<Value, VmError> {
    let tz = shim_tz();
    let dt = match args.first() {
        None | Some(Value::Undefined) | Some(Value::Null) => Utc::now().with_timezone(&tz),
        Some(Value::Int(ms)) => tz
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| VmError::Type("Date() millisecond value out of range".to_string()))?,
        Some(Value::Float(ms)) => tz
            .timestamp_millis_opt(*ms as i64)
            .single()
            .ok_or_else(|| VmError::Type("Date() millisecond value out of range".to_string()))?,
        Some(v) => match str_arg(v) {
            Some(s) => parse_date_string(&s, &tz)?,
            None => {
                return Err(VmError::Type(
                    "Date() expects milliseconds or a date string".to_string(),
                ))
            }
        },
    };
    Ok(Value::Object(Object::new(Kind::Date(dt))))
}

fn parse_date_string(s: &str, tz: &FixedOffset) -> Result<DateTime<FixedOffset>, VmError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(tz));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            if let Some(dt) = naive.and_local_timezone(*tz).single() {
                return Ok(dt);
            }
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date
            .and_hms_opt(0, 0, 0)
            .and_then(|n| n.and_local_timezone(*tz).single())
        {
            return Ok(dt);
        }
    }
    Err(VmError::Type(format!("invalid date string '{}'", s)))
}

/// Static `Date` surface forwarded by the payload's parse-time thunk.
pub fn date_static(attr: &str, args: &[Value]) -> Result<Value, VmError> {
    match attr {
        "now" => Ok(Value::Int(Utc::now().timestamp_millis())),
        "parse" => {
            let s = args.first().and_then(str_arg).ok_or_else(|| {
                VmError::Type("Date.parse expects a string".to_string())
            })?;
            let dt = parse_date_string(&s, &shim_tz())?;
            Ok(Value::Int(dt.timestamp_millis()))
        }
        _ => Err(VmError::Attribute(format!(
            "Date has no static method '{}'",
            attr
        ))),
    }
}

// =====================================================
//                  Function call / apply
// =====================================================

fn function_method(f: &ObjRef, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        // The receiver's `this` slot is the leading argument; closures
        // consume it themselves.
        "call" => call_function(f, args),
        "apply" => {
            let this = args.first().cloned().unwrap_or(Value::Undefined);
            let mut forwarded = vec![this];
            if let Some(arr) = args.get(1) {
                forwarded.extend(enumerate_arg(arr)?);
            }
            call_function(f, &forwarded)
        }
        _ => unknown(f, name),
    }
}

fn enumerate_arg(v: &Value) -> Result<Vec<Value>, VmError> {
    match v {
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Object(o) if matches!(o.kind, Kind::Array) => Ok(array_elements(o)),
        Value::Undefined | Value::Null => Ok(Vec::new()),
        other => Err(VmError::Type(format!(
            "apply() arguments must be an array, not {}",
            other.type_name()
        ))),
    }
}

// =====================================================
//                  Constructor statics
// =====================================================

fn ctor_static(
    ctor: &ObjRef,
    builtin: Builtin,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    match (builtin, name) {
        (Builtin::Object, "defineProperty") => {
            let target = args.first().cloned().unwrap_or(Value::Undefined);
            let key = args.get(1).cloned().unwrap_or(Value::Undefined);
            let descriptor = args.get(2).cloned().unwrap_or(Value::Undefined);
            // The descriptor's getter becomes the stored value.
            let getter = get_member(&descriptor, &Value::Str("get".to_string()))?;
            set_member(&target, &key, getter)?;
            Ok(Value::Undefined)
        }
        (Builtin::Object, "getOwnPropertyDescriptor") => Ok(Value::Undefined),
        (Builtin::String, "fromCharCode") => {
            let mut out = String::new();
            for a in args {
                let code = a.as_number()? as u32;
                out.push(char::from_u32(code).ok_or_else(|| {
                    VmError::Invariant(format!("invalid char code {}", code))
                })?);
            }
            Ok(Value::Str(out))
        }
        (Builtin::Math, "random") => Ok(Value::Float(rand::random::<f64>())),
        (Builtin::Math, "floor") => {
            let n = args.first().map_or(Ok(0.0), |v| v.as_number())?;
            Ok(Value::Int(n.floor() as i64))
        }
        (Builtin::Json, "stringify") => json_stringify(args.first().unwrap_or(&Value::Undefined)),
        (Builtin::Symbol, "for") => {
            let key = args
                .first()
                .map(|v| v.to_display())
                .unwrap_or_default();
            let register = match ctor.get_raw("register") {
                Some(Value::Object(r)) => r,
                _ => {
                    let r = Object::new(Kind::Object);
                    ctor.set_raw("register", Value::Object(Rc::clone(&r)));
                    r
                }
            };
            if let Some(existing) = register.get_raw(&key) {
                return Ok(existing);
            }
            let sym = Value::Object(Object::new(Kind::Symbol(Some(key.clone()))));
            register.set_raw(&key, sym.clone());
            Ok(sym)
        }
        (Builtin::Date, "now") => Ok(Value::Int(Utc::now().timestamp_millis())),
        _ => unknown(ctor, name),
    }
}

/// Construct an instance from a window constructor.
pub fn construct(ctor: &ObjRef, builtin: Builtin, args: &[Value]) -> Result<Value, VmError> {
    match builtin {
        Builtin::Object => Ok(Value::Object(Object::new(Kind::Object))),
        Builtin::Array => Ok(Value::Object(new_array(args))),
        Builtin::String => {
            let s = args.first().map(|v| v.to_display()).unwrap_or_default();
            Ok(Value::Object(boxed_str(&s)))
        }
        Builtin::Number => {
            let n = match args.first() {
                None => 0.0,
                Some(Value::Int(i)) => *i as f64,
                Some(Value::Float(f)) => *f,
                Some(Value::Bool(b)) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                Some(v) => match str_arg(v) {
                    Some(s) => s.trim().parse::<f64>().map_err(|_| {
                        VmError::Type(format!("could not convert '{}' to a number", s))
                    })?,
                    None => {
                        return Err(VmError::Type(
                            "Number() expects a number or string".to_string(),
                        ))
                    }
                },
            };
            Ok(Value::Object(Object::new(Kind::Number(n))))
        }
        Builtin::Date => date_construct(args),
        Builtin::RegExp => regexp_construct(args),
        Builtin::Symbol => Ok(Value::Object(Object::new(Kind::Symbol(
            args.first().map(|v| v.to_display()),
        )))),
        Builtin::Error => {
            let message = args.first().cloned().unwrap_or(Value::Undefined);
            Ok(Value::Object(Object::with_props(
                Kind::Exception,
                vec![
                    ("message".to_string(), message),
                    (
                        "stack".to_string(),
                        Value::Str("Error\n    at <anonymous>".to_string()),
                    ),
                ],
            )))
        }
        Builtin::Math | Builtin::Json => Ok(Value::Object(Object::new(Kind::Object))),
        Builtin::RtcPeerConnection => {
            let ip = ctor
                .get_raw("_ip")
                .map(|v| v.to_display())
                .unwrap_or_else(|| window::DEFAULT_IP.to_string());
            let peer = Object::with_props(
                Kind::RtcPeer(window::RtcState { ip }),
                vec![
                    (
                        "server".to_string(),
                        args.first().cloned().unwrap_or(Value::Undefined),
                    ),
                    (
                        "localDescription".to_string(),
                        Value::Object(Object::new(Kind::Object)),
                    ),
                ],
            );
            Ok(Value::Object(peer))
        }
    }
}

// =====================================================
//                      Promise
// =====================================================

/// An already-resolved promise.
pub fn promise_resolved(result: Value) -> Value {
    Value::Object(Object::with_props(
        Kind::Promise,
        vec![
            ("result".to_string(), result),
            ("exc".to_string(), Value::Undefined),
        ],
    ))
}

/// An already-rejected promise carrying a boxed exception value.
pub fn promise_rejected(exc: Value) -> Value {
    Value::Object(Object::with_props(
        Kind::Promise,
        vec![
            ("result".to_string(), Value::Undefined),
            ("exc".to_string(), exc),
        ],
    ))
}

/// Eager `.then`: continuations run synchronously in the caller's frame and
/// chains of promises collapse to the innermost one.
fn promise_then(obj: &ObjRef, args: &[Value]) -> Result<Value, VmError> {
    let exc = obj
        .get_raw("exc")
        .filter(|v| !matches!(v, Value::Undefined | Value::Null));

    if let Some(e) = exc {
        if let Some(reject) = args.get(1).and_then(callable_value) {
            // The rejection callback is invoked bare, exception first.
            return settle(call_function(&reject, &[e]));
        }
        return Ok(Value::Object(Rc::clone(obj)));
    }

    match args.first().and_then(callable_value) {
        Some(resolve) => {
            let result = obj.get_raw("result").unwrap_or(Value::Undefined);
            let outcome = if matches!(resolve.kind, Kind::Function(_)) {
                call_function(&resolve, &[Value::Null, result])
            } else {
                call_function(&resolve, &[result])
            };
            settle(outcome)
        }
        None => Ok(Value::Object(Rc::clone(obj))),
    }
}

/// Wrap a continuation outcome into a promise, collapsing nested promises
/// and converting catchable failures into rejections.
fn settle(outcome: Result<Value, VmError>) -> Result<Value, VmError> {
    match outcome {
        Ok(Value::Object(o)) if matches!(o.kind, Kind::Promise) => Ok(Value::Object(o)),
        Ok(v) => Ok(promise_resolved(v)),
        Err(e) if e.is_catchable() => {
            let boxed = super::make_exception(&e, format!("{}\n    at <anonymous>", e));
            Ok(promise_rejected(Value::Object(boxed)))
        }
        Err(e) => Err(e),
    }
}

// =====================================================
//                      JSON
// =====================================================

/// `JSON.stringify` over host values; returns a boxed string.
pub fn json_stringify(v: &Value) -> Result<Value, VmError> {
    let json = to_json(v)?;
    let s = serde_json::to_string(&json)
        .map_err(|e| VmError::Type(format!("JSON stringify failed: {}", e)))?;
    Ok(Value::Object(boxed_str(&s)))
}

fn to_json(v: &Value) -> Result<serde_json::Value, VmError> {
    use serde_json::Value as Json;
    Ok(match v {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(l) => {
            let items: Result<Vec<Json>, VmError> =
                l.borrow().iter().map(to_json).collect();
            Json::Array(items?)
        }
        Value::Object(o) => match &o.kind {
            Kind::Str(s) => Json::String(s.clone()),
            Kind::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Kind::Array => {
                let items: Result<Vec<Json>, VmError> =
                    array_elements(o).iter().map(to_json).collect();
                Json::Array(items?)
            }
            Kind::Function(_) | Kind::NativeThunk(_) | Kind::Bound { .. } | Kind::Ctor(_) => {
                return Err(VmError::Type(
                    "function values are not JSON serializable".to_string(),
                ))
            }
            // Any other host object serializes its property table, in
            // insertion order.
            _ => {
                let mut map = serde_json::Map::new();
                for (k, val) in o.props_snapshot() {
                    map.insert(k, to_json(&val)?);
                }
                Json::Object(map)
            }
        },
    })
}

// =====================================================
//                      Helpers
// =====================================================

/// Raw or boxed string argument.
pub fn str_arg(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.clone()),
        Value::Object(o) => match &o.kind {
            Kind::Str(s) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn regexp_arg(v: &Value) -> Option<&RegExpData> {
    match v {
        Value::Object(o) => match &o.kind {
            Kind::RegExp(d) => Some(d),
            _ => None,
        },
        _ => None,
    }
}

fn int_arg(v: Option<&Value>) -> i64 {
    v.and_then(|v| v.as_number().ok()).unwrap_or(0.0) as i64
}

fn callable_value(v: &Value) -> Option<ObjRef> {
    match v {
        Value::Object(o) if o.is_callable() => Some(Rc::clone(o)),
        _ => None,
    }
}

fn callable_arg(v: Option<&Value>) -> Result<ObjRef, VmError> {
    v.and_then(callable_value)
        .ok_or_else(|| VmError::Type("expected a function argument".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::get_prop;

    #[test]
    fn array_push_and_length_law() {
        let arr = new_array(&[]);
        for i in 0..5 {
            let len = array_method(&arr, "push", &[Value::Int(i)]).unwrap();
            assert!(matches!(len, Value::Int(n) if n == i + 1));
        }
        assert_eq!(array_length(&arr), 5);
    }

    #[test]
    fn array_slice_reverse_join() {
        let arr = new_array(&[Value::Int(1), Value::Int(2), Value::Int(3)]);
        let sliced = array_method(&arr, "slice", &[Value::Int(1)]).unwrap();
        let sliced = sliced.as_object().unwrap().clone();
        assert_eq!(array_length(&sliced), 2);

        array_method(&arr, "reverse", &[]).unwrap();
        let joined = array_method(&arr, "join", &[Value::Str("-".into())]).unwrap();
        assert!(matches!(joined, Value::Str(ref s) if s == "3-2-1"));
    }

    #[test]
    fn string_methods_follow_reference_semantics() {
        let hi = string_method("Hello World", "toLowerCase", &[]).unwrap();
        assert!(matches!(hi, Value::Str(ref s) if s == "hello world"));

        let idx = string_method("abcabc", "indexOf", &[Value::Str("c".into())]).unwrap();
        assert!(matches!(idx, Value::Int(2)));

        let nan = string_method("ab", "charCodeAt", &[Value::Int(5)]).unwrap();
        assert!(matches!(nan, Value::Float(f) if f.is_nan()));

        let code = string_method("ab", "charCodeAt", &[Value::Int(1)]).unwrap();
        assert!(matches!(code, Value::Int(98)));
    }

    #[test]
    fn global_match_shape_follows_group_count() {
        // No groups: whole-match strings.
        let re = regexp_construct(&[Value::Str("[0-9]+".into()), Value::Str("g".into())])
            .unwrap();
        let hits = string_method("a1b22", "match", &[re]).unwrap();
        let hits = hits.as_object().unwrap().clone();
        assert_eq!(array_length(&hits), 2);
        assert!(matches!(hits.get_raw("1"), Some(Value::Str(ref s)) if s == "22"));

        // One group: that group's text.
        let re = regexp_construct(&[Value::Str("([0-9])x".into()), Value::Str("g".into())])
            .unwrap();
        let hits = string_method("1x 2x", "match", &[re]).unwrap();
        let hits = hits.as_object().unwrap().clone();
        assert!(matches!(hits.get_raw("0"), Some(Value::Str(ref s)) if s == "1"));

        // Several groups: the tuple of group texts per match.
        let re = regexp_construct(&[
            Value::Str("([a-z])([0-9])".into()),
            Value::Str("g".into()),
        ])
        .unwrap();
        let hits = string_method("a1 b2", "match", &[re]).unwrap();
        let hits = hits.as_object().unwrap().clone();
        let first = hits.get_raw("0").unwrap();
        let tuple = first.as_list().unwrap().borrow().clone();
        assert_eq!(tuple.len(), 2);
        assert!(matches!(tuple[0], Value::Str(ref s) if s == "a"));
        assert!(matches!(tuple[1], Value::Str(ref s) if s == "1"));
    }

    #[test]
    fn replace_compiles_string_patterns_and_replaces_all() {
        let out = string_method(
            "a1b2c3",
            "replace",
            &[Value::Str("[0-9]".into()), Value::Str("".into())],
        )
        .unwrap();
        assert!(matches!(out, Value::Str(ref s) if s == "abc"));
    }

    #[test]
    fn regexp_test_is_anchored_and_exec_searches() {
        let re = regexp_construct(&[Value::Str("b+".into()), Value::Str("".into())]).unwrap();
        let re = re.as_object().unwrap().clone();
        let data = match &re.kind {
            Kind::RegExp(d) => d,
            _ => unreachable!(),
        };
        assert!(matches!(
            regexp_method(data, "test", &[Value::Str("abb".into())]).unwrap(),
            Value::Bool(false)
        ));
        assert!(matches!(
            regexp_method(data, "test", &[Value::Str("bba".into())]).unwrap(),
            Value::Bool(true)
        ));
        let hit = regexp_method(data, "exec", &[Value::Str("abb".into())]).unwrap();
        assert!(hit.as_object().is_some());
        let miss = regexp_method(data, "exec", &[Value::Str("xyz".into())]).unwrap();
        assert!(matches!(miss, Value::Null));
    }

    #[test]
    fn date_round_trip_and_offset() {
        let d = date_construct(&[Value::Int(1_700_000_000_000)]).unwrap();
        let d = d.as_object().unwrap().clone();
        let t = call_object_method(&d, "getTime", &[]).unwrap();
        assert!(matches!(t, Value::Int(1_700_000_000_000)));
        let off = call_object_method(&d, "getTimezoneOffset", &[]).unwrap();
        assert!(matches!(off, Value::Int(-480)));
    }

    #[test]
    fn json_stringify_preserves_insertion_order() {
        let obj = Object::new(Kind::Object);
        obj.set_raw("z", Value::Int(1));
        obj.set_raw("a", Value::Str("x".into()));
        obj.set_raw("list", Value::Object(new_array(&[Value::Null, Value::Int(2)])));
        let s = json_stringify(&Value::Object(obj)).unwrap();
        let s = str_arg(&s).unwrap();
        assert_eq!(s, r#"{"z":1,"a":"x","list":[null,2]}"#);
    }

    #[test]
    fn promise_then_collapses_synchronously() {
        let p = promise_resolved(Value::Int(7));
        let p = p.as_object().unwrap().clone();
        // No callback: same promise comes back.
        let same = call_object_method(&p, "then", &[]).unwrap();
        assert!(std::rc::Rc::ptr_eq(same.as_object().unwrap(), &p));
    }

    #[test]
    fn bound_methods_materialize_on_property_read() {
        let arr = new_array(&[Value::Int(1)]);
        let pushed = get_prop(&arr, "push").unwrap();
        let f = pushed.as_object().unwrap().clone();
        assert!(f.is_callable());
        call_function(&f, &[Value::Int(5)]).unwrap();
        assert_eq!(array_length(&arr), 2);
    }
}
