//! # chaosvm
//!
//! Runtime for the TDC anti-bot virtual machine. A payload's script text
//! hides a byte-coded program and a shuffled dispatcher; this crate
//! recovers both (see [`parse_vm`]), executes the program on a stack
//! machine against an emulated browser window, and surfaces the `TDC`
//! fingerprint object the payload leaves behind.

mod error;
mod host;
mod opcode;
mod parse;
mod stxhash;
mod value;
mod vm;

pub use error::VmError;
pub use host::window::build_window;
pub use opcode::{ChaosStack, Op, OpMap, OP_FEATS};
pub use parse::parse_vm;
pub use value::Value;

use host::window;
use value::ObjRef;

/// Driver overrides for the emulated environment. Empty strings and an
/// empty track leave the built-in browser profile untouched.
#[derive(Default)]
pub struct PrepareOptions {
    /// Public address reported through the RTC probe.
    pub ip: String,
    /// `navigator.userAgent`.
    pub user_agent: String,
    /// `location.href`.
    pub href: String,
    /// `location.referer`.
    pub referer: String,
    /// Mouse positions replayed to the payload's `mousemove` listener.
    pub mouse_track: Vec<(f64, f64)>,
}

/// Build a window, apply overrides, run the payload, and return its `TDC`
/// object (as left on the window).
pub fn prepare(payload: &str, opts: &PrepareOptions) -> Result<Value, VmError> {
    let win = window::build_window();

    if !opts.ip.is_empty() {
        if let Some(Value::Object(rtc)) = win.get_raw("RTCPeerConnection") {
            rtc.set_raw("_ip", Value::Str(opts.ip.clone()));
        }
    }
    if !opts.user_agent.is_empty() {
        if let Some(Value::Object(nav)) = win.get_raw("navigator") {
            nav.set_raw("userAgent", Value::Str(opts.user_agent.clone()));
        }
    }
    if !opts.href.is_empty() || !opts.referer.is_empty() {
        if let Some(loc) = location_of(&win) {
            if !opts.href.is_empty() {
                loc.set_raw("href", Value::Str(opts.href.clone()));
            }
            if !opts.referer.is_empty() {
                loc.set_raw("referer", Value::Str(opts.referer.clone()));
            }
        }
    }
    if !opts.mouse_track.is_empty() {
        window::add_mouse_track(&win, &opts.mouse_track);
    }

    let stack = parse_vm(payload, &win)?;
    stack.run(&win)?;
    Ok(win.get_raw("TDC").unwrap_or(Value::Undefined))
}

/// Host-side invocation of a callable member, e.g.
/// `call_member(&tdc, "getData", &[Value::Null, Value::Bool(true)])`.
///
/// Closure members treat a leading falsy argument as "bind the window",
/// matching how the payload's own code calls them.
pub fn call_member(obj: &Value, name: &str, args: &[Value]) -> Result<Value, VmError> {
    let member = host::get_member(obj, &Value::Str(name.to_string()))?;
    match member {
        Value::Object(f) if f.is_callable() => host::call_function(&f, args),
        other => Err(VmError::Type(format!(
            "{} is not a callable member",
            other.type_name()
        ))),
    }
}

fn location_of(win: &ObjRef) -> Option<ObjRef> {
    match win.get_raw("document")? {
        Value::Object(doc) => match doc.get_raw("location")? {
            Value::Object(loc) => Some(loc),
            _ => None,
        },
        _ => None,
    }
}
