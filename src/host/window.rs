//! # Window Environment
//!
//! Construction of the emulated browser window and the method surfaces of
//! its fixed components: document, navigator, screen, location, console,
//! storage, CSS, and RTCPeerConnection. The hardcoded values form the
//! browser profile the payload fingerprints; the driver can override the
//! externally-visible ones (IP, user agent, href, referer, mouse track).
//!
//! Everything here is synchronous: timers fire inline, the ICE candidate
//! "arrives" the moment a listener is installed, and the mouse track
//! replays during `addEventListener`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::builtins::{self, promise_resolved, str_arg};
use super::element;
use super::{boxed_str, call_function, get_prop, new_array, Builtin, Kind, Object};
use crate::error::VmError;
use crate::value::{ObjRef, Value};

/// Default public address reported through the RTC probe.
pub const DEFAULT_IP: &str = "114.5.1.4";

const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36 Edg/112.0.1722.64";

const DEFAULT_HREF: &str = "https://t.captcha.qq.com/template/drag_ele.html";
const DEFAULT_REFERER: &str = "https://xui.ptlogin2.qq.com/cgi-bin/xlogin";

/// Escape set matching the reference's URL quoting: everything except
/// alphanumerics, `_ . - ~` and `/`.
const QUOTE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Per-window mutable state: the top-window back reference and registered
/// event listeners.
pub struct WindowState {
    pub top: RefCell<Weak<Object>>,
    pub events: RefCell<Vec<(String, Value)>>,
}

/// Per-document mutable state: listeners, the injected mouse track, and a
/// back reference to the owning window.
pub struct DocumentState {
    pub events: RefCell<Vec<(String, Value)>>,
    pub track: RefCell<Vec<(f64, f64)>>,
    pub window: RefCell<Weak<Object>>,
}

/// Per-connection RTC state.
pub struct RtcState {
    pub ip: String,
}

/// Build a fresh top-level window with the default browser profile.
pub fn build_window() -> ObjRef {
    let window = Object::new(Kind::Window(WindowState {
        top: RefCell::new(Weak::new()),
        events: RefCell::new(Vec::new()),
    }));
    if let Kind::Window(state) = &window.kind {
        *state.top.borrow_mut() = Rc::downgrade(&window);
    }

    let document = build_document(&window);
    window.set_raw("document", Value::Object(document));
    window.set_raw("navigator", Value::Object(build_navigator()));
    window.set_raw("console", Value::Object(Object::new(Kind::Console)));
    window.set_raw("screen", Value::Object(build_screen()));
    window.set_raw("sessionStorage", Value::Object(Object::new(Kind::Storage)));
    window.set_raw("localStorage", Value::Object(Object::new(Kind::Storage)));
    window.set_raw("CSS", Value::Object(Object::new(Kind::CssModel)));
    window.set_raw("SyncManager", Value::Object(Object::new(Kind::Object)));
    window.set_raw("customElements", Value::Object(Object::new(Kind::Object)));

    window.set_raw(
        "TCaptchaReferrer",
        Value::Str(DEFAULT_REFERER.to_string()),
    );
    window.set_raw("innerWidth", Value::Int(300));
    window.set_raw("innerHeight", Value::Int(230));

    for (name, builtin) in [
        ("Date", Builtin::Date),
        ("Math", Builtin::Math),
        ("JSON", Builtin::Json),
        ("Array", Builtin::Array),
        ("Object", Builtin::Object),
        ("String", Builtin::String),
        ("Number", Builtin::Number),
        ("Symbol", Builtin::Symbol),
        ("RegExp", Builtin::RegExp),
        ("Error", Builtin::Error),
        ("RTCPeerConnection", Builtin::RtcPeerConnection),
    ] {
        let ctor = Object::new(Kind::Ctor(builtin));
        match builtin {
            Builtin::Symbol => {
                let iterator =
                    Object::new(Kind::Symbol(Some("Symbol.iterator".to_string())));
                ctor.set_raw("iterator", Value::Object(iterator));
            }
            Builtin::RtcPeerConnection => {
                ctor.set_raw("_ip", Value::Str(DEFAULT_IP.to_string()));
            }
            _ => {}
        }
        window.set_raw(name, Value::Object(ctor));
    }

    window
}

fn build_document(window: &ObjRef) -> ObjRef {
    let document = Object::new(Kind::Document(DocumentState {
        events: RefCell::new(Vec::new()),
        track: RefCell::new(Vec::new()),
        window: RefCell::new(Rc::downgrade(window)),
    }));

    let location = Object::with_props(
        Kind::Object,
        vec![
            ("href".to_string(), Value::Str(DEFAULT_HREF.to_string())),
            (
                "referer".to_string(),
                Value::Str(DEFAULT_REFERER.to_string()),
            ),
        ],
    );
    document.set_raw("location", Value::Object(location));
    document.set_raw("characterSet", Value::Str("UTF-8".to_string()));
    document.set_raw("cookie", Value::Str(String::new()));

    let html = element::create_element("html", &document);
    let head = element::create_element("head", &document);
    let body = element::create_element("body", &document);
    element::append_child_element(&html, &head);
    element::append_child_element(&html, &body);
    document.set_raw("documentElement", Value::Object(html));
    document.set_raw("head", Value::Object(head));
    document.set_raw("body", Value::Object(body));

    document
}

fn build_navigator() -> ObjRef {
    let languages = new_array(&[
        Value::Str("zh-CN".to_string()),
        Value::Str("en".to_string()),
        Value::Str("en-GB".to_string()),
        Value::Str("en-US".to_string()),
    ]);
    Object::with_props(
        Kind::Navigator,
        vec![
            ("cookieEnabled".to_string(), Value::Bool(true)),
            ("languages".to_string(), Value::Object(languages)),
            ("userAgent".to_string(), Value::Str(DEFAULT_UA.to_string())),
            ("platform".to_string(), Value::Str("Win32".to_string())),
            ("hardwareConcurrency".to_string(), Value::Int(8)),
            (
                "appVersion".to_string(),
                Value::Str(DEFAULT_UA[8..].to_string()),
            ),
            ("vendor".to_string(), Value::Str("Google Inc.".to_string())),
            ("appName".to_string(), Value::Str("Netscape".to_string())),
            ("webdriver".to_string(), Value::Bool(false)),
            (
                "serviceWorker".to_string(),
                Value::Object(Object::new(Kind::Object)),
            ),
        ],
    )
}

fn build_screen() -> ObjRef {
    Object::with_props(
        Kind::Object,
        vec![
            ("availHeight".to_string(), Value::Int(792)),
            ("availLeft".to_string(), Value::Int(0)),
            ("availTop".to_string(), Value::Int(0)),
            ("availWidth".to_string(), Value::Int(1408)),
            ("colorDepth".to_string(), Value::Int(24)),
            ("height".to_string(), Value::Int(792)),
            ("isExtended".to_string(), Value::Bool(false)),
            ("pixelDepth".to_string(), Value::Int(24)),
            ("width".to_string(), Value::Int(1408)),
        ],
    )
}

/// Inject the mouse track replayed to new `mousemove` listeners.
pub fn add_mouse_track(window: &ObjRef, track: &[(f64, f64)]) {
    if let Some(Value::Object(doc)) = window.get_raw("document") {
        if let Kind::Document(state) = &doc.kind {
            *state.track.borrow_mut() = track.to_vec();
        }
    }
}

/// A non-top window for `iframe.contentWindow`: shares the top window's
/// components, keeps its own identity.
pub fn build_iframe_window(top: &ObjRef) -> ObjRef {
    let window = Object::with_props(
        Kind::Window(WindowState {
            top: RefCell::new(Rc::downgrade(top)),
            events: RefCell::new(Vec::new()),
        }),
        top.props_snapshot(),
    );
    window
}

/// Computed window properties (`window`, `top`, `location`).
pub(super) fn window_computed(
    obj: &ObjRef,
    key: &str,
) -> Result<Option<Value>, VmError> {
    let state = match &obj.kind {
        Kind::Window(state) => state,
        _ => return Ok(None),
    };
    Ok(match key {
        "window" => Some(Value::Object(Rc::clone(obj))),
        "top" => Some(
            state
                .top
                .borrow()
                .upgrade()
                .map(Value::Object)
                .unwrap_or(Value::Undefined),
        ),
        "location" => match obj.get_raw("document") {
            Some(Value::Object(doc)) => Some(get_prop(&doc, "location")?),
            _ => Some(Value::Undefined),
        },
        _ => None,
    })
}

pub(super) fn window_method(
    obj: &ObjRef,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    match name {
        "btoa" => {
            let s = args.first().and_then(str_arg).ok_or_else(|| {
                VmError::Type("btoa() expects a string".to_string())
            })?;
            Ok(Value::Str(STANDARD.encode(s.as_bytes())))
        }
        "setTimeout" => {
            // No scheduling: the callback runs right now.
            let f = callable(args.first())?;
            call_function(&f, &[])?;
            Ok(Value::Undefined)
        }
        "setInterval" => {
            let f = callable(args.first())?;
            let mut call_args = vec![Value::Null];
            call_args.extend(args.iter().skip(2).cloned());
            call_function(&f, &call_args)?;
            Ok(Value::Undefined)
        }
        "clearInterval" => Ok(Value::Undefined),
        "parseInt" => {
            let s = args.first().and_then(str_arg).ok_or_else(|| {
                VmError::Type("parseInt() expects a string".to_string())
            })?;
            let base = args
                .get(1)
                .ok_or_else(|| VmError::Type("parseInt() expects a radix".to_string()))?
                .as_number()? as u32;
            // An empty digit run or a bad radix is fatal, not catchable:
            // payload catch frames never see it.
            let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() || !(2..=36).contains(&base) {
                return Err(VmError::Invariant(format!(
                    "invalid literal for parseInt: '{}'",
                    s
                )));
            }
            i64::from_str_radix(&digits, base)
                .map(Value::Int)
                .map_err(|_| {
                    VmError::Invariant(format!("invalid literal for parseInt: '{}'", s))
                })
        }
        "encodeURIComponent" => {
            let s = args.first().and_then(str_arg).ok_or_else(|| {
                VmError::Type("encodeURIComponent() expects a string".to_string())
            })?;
            Ok(Value::Object(boxed_str(
                &utf8_percent_encode(&s, QUOTE_SET).to_string(),
            )))
        }
        "getComputedStyle" => {
            let style = Object::new(Kind::ComputedStyle);
            style.set_raw("ele", args.first().cloned().unwrap_or(Value::Undefined));
            Ok(Value::Object(style))
        }
        "matchMedia" => {
            let query = args.first().map(|v| v.to_display()).unwrap_or_default();
            let list = Object::new(Kind::Object);
            list.set_raw("matches", Value::Bool(query.contains("no-preference")));
            Ok(Value::Object(list))
        }
        "addEventListener" => {
            if let Kind::Window(state) = &obj.kind {
                let event = args.first().map(|v| v.to_display()).unwrap_or_default();
                let listener = args.get(1).cloned().unwrap_or(Value::Undefined);
                state.events.borrow_mut().push((event, listener));
            }
            Ok(Value::Undefined)
        }
        _ => Err(VmError::Type(format!(
            "window.{} is not a function",
            name
        ))),
    }
}

pub(super) fn document_method(
    obj: &ObjRef,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    match name {
        "createElement" => {
            let tag = args
                .first()
                .map(|v| v.to_display())
                .unwrap_or_default()
                .to_lowercase();
            Ok(Value::Object(element::create_element(&tag, obj)))
        }
        "getElementById" => {
            let id = args.first().map(|v| v.to_display()).unwrap_or_default();
            match obj.get_raw("documentElement") {
                Some(Value::Object(root)) => Ok(element::find_by_id(&root, &id)
                    .map(Value::Object)
                    .unwrap_or(Value::Undefined)),
                _ => Ok(Value::Undefined),
            }
        }
        "addEventListener" => {
            let state = match &obj.kind {
                Kind::Document(state) => state,
                _ => return Ok(Value::Undefined),
            };
            let event = args.first().map(|v| v.to_display()).unwrap_or_default();
            let listener = args.get(1).cloned().unwrap_or(Value::Undefined);
            state
                .events
                .borrow_mut()
                .push((event.clone(), listener.clone()));

            // The injected mouse track replays synchronously, once, to each
            // newly-registered mousemove listener.
            if event == "mousemove" {
                let track = state.track.borrow().clone();
                if !track.is_empty() {
                    let f = callable(Some(&listener))?;
                    for (x, y) in track {
                        let ev = Object::with_props(
                            Kind::Object,
                            vec![
                                (
                                    "type".to_string(),
                                    Value::Str("mouseevent".to_string()),
                                ),
                                ("pageX".to_string(), Value::Float(x)),
                                ("pageY".to_string(), Value::Float(y)),
                            ],
                        );
                        call_function(&f, &[Value::Null, Value::Object(ev)])?;
                    }
                }
            }
            Ok(Value::Undefined)
        }
        _ => Err(VmError::Type(format!(
            "document.{} is not a function",
            name
        ))),
    }
}

pub(super) fn navigator_method(name: &str, _args: &[Value]) -> Result<Value, VmError> {
    match name {
        "requestMIDIAccess" => Ok(promise_resolved(Value::Object(Object::new(
            Kind::Object,
        )))),
        _ => Err(VmError::Type(format!(
            "navigator.{} is not a function",
            name
        ))),
    }
}

pub(super) fn storage_method(
    obj: &ObjRef,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    let key = args.first().map(|v| v.to_display()).unwrap_or_default();
    match name {
        "getItem" => Ok(obj.get_raw(&key).unwrap_or(Value::Undefined)),
        "setItem" => {
            let v = args.get(1).map(|v| v.to_display()).unwrap_or_default();
            obj.set_raw(&key, Value::Str(v));
            Ok(Value::Undefined)
        }
        _ => Err(VmError::Type(format!(
            "storage.{} is not a function",
            name
        ))),
    }
}

pub(super) fn console_method(name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        "log" => {
            let line: Vec<String> = args.iter().map(|v| v.to_display()).collect();
            println!("{}", line.join(" "));
            Ok(Value::Undefined)
        }
        _ => Err(VmError::Type(format!(
            "console.{} is not a function",
            name
        ))),
    }
}

fn candidate_line(ip: &str) -> String {
    format!(
        "a=candidate:735671172 1 udp 2113937151 {} 60444 typ host generation 0 network-cost 999",
        ip
    )
}

pub(super) fn rtc_method(
    obj: &ObjRef,
    state: &RtcState,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    match name {
        "createDataChannel" => {
            let channel = Object::with_props(
                Kind::Object,
                vec![
                    (
                        "label".to_string(),
                        args.first().cloned().unwrap_or(Value::Undefined),
                    ),
                    (
                        "options".to_string(),
                        args.get(1)
                            .cloned()
                            .unwrap_or_else(|| Value::Object(Object::new(Kind::Object))),
                    ),
                ],
            );
            Ok(Value::Object(channel))
        }
        "createOffer" => {
            let offer = Object::new(Kind::Object);
            offer.set_raw("sdp", Value::Str(candidate_line(&state.ip)));
            Ok(promise_resolved(Value::Object(offer)))
        }
        "setLocalDescription" => {
            obj.set_raw(
                "localDescription",
                args.first().cloned().unwrap_or(Value::Undefined),
            );
            Ok(Value::Undefined)
        }
        _ => Err(VmError::Type(format!(
            "RTCPeerConnection.{} is not a function",
            name
        ))),
    }
}

/// Installing an `onicecandidate` listener fires the candidate event
/// immediately with the configured address.
pub(super) fn fire_ice_candidate(state: &RtcState, listener: &Value) -> Result<(), VmError> {
    let f = callable(Some(listener))?;
    let candidate = Object::new(Kind::Object);
    candidate.set_raw("candidate", Value::Str(candidate_line(&state.ip)));
    let event = Object::new(Kind::Object);
    event.set_raw("candidate", Value::Object(candidate));
    call_function(&f, &[Value::Null, Value::Object(event)])?;
    Ok(())
}

fn callable(v: Option<&Value>) -> Result<ObjRef, VmError> {
    match v {
        Some(Value::Object(o)) if o.is_callable() => Ok(Rc::clone(o)),
        Some(other) => Err(VmError::Type(format!(
            "{} is not a function",
            other.type_name()
        ))),
        None => Err(VmError::Type("expected a function".to_string())),
    }
}

/// Date-static forwarder bound on the window at parse time: receives
/// `(attr, args_list)` and forwards to the static `Date` surface.
pub fn date_thunk() -> ObjRef {
    Object::new(Kind::NativeThunk(Rc::new(|args: &[Value]| {
        let attr = args.first().and_then(str_arg).ok_or_else(|| {
            VmError::Type("Date forwarder expects an attribute name".to_string())
        })?;
        let rest: Vec<Value> = match args.get(1) {
            Some(Value::List(l)) => l.borrow().clone(),
            Some(Value::Object(o)) if matches!(o.kind, Kind::Array) => {
                super::array_elements(o)
            }
            _ => Vec::new(),
        };
        builtins::date_static(&attr, &rest)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{get_prop, has_prop, set_prop};

    #[test]
    fn window_profile_is_probeable() {
        let win = build_window();
        let nav = get_prop(&win, "navigator").unwrap();
        let nav = nav.as_object().unwrap().clone();
        let ua = get_prop(&nav, "userAgent").unwrap();
        assert!(matches!(ua, Value::Str(ref s) if s.contains("Chrome")));
        assert!(has_prop(&win, "RTCPeerConnection").unwrap());
        assert!(!has_prop(&win, "definitelyNotAThing").unwrap());
    }

    #[test]
    fn window_self_references_resolve() {
        let win = build_window();
        let same = get_prop(&win, "window").unwrap();
        assert!(Rc::ptr_eq(same.as_object().unwrap(), &win));
        let top = get_prop(&win, "top").unwrap();
        assert!(Rc::ptr_eq(top.as_object().unwrap(), &win));
        let loc = get_prop(&win, "location").unwrap();
        let href = get_prop(loc.as_object().unwrap(), "href").unwrap();
        assert!(matches!(href, Value::Str(ref s) if s.starts_with("https://")));
    }

    #[test]
    fn storage_round_trip_stringifies() {
        let win = build_window();
        let store = get_prop(&win, "sessionStorage").unwrap();
        let store = store.as_object().unwrap().clone();
        storage_method(&store, "setItem", &[Value::Str("k".into()), Value::Int(7)]).unwrap();
        let got = storage_method(&store, "getItem", &[Value::Str("k".into())]).unwrap();
        assert!(matches!(got, Value::Str(ref s) if s == "7"));
    }

    #[test]
    fn parse_int_failures_escape_catch_frames() {
        let win = build_window();
        let ok = window_method(
            &win,
            "parseInt",
            &[Value::Str("12px".into()), Value::Int(10)],
        )
        .unwrap();
        assert!(matches!(ok, Value::Int(12)));

        let err = window_method(
            &win,
            "parseInt",
            &[Value::Str("px".into()), Value::Int(10)],
        )
        .unwrap_err();
        assert!(!err.is_catchable());
    }

    #[test]
    fn ice_candidate_fires_on_listener_install() {
        let win = build_window();
        let rtc_ctor = get_prop(&win, "RTCPeerConnection").unwrap();
        let rtc_ctor = rtc_ctor.as_object().unwrap().clone();
        rtc_ctor.set_raw("_ip", Value::Str("203.0.113.9".to_string()));

        let peer = builtins::construct(
            &rtc_ctor,
            Builtin::RtcPeerConnection,
            &[Value::Object(Object::new(Kind::Object))],
        )
        .unwrap();
        let peer = peer.as_object().unwrap().clone();

        // A native capture records the event it was called with.
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let seen = Rc::clone(&seen);
            Object::new(Kind::NativeThunk(Rc::new(move |args: &[Value]| {
                seen.borrow_mut().push(args.get(1).cloned().unwrap_or(Value::Undefined));
                Ok(Value::Undefined)
            })))
        };
        set_prop(&peer, "onicecandidate", Value::Object(sink)).unwrap();

        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        let ev = events[0].as_object().unwrap();
        let cand = get_prop(ev, "candidate").unwrap();
        let line = get_prop(cand.as_object().unwrap(), "candidate").unwrap();
        assert!(matches!(line, Value::Str(ref s) if s.contains("203.0.113.9")));
    }

    #[test]
    fn mousemove_listeners_replay_the_track_in_order() {
        let win = build_window();
        add_mouse_track(&win, &[(50.0, 42.0), (50.0, 55.0)]);
        let doc = get_prop(&win, "document").unwrap();
        let doc = doc.as_object().unwrap().clone();

        let ys: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let ys = Rc::clone(&ys);
            Object::new(Kind::NativeThunk(Rc::new(move |args: &[Value]| {
                if let Some(Value::Object(ev)) = args.get(1) {
                    if let Some(Value::Float(y)) = ev.get_raw("pageY") {
                        ys.borrow_mut().push(y);
                    }
                }
                Ok(Value::Undefined)
            })))
        };
        document_method(
            &doc,
            "addEventListener",
            &[
                Value::Str("mousemove".into()),
                Value::Object(sink),
            ],
        )
        .unwrap();
        assert_eq!(*ys.borrow(), vec![42.0, 55.0]);
    }
}
