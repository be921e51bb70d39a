//! # DOM Elements
//!
//! Element objects at observable-behavior granularity: a tag, a string
//! attribute map, a child list, a style declaration, and the handful of
//! methods payloads actually exercise. Canvas and WebGL contexts live here
//! too — their fixed PNG data URL, extension list, and debug-renderer
//! strings are what anchor the device fingerprint.
//!
//! Property writes on elements land in the attribute map (stringified),
//! while reads fall back attribute → style, mirroring the reference shim.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::window;
use super::{new_array, Kind, Object};
use crate::error::VmError;
use crate::value::{new_list, ObjRef, Value};

/// Mutable element payload.
pub struct ElementData {
    pub tag: String,
    pub attrs: RefCell<Vec<(String, String)>>,
    pub children: RefCell<Vec<ObjRef>>,
    pub parent: RefCell<Weak<Object>>,
    pub style: ObjRef,
    pub text: RefCell<String>,
    pub doc: RefCell<Weak<Object>>,
}

const BASE_METHODS: &[&str] = &[
    "appendChild",
    "removeChild",
    "remove",
    "cloneNode",
    "insertBefore",
    "replaceChild",
    "setAttribute",
    "removeAttribute",
    "getBoundingClientRect",
];

const CANVAS_METHODS: &[&str] = &[
    "appendChild",
    "removeChild",
    "remove",
    "cloneNode",
    "insertBefore",
    "replaceChild",
    "setAttribute",
    "removeAttribute",
    "getBoundingClientRect",
    "getContext",
    "toDataURL",
];

const VIDEO_METHODS: &[&str] = &[
    "appendChild",
    "removeChild",
    "remove",
    "cloneNode",
    "insertBefore",
    "replaceChild",
    "setAttribute",
    "removeAttribute",
    "getBoundingClientRect",
    "captureStream",
];

pub(super) fn method_names(data: &ElementData) -> &'static [&'static str] {
    match data.tag.as_str() {
        "canvas" => CANVAS_METHODS,
        "video" => VIDEO_METHODS,
        _ => BASE_METHODS,
    }
}

/// Create an element of `tag` owned by `document`. Tag-specific setup:
/// video gets its preview attributes, style gets an empty stylesheet.
pub fn create_element(tag: &str, document: &ObjRef) -> ObjRef {
    let data = ElementData {
        tag: tag.to_string(),
        attrs: RefCell::new(Vec::new()),
        children: RefCell::new(Vec::new()),
        parent: RefCell::new(Weak::new()),
        style: Object::new(Kind::Object),
        text: RefCell::new(String::new()),
        doc: RefCell::new(Rc::downgrade(document)),
    };
    let element = Object::new(Kind::Element(data));
    element.set_raw("children", new_list(Vec::new()));

    match tag {
        "video" => {
            if let Kind::Element(d) = &element.kind {
                let mut attrs = d.attrs.borrow_mut();
                attrs.push(("id".to_string(), "preview".to_string()));
                attrs.push(("width".to_string(), "160".to_string()));
                attrs.push(("height".to_string(), "120".to_string()));
                attrs.push(("autoplay".to_string(), String::new()));
                attrs.push(("muted".to_string(), String::new()));
            }
        }
        "style" => {
            let sheet = Object::new(Kind::Object);
            sheet.set_raw("cssRules", Value::Object(new_array(&[])));
            element.set_raw("sheet", Value::Object(sheet));
        }
        _ => {}
    }
    element
}

/// Link `child` under `parent` (used by document construction and
/// `appendChild`).
pub fn append_child_element(parent: &ObjRef, child: &ObjRef) {
    if let (Kind::Element(p), Kind::Element(c)) = (&parent.kind, &child.kind) {
        p.children.borrow_mut().push(Rc::clone(child));
        *c.parent.borrow_mut() = Rc::downgrade(parent);
    }
}

/// Depth-first search for an element with a matching `id` attribute.
pub fn find_by_id(root: &ObjRef, id: &str) -> Option<ObjRef> {
    let data = match &root.kind {
        Kind::Element(d) => d,
        _ => return None,
    };
    if data
        .attrs
        .borrow()
        .iter()
        .any(|(k, v)| k == "id" && v == id)
    {
        return Some(Rc::clone(root));
    }
    for child in data.children.borrow().iter() {
        if let Some(found) = find_by_id(child, id) {
            return Some(found);
        }
    }
    None
}

/// Attribute → style read fallback for properties nothing else resolved.
pub(super) fn attr_or_style(data: &ElementData, key: &str) -> Option<Value> {
    if let Some((_, v)) = data.attrs.borrow().iter().find(|(k, _)| k == key) {
        return Some(Value::Str(v.clone()));
    }
    data.style.get_raw(key)
}

/// Element property writes become string attributes.
pub(super) fn set_attr(data: &ElementData, key: &str, value: &Value) {
    let text = value.to_display();
    let mut attrs = data.attrs.borrow_mut();
    if let Some(entry) = attrs.iter_mut().find(|(k, _)| k == key) {
        entry.1 = text;
    } else {
        attrs.push((key.to_string(), text));
    }
}

pub(super) fn remove_attr(data: &ElementData, key: &str) -> Option<()> {
    let mut attrs = data.attrs.borrow_mut();
    let idx = attrs.iter().position(|(k, _)| k == key)?;
    attrs.remove(idx);
    Some(())
}

/// Leading-two-digit numeric prefix of a style length (`"20px"` → 20).
fn style_int(data: &ElementData, key: &str) -> i64 {
    match data.style.get_raw(key) {
        Some(Value::Str(s)) if !s.is_empty() => {
            s.chars().take(2).collect::<String>().parse().unwrap_or(0)
        }
        Some(v) if v.truthy() => v.to_display().chars().take(2).collect::<String>().parse().unwrap_or(0),
        _ => 0,
    }
}

fn inner_html(data: &ElementData) -> String {
    let mut out = data.text.borrow().clone();
    for child in data.children.borrow().iter() {
        if let Kind::Element(cd) = &child.kind {
            out.push_str(&outer_html(cd));
        }
    }
    out
}

fn outer_html(data: &ElementData) -> String {
    let mut out = format!("<{}", data.tag);
    for (k, v) in data.attrs.borrow().iter() {
        if v.is_empty() {
            out.push_str(&format!(" {}", k));
        } else {
            out.push_str(&format!(" {}=\"{}\"", k, v));
        }
    }
    out.push('>');
    out.push_str(&inner_html(data));
    out.push_str(&format!("</{}>", data.tag));
    out
}

/// Computed element properties.
pub(super) fn element_computed(
    _obj: &ObjRef,
    data: &ElementData,
    key: &str,
) -> Result<Option<Value>, VmError> {
    Ok(match key {
        "tag" => Some(Value::Str(data.tag.clone())),
        "style" => Some(Value::Object(Rc::clone(&data.style))),
        "offsetLeft" => Some(Value::Int(style_int(data, "left"))),
        "innerHTML" => Some(Value::Str(inner_html(data))),
        "outerHTML" => Some(Value::Str(outer_html(data))),
        "contentWindow" if data.tag == "iframe" => {
            let top = data.doc.borrow().upgrade().and_then(|doc| match &doc.kind {
                Kind::Document(state) => state.window.borrow().upgrade(),
                _ => None,
            });
            Some(match top {
                Some(top) => Value::Object(window::build_iframe_window(&top)),
                None => Value::Undefined,
            })
        }
        _ => None,
    })
}

pub(super) fn element_method(
    obj: &ObjRef,
    data: &ElementData,
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    match name {
        "appendChild" => {
            match args.first() {
                Some(Value::Str(s)) => data.text.borrow_mut().push_str(s),
                Some(Value::Object(child)) if matches!(child.kind, Kind::Element(_)) => {
                    append_child_element(obj, child);
                }
                _ => {
                    return Err(VmError::Type(
                        "appendChild() expects an element or text".to_string(),
                    ))
                }
            }
            Ok(Value::Undefined)
        }
        "removeChild" => {
            let child = element_arg(args.first())?;
            let mut children = data.children.borrow_mut();
            match children.iter().position(|c| Rc::ptr_eq(c, &child)) {
                Some(idx) => {
                    children.remove(idx);
                    Ok(Value::Undefined)
                }
                None => Err(VmError::Type("node is not a child".to_string())),
            }
        }
        "remove" => {
            if let Some(parent) = data.parent.borrow().upgrade() {
                if let Kind::Element(p) = &parent.kind {
                    p.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, obj));
                }
            }
            Ok(Value::Undefined)
        }
        "cloneNode" => {
            let deep = args.first().map(|v| v.truthy()).unwrap_or(false);
            Ok(Value::Object(clone_element(obj, data, deep)))
        }
        "insertBefore" => {
            let node = element_arg(args.first())?;
            match args.get(1) {
                Some(Value::Null) | None => {
                    append_child_element(obj, &node);
                }
                Some(reference) => {
                    let reference = element_arg(Some(reference))?;
                    let mut children = data.children.borrow_mut();
                    let idx = children
                        .iter()
                        .position(|c| Rc::ptr_eq(c, &reference))
                        .ok_or_else(|| {
                            VmError::Type("reference node is not a child".to_string())
                        })?;
                    children.insert(idx, Rc::clone(&node));
                    drop(children);
                    if let Kind::Element(nd) = &node.kind {
                        *nd.parent.borrow_mut() = Rc::downgrade(obj);
                    }
                }
            }
            Ok(Value::Object(node))
        }
        "replaceChild" => {
            let new = element_arg(args.first())?;
            let old = element_arg(args.get(1))?;
            let mut children = data.children.borrow_mut();
            let idx = children
                .iter()
                .position(|c| Rc::ptr_eq(c, &old))
                .ok_or_else(|| VmError::Type("node to replace is not a child".to_string()))?;
            children[idx] = Rc::clone(&new);
            Ok(Value::Object(old))
        }
        "setAttribute" => {
            let key = args.first().map(|v| v.to_display()).unwrap_or_default();
            set_attr(data, &key, args.get(1).unwrap_or(&Value::Undefined));
            Ok(Value::Undefined)
        }
        "removeAttribute" => {
            let key = args.first().map(|v| v.to_display()).unwrap_or_default();
            remove_attr(data, &key);
            Ok(Value::Undefined)
        }
        "getBoundingClientRect" => {
            let x = style_int(data, "left");
            let y = style_int(data, "top");
            let w = style_int(data, "width");
            let h = style_int(data, "height");
            Ok(Value::Object(Object::with_props(
                Kind::Object,
                vec![
                    ("x".to_string(), Value::Int(x)),
                    ("left".to_string(), Value::Int(x)),
                    ("y".to_string(), Value::Int(y)),
                    ("top".to_string(), Value::Int(y)),
                    ("width".to_string(), Value::Int(w)),
                    ("height".to_string(), Value::Int(h)),
                    ("right".to_string(), Value::Int(x + w)),
                    ("bottom".to_string(), Value::Int(y + h)),
                ],
            )))
        }
        "getContext" if data.tag == "canvas" => {
            let kind = args.first().map(|v| v.to_display()).unwrap_or_default();
            match kind.as_str() {
                "2d" => Ok(Value::Object(Object::new(Kind::Context2d))),
                "webgl" => Ok(Value::Object(Object::new(Kind::ContextGl))),
                _ => Ok(Value::Null),
            }
        }
        "toDataURL" if data.tag == "canvas" => Ok(Value::Str(CANVAS_DATA_URL.to_string())),
        "captureStream" if data.tag == "video" => {
            Ok(Value::Object(Object::new(Kind::Object)))
        }
        _ => Err(VmError::Type(format!(
            "element.{} is not a function",
            name
        ))),
    }
}

fn clone_element(_obj: &ObjRef, data: &ElementData, deep: bool) -> ObjRef {
    let doc = data.doc.borrow().upgrade();
    let cloned = ElementData {
        tag: data.tag.clone(),
        attrs: RefCell::new(data.attrs.borrow().clone()),
        children: RefCell::new(Vec::new()),
        parent: RefCell::new(Weak::new()),
        style: Object::with_props(Kind::Object, data.style.props_snapshot()),
        text: RefCell::new(data.text.borrow().clone()),
        doc: RefCell::new(doc.as_ref().map(Rc::downgrade).unwrap_or_default()),
    };
    let clone = Object::new(Kind::Element(cloned));
    clone.set_raw("children", new_list(Vec::new()));
    if deep {
        for child in data.children.borrow().iter() {
            if let Kind::Element(cd) = &child.kind {
                let child_clone = clone_element(child, cd, true);
                append_child_element(&clone, &child_clone);
            }
        }
    }
    clone
}

fn element_arg(v: Option<&Value>) -> Result<ObjRef, VmError> {
    match v {
        Some(Value::Object(o)) if matches!(o.kind, Kind::Element(_)) => Ok(Rc::clone(o)),
        _ => Err(VmError::Type("expected an element".to_string())),
    }
}

// =====================================================
//                 Canvas / WebGL anchors
// =====================================================

const UNMASKED_VENDOR_WEBGL: i64 = 37445;
const UNMASKED_RENDERER_WEBGL: i64 = 37446;

const WEBGL_VENDOR: &str = "Google Inc. (Intel)";
const WEBGL_RENDERER: &str =
    "ANGLE (Intel, Intel(R) Iris(R) Xe Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)";

#[rustfmt::skip]
const WEBGL_EXTENSIONS: &[&str] = &[
    "ANGLE_instanced_arrays", "EXT_blend_minmax", "EXT_color_buffer_half_float",
    "EXT_disjoint_timer_query", "EXT_float_blend", "EXT_frag_depth",
    "EXT_shader_texture_lod", "EXT_texture_compression_bptc",
    "EXT_texture_compression_rgtc", "EXT_texture_filter_anisotropic", "EXT_sRGB",
    "KHR_parallel_shader_compile", "OES_element_index_uint", "OES_fbo_render_mipmap",
    "OES_standard_derivatives", "OES_texture_float", "OES_texture_float_linear",
    "OES_texture_half_float", "OES_texture_half_float_linear", "OES_vertex_array_object",
    "WEBGL_color_buffer_float", "WEBGL_compressed_texture_s3tc",
    "WEBGL_compressed_texture_s3tc_srgb", "WEBGL_debug_renderer_info",
    "WEBGL_debug_shaders", "WEBGL_depth_texture", "WEBGL_draw_buffers",
    "WEBGL_lose_context", "WEBGL_multi_draw",
];

pub(super) fn webgl_method(name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        "getSupportedExtensions" => {
            let items: Vec<Value> = WEBGL_EXTENSIONS
                .iter()
                .map(|e| Value::Str(e.to_string()))
                .collect();
            Ok(Value::Object(new_array(&items)))
        }
        "getExtension" => {
            let which = args.first().map(|v| v.to_display()).unwrap_or_default();
            if which == "WEBGL_debug_renderer_info" {
                Ok(Value::Object(Object::with_props(
                    Kind::Object,
                    vec![
                        (
                            "UNMASKED_VENDOR_WEBGL".to_string(),
                            Value::Int(UNMASKED_VENDOR_WEBGL),
                        ),
                        (
                            "UNMASKED_RENDERER_WEBGL".to_string(),
                            Value::Int(UNMASKED_RENDERER_WEBGL),
                        ),
                    ],
                )))
            } else {
                Ok(Value::Null)
            }
        }
        "getParameter" => {
            let code = args.first().map_or(Ok(0.0), |v| v.as_number())? as i64;
            Ok(match code {
                c if c == UNMASKED_VENDOR_WEBGL => Value::Str(WEBGL_VENDOR.to_string()),
                c if c == UNMASKED_RENDERER_WEBGL => Value::Str(WEBGL_RENDERER.to_string()),
                _ => Value::Null,
            })
        }
        _ => Err(VmError::Type(format!(
            "WebGLRenderingContext.{} is not a function",
            name
        ))),
    }
}

/// Fixed canvas snapshot; the PNG bytes never vary, which keeps the canvas
/// half of the fingerprint stable across runs.
const CANVAS_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAASwAAACWCAYAAABkW7XSAAAAAXNSR0IArs4c6QAACwNJREFUeF7tm1vIdescxccOpewoFNokREJOIccUKZFyjAuHnVPsdqSQc5JTFCUhIewdFyK5EVLI2Q3ChVPO3EgkXCga9Tztp9lcX997qPWOPX7r5vv2+8415xy/seZv/Z85v32FeEEAAhAIIXBFyHlymudL4H/nu7uYvfF5j6lq/0QpMLzAU54+wjolON52XAII67j8j3V0hHUs8hz3TAQQ1pnwxb4ZYcVW133iCKuzf4TV2Xt8aoQVX+GpAiCsU2HjTccmsCesD0p6yTixX0l6jqQ7SHqcpLdL+qykd0r63Dmc/KvGPt4t6U5j3w8eP3vaOR3jHE7zwu/Cnfn10p0zNeN3bZgirAtfKSe4R2ArrEMf/KcOYe1dEJdL1kJ6n6SXSfr9eNMU1oclvV/SByR953J3yHZ6mKTrJH3lgLD8+7dIer6kOy5//10pO1YU4cWvBfrDfY2kayX9XdI6af1liOT6M0xalxLWzSU9eRz7D0eYtG41pkZPkFOmx6zWrF4g6c2XeRLzC2VuPr9Y1gl2nbQuc7c3us0QVnila4Hrh3s7ac0L4luS3ijp6iGw9SJ4tSQv7bztUyRdOST0eUmvl/RxSXO5931JT5f0rIXfnSU9QdJNx8U6p4YV8SpR79fncS9JPraP988xwXmSswB/IOmPYwo5tIT1+XrJ5KXvnO7W5an34eWpz3UurdZjW/J+PXscb25712WJ5vN2Hi+r53L7Q+P3c0q6m6S5X39h7J3XoY/bayW9RtKnNpOW+/Gy/s9jujJ3M7KYG18IK7z1PWF9czNpOeKesOZ9LX+be0KZSzr/fArgZ8vPPTlZJL7/5YvLS8NVWD6Ol4ZfkOSL9xmb5aEvvlUCU7A+37nUtHDW7aZ49u65+ZwtUb8sPkvCP3uPpKvGuRyS3BSQReAlmYXpbefPLbl5Tl6KrZOrj7fyeu6Q2d6xLGPfM/zagftT8+M3+5lSXCcsC8s858v/7X02vhBWeOtrgfND/+uRydPS9oKYE5aXjZbAA3fyf1LSv8ZF6EnrEZLuIulLkm4m6TaS7jfe521/suzDx/TE4Yv335IeMETiTaYMphjmpPKNMUF8dIjhQZL+NCa4OWn9chzHcplisNgsRU9EXgbOieaVkp43hOrj+uL2ZOhtLMD1tR7b4rFgzMTCsjyc03l9TGf76dhm3YcnLb+c569j+3XSevGQ30fGknnvI3cpYa2ievjI8+3wz+1pTx9hnZbcBXnfWuCcOCyVr48LzN/UP1yeEq7CesO4wOZ9rTlpeULyheefe9L68bhgLa/bjmlkTlivGxf2vSU9agjEk45l8lhJ95T027Hc8jTmCctCnX8ao5eSlpz36aXO9yTdZGzn999a0hclvXDn6aYFZDlYMn+T9MixhPTkZVFZZpacBeRz9TH88u/9cy8DLaS3DqGajwXs8/ON7UcPQVmM95X0inGut5T0scHHovPDBk9h9xiiXUXpY3sCfJsk30vce/BxSFjzvuTPJf1X0mPGDXhuul+QC5DTOBmB7TeOpfVlSQ8Zu1nvS/n+yyosX2i3GPer1qNub9D7d542nijpPmPfv5B0d0nzPo4FZfE8fixf5oThi/iZku4/DrDew5rvfdEQwcsl+ZwsljlZ+Vy8FH3HuH/k89guvbaTlg/lC/3T45x+JOlJY7/rFDQze8qysHxsi+E/CwyLy+fuY/rBgrNYzv+QZGn5tf79u5IeOqS+Trjebi5vPzO+TFbmW2FNqVtu8z6jv0Scw8tm/lnDya4Ttr4gBPZG5DlpedkwL5rtpOVJY71nZZltv/m3/xRi7/7OfCI3f/fVIZ/3jqXgJyTdTpKlNO8JzUlr+yRse+/NF6qnmtuPScbyW5eEawV7N9ktkjlJTcl5u71Jy/ey1vtU6wMMy8/i981uv9f3tDy5eenp/XnSetPmhv/Mup205vL10Mfn0D8/WZ8Ae9nKkvCCXICcxskIHFrTT2n5SZtf20lrFZa/sfee3nlJt4pslZJF4H1biL6457Q0pxuLZX1q5otsXuTeZm/Smhel75X5/evLN5q95POkdZJ/8Lo+wZtPCy0dT1rrPi8lrHm+/nMum2d+7+M348mrJ7R5X27yPlmbNzwcWWU+H1TMSWt7E/6kx0jenntYye1JSinQk4NfJ5HNdoLaTjLh1Z3p9FkSngkfbz4WgRRhnYaPJbc+vud/9bmBIsI6zSeK9xydwI1ZWEeHe4FPAGFd4HI4tcMEEFbnpwNhdfYenxphxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BBAWD1dkxQC8QQQVnyFBIBADwGE1dM1SSEQTwBhxVdIAAj0EEBYPV2TFALxBBBWfIUEgEAPAYTV0zVJIRBPAGHFV0gACPQQQFg9XZMUAvEEEFZ8hQSAQA8BhNXTNUkhEE8AYcVXSAAI9BD4P3NjhaYp433ZAAAAAElFTkSuQmCC";
