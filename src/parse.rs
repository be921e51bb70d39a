//! # Payload Parser
//!
//! Turns raw payload script text into a runnable [`ChaosStack`]. The
//! payload's real program never appears as statements; everything of value
//! hides in three places:
//!
//! 1. The first three non-empty top-level statements bind properties on
//!    the window. Their *property names* change per delivery and are read
//!    from the AST, never hardcoded: the first receives the host `Date`
//!    constructor, the second a forwarder for static `Date` calls, and the
//!    third the raw text of its own right-hand string literal.
//! 2. `var __TENCENT_CHAOS_STACK = (function(){ ... })(...)` wraps the
//!    program. The IIFE's `return` carries a sequence expression whose
//!    first call holds the entry PC and the compressed opcode stream
//!    (base64 blob + insertion vector, see [`crate::opcode`]).
//! 3. `function __TENCENT_CHAOS_VM(...)` inside the IIFE is the
//!    dispatcher. Its parameter names preseed the syntax-hash context and
//!    its dispatch-table array is fingerprinted entry by entry to recover
//!    the local→canonical opcode map.
//!
//! Identifier canonicalization is revision-dependent, so the map is built
//! with the strict rule first and retried loose if any handler fails to
//! resolve (see [`crate::stxhash`]). A handler unrecognized under both
//! rules means a new payload revision and fails the parse loudly.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    ArrayExpression, AssignmentTarget, BindingPatternKind, Expression, Statement,
};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;
use tracing::{debug, info};

use crate::error::VmError;
use crate::host::{self, window};
use crate::opcode::{decode_opcodes, op_for_fingerprint, ChaosStack, OpMap};
use crate::stxhash::{fingerprint, HashContext};
use crate::value::{ObjRef, Value};

/// Parse a payload and return its stack object, binding the payload's
/// expected globals on `window` along the way.
pub fn parse_vm(source: &str, win: &ObjRef) -> Result<ChaosStack, VmError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs())
        .with_options(ParseOptions {
            preserve_parens: false,
            ..ParseOptions::default()
        })
        .parse();
    if ret.panicked {
        return Err(VmError::Parse(
            "payload is not parseable JavaScript".to_string(),
        ));
    }
    if !ret.errors.is_empty() {
        debug!(count = ret.errors.len(), "parser recovered from syntax errors");
    }
    let program = ret.program;

    let bodies: Vec<&Statement> = program
        .body
        .iter()
        .filter(|s| !matches!(s, Statement::EmptyStatement(_)))
        .collect();
    if bodies.len() < 3 {
        return Err(VmError::Parse(
            "payload is missing its global bindings".to_string(),
        ));
    }

    // --- Global bindings -----------------------------------------------

    let (date_name, _) = assigned_prop(bodies[0]).ok_or_else(|| {
        VmError::Parse("first statement is not a window property binding".to_string())
    })?;
    let date_ctor = win.get_raw("Date").unwrap_or(Value::Undefined);
    host::set_prop(win, date_name, date_ctor)?;

    let (thunk_name, _) = assigned_prop(bodies[1]).ok_or_else(|| {
        VmError::Parse("second statement is not a window property binding".to_string())
    })?;
    host::set_prop(win, thunk_name, Value::Object(window::date_thunk()))?;

    let (raw_name, raw) = assigned_prop(bodies[2]).ok_or_else(|| {
        VmError::Parse("third statement is not a window property binding".to_string())
    })?;
    let raw = raw.ok_or_else(|| {
        VmError::Parse("third binding's value is not a string literal".to_string())
    })?;
    host::set_prop(win, raw_name, Value::Str(raw))?;

    // --- Stack declaration ---------------------------------------------

    let iife_body = bodies
        .iter()
        .find_map(|stmt| stack_iife_body(stmt))
        .ok_or_else(|| {
            VmError::Parse("__TENCENT_CHAOS_STACK declaration not found".to_string())
        })?;

    let entry = iife_body
        .iter()
        .find_map(entry_call)
        .ok_or_else(|| VmError::Parse("VM entry call not found".to_string()))?;

    let pc = match entry.arguments.first().and_then(|a| a.as_expression()) {
        Some(Expression::NumericLiteral(n)) => n.value as usize,
        _ => {
            return Err(VmError::Parse(
                "entry pc is not an integer literal".to_string(),
            ))
        }
    };

    let core_call = match entry.arguments.get(1).and_then(|a| a.as_expression()) {
        Some(Expression::CallExpression(c)) => c,
        _ => {
            return Err(VmError::Parse(
                "opcode decoder call not found in entry".to_string(),
            ))
        }
    };
    let packed = match core_call.arguments.first().and_then(|a| a.as_expression()) {
        Some(Expression::ArrayExpression(arr)) => arr,
        _ => {
            return Err(VmError::Parse(
                "opcode decoder argument is not an array".to_string(),
            ))
        }
    };
    let b64 = match packed.elements.first().and_then(|e| e.as_expression()) {
        Some(Expression::StringLiteral(s)) => s.value.as_str(),
        _ => {
            return Err(VmError::Parse(
                "opcode stream blob is not a string literal".to_string(),
            ))
        }
    };
    let mut insertions = Vec::new();
    match packed.elements.get(1).and_then(|e| e.as_expression()) {
        Some(Expression::ArrayExpression(arr)) => {
            for el in &arr.elements {
                match el.as_expression() {
                    Some(Expression::NumericLiteral(n)) => insertions.push(n.value as i64),
                    _ => {
                        return Err(VmError::Parse(
                            "opcode insertion vector must be numeric literals".to_string(),
                        ))
                    }
                }
            }
        }
        _ => {
            return Err(VmError::Parse(
                "opcode insertion vector not found".to_string(),
            ))
        }
    }
    let opcodes = decode_opcodes(b64, &insertions)?;

    // --- Dispatcher fingerprinting -------------------------------------

    let vm_fn = iife_body
        .iter()
        .find_map(|stmt| match stmt {
            Statement::FunctionDeclaration(f)
                if f.id.as_ref().map_or(false, |id| id.name == "__TENCENT_CHAOS_VM") =>
            {
                Some(f)
            }
            _ => None,
        })
        .ok_or_else(|| {
            VmError::Parse("__TENCENT_CHAOS_VM dispatcher not found".to_string())
        })?;

    let params: Vec<String> = vm_fn
        .params
        .items
        .iter()
        .filter_map(|p| match &p.pattern.kind {
            BindingPatternKind::BindingIdentifier(b) => Some(b.name.to_string()),
            _ => None,
        })
        .collect();

    let vm_body = vm_fn
        .body
        .as_ref()
        .ok_or_else(|| VmError::Parse("dispatcher has no body".to_string()))?;
    let table = vm_body
        .statements
        .iter()
        .find_map(|stmt| match stmt {
            Statement::VariableDeclaration(vd) => {
                vd.declarations.first().and_then(|dec| match &dec.init {
                    Some(Expression::ArrayExpression(arr)) => Some(arr),
                    _ => None,
                })
            }
            _ => None,
        })
        .ok_or_else(|| VmError::Parse("opcode dispatch table not found".to_string()))?;

    let (opmap, missing) = resolve_table(table, &params, true);
    let opmap = if missing.is_empty() {
        opmap
    } else {
        debug!(
            unresolved = missing.len(),
            "strict identifier rule left handlers unresolved, retrying loose"
        );
        let (loose, still_missing) = resolve_table(table, &params, false);
        if !still_missing.is_empty() {
            return Err(VmError::Parse(format!(
                "unrecognized opcode handlers at table slots {:?}",
                still_missing
            )));
        }
        loose
    };

    info!(
        ops = opmap.len(),
        pc,
        stream = opcodes.len(),
        "payload parsed"
    );
    Ok(ChaosStack::new(opmap, opcodes, pc))
}

/// Fingerprint every handler in the dispatch table under one identifier
/// rule; returns the partial map and the table slots that failed.
fn resolve_table(
    table: &ArrayExpression,
    params: &[String],
    strict: bool,
) -> (OpMap, Vec<usize>) {
    let mut map = OpMap::new();
    let mut missing = Vec::new();
    for (i, el) in table.elements.iter().enumerate() {
        let func = match el.as_expression() {
            Some(Expression::FunctionExpression(f)) => f,
            _ => continue,
        };
        let stmts = match &func.body {
            Some(body) => &body.statements,
            None => continue,
        };
        let mut ctx = HashContext::new(params, strict);
        let digest = fingerprint(stmts, &mut ctx);
        match op_for_fingerprint(&digest) {
            Some(op) => {
                map.insert(i as i64, op);
            }
            None => missing.push(i),
        }
    }
    (map, missing)
}

/// `window.<name> = <rhs>` at statement level: the property name plus the
/// right-hand side's raw source text when it is a string literal.
fn assigned_prop<'a>(stmt: &'a Statement) -> Option<(&'a str, Option<String>)> {
    let es = match stmt {
        Statement::ExpressionStatement(es) => es,
        _ => return None,
    };
    let assign = match &es.expression {
        Expression::AssignmentExpression(a) => a,
        _ => return None,
    };
    let name = match &assign.left {
        AssignmentTarget::StaticMemberExpression(m) => m.property.name.as_str(),
        AssignmentTarget::ComputedMemberExpression(m) => match &m.expression {
            Expression::StringLiteral(s) => s.value.as_str(),
            _ => return None,
        },
        _ => return None,
    };
    let raw = match &assign.right {
        Expression::StringLiteral(s) => Some(
            s.raw
                .as_ref()
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| format!("'{}'", s.value)),
        ),
        _ => None,
    };
    Some((name, raw))
}

/// The IIFE body of `var __TENCENT_CHAOS_STACK = (function(){...})(...)`.
fn stack_iife_body<'a>(stmt: &'a Statement<'a>) -> Option<&'a [Statement<'a>]> {
    let vd = match stmt {
        Statement::VariableDeclaration(vd) => vd,
        _ => return None,
    };
    let dec = vd.declarations.first()?;
    match &dec.id.kind {
        BindingPatternKind::BindingIdentifier(id) if id.name == "__TENCENT_CHAOS_STACK" => {}
        _ => return None,
    }
    let call = match &dec.init {
        Some(Expression::CallExpression(c)) => c,
        _ => return None,
    };
    match &call.callee {
        Expression::FunctionExpression(f) => f.body.as_ref().map(|b| &**b.statements),
        _ => None,
    }
}

/// The first call expression inside the return statement's sequence — the
/// VM entry carrying `(pc, core(...), ...)`.
fn entry_call<'a>(stmt: &'a Statement<'a>) -> Option<&'a oxc_ast::ast::CallExpression<'a>> {
    let ret = match stmt {
        Statement::ReturnStatement(r) => r,
        _ => return None,
    };
    let seq = match ret.argument.as_ref()? {
        Expression::SequenceExpression(seq) => seq,
        _ => return None,
    };
    seq.expressions.iter().find_map(|e| match e {
        Expression::CallExpression(c) => Some(&**c),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::get_prop;

    const PAYLOAD: &str = r#"
;;
window.bindA = Date;
window.bindB = function () {};
window.bindC = "raw-val";
var __TENCENT_CHAOS_STACK = (function () {
    function core(x) { return x; }
    function __TENCENT_CHAOS_VM(G, H, W, S) {
        var tbl = [];
    }
    return (0, __TENCENT_CHAOS_VM(5, core(["BQYH", [1, 999]]), 0));
})();
"#;

    #[test]
    fn extracts_bindings_stream_and_entry_pc() {
        let win = window::build_window();
        let stack = parse_vm(PAYLOAD, &win).unwrap();

        assert_eq!(stack.pc_start, 5);
        // "BQYH" is bytes [5, 6, 7]; the insertion splices 999 at index 1.
        assert_eq!(*stack.opcode, vec![5, 999, 6, 7]);
        assert!(stack.opmap.is_empty());

        // First binding aliases the Date constructor.
        let bound = get_prop(&win, "bindA").unwrap();
        let date = get_prop(&win, "Date").unwrap();
        assert!(std::rc::Rc::ptr_eq(
            bound.as_object().unwrap(),
            date.as_object().unwrap()
        ));

        // Second binding is a callable forwarder.
        let thunk = get_prop(&win, "bindB").unwrap();
        assert!(thunk.as_object().unwrap().is_callable());

        // Third binding keeps the raw quoted text.
        let raw = get_prop(&win, "bindC").unwrap();
        assert!(matches!(raw, Value::Str(ref s) if s == "\"raw-val\""));
    }

    #[test]
    fn rejects_payloads_without_the_stack_declaration() {
        let win = window::build_window();
        let err = parse_vm("window.a = 1; window.b = 2; window.c = 'x';", &win).unwrap_err();
        assert!(matches!(err, VmError::Parse(_)));
    }
}
