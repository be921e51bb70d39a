//! # Syntax Shape Hashing
//!
//! The payload renames every local identifier on each delivery, but the
//! *shape* of each opcode handler — tree structure, operators, literal
//! constants — is stable. This module canonicalizes an AST subtree into a
//! short string whose MD5 identifies the handler regardless of renaming.
//!
//! ## Canonicalization rules
//! - Literals render through a deterministic repr (`null` stays `null`,
//!   integers print in decimal, strings print quoted); see `repr_*` below.
//!   The exact repr matters: the fingerprint table was computed against it.
//! - Single-letter identifiers are replaced by their position in a growing
//!   context table preseeded with the dispatcher's four parameter names
//!   (mapped to `p`, `P`, `window`, `S` in order); later first-seen names
//!   mint `t0`, `t1`, .... Longer names pass through unchanged.
//! - Two identifier rules exist across payload revisions: **strict**
//!   replaces only uppercase single letters, **loose** replaces any single
//!   letter. Callers try strict first and fall back (see
//!   [`crate::parse`]).
//! - `UpdateExpression` canonicalizes to `^` when prefix and to the bare
//!   operator otherwise. This reproduces a precedence quirk in the
//!   reference extractor; the published MD5s depend on it.
//! - Logical `&&`/`||` are a distinct node type from binary operators and
//!   fall through to the empty string, as does any other unlisted node.
//!   The parser must run with parenthesis preservation disabled so no
//!   `ParenthesizedExpression` nodes appear.
//! - Statement lists join with `;`, argument/element/declarator lists with
//!   `,`.

use std::collections::HashMap;

use md5::{Digest, Md5};
use oxc_ast::ast::{
    Argument, ArrayExpressionElement, AssignmentTarget, BindingPatternKind, Expression, Statement,
    VariableDeclarator,
};

/// Preseed values for the dispatcher's four parameters, in order:
/// program-counter-like, arg-array-like, window, stack.
const PRESEED: [&str; 4] = ["p", "P", "window", "S"];

/// Identifier-replacement context for one handler body.
///
/// A fresh context is used per handler so `t`-numbering restarts.
pub struct HashContext {
    map: HashMap<String, String>,
    counter: usize,
    strict: bool,
}

impl HashContext {
    /// Build a context preseeded from the dispatcher's parameter names.
    /// `strict` selects the uppercase-only identifier rule.
    pub fn new(params: &[String], strict: bool) -> Self {
        let map = params
            .iter()
            .zip(PRESEED.iter())
            .map(|(name, canon)| (name.clone(), canon.to_string()))
            .collect();
        HashContext {
            map,
            counter: 0,
            strict,
        }
    }

    fn ident(&mut self, name: &str) -> String {
        let mut chars = name.chars();
        let first = chars.next();
        let single = first.is_some() && chars.next().is_none();
        let eligible = match first {
            Some(c) if single => !self.strict || c.is_uppercase(),
            _ => false,
        };
        if !eligible {
            return name.to_string();
        }
        if let Some(known) = self.map.get(name) {
            return known.clone();
        }
        let minted = format!("t{}", self.counter);
        self.counter += 1;
        self.map.insert(name.to_string(), minted.clone());
        minted
    }
}

/// Canonicalize a statement list (joined with `;`).
pub fn hash_statements(stmts: &[Statement], ctx: &mut HashContext) -> String {
    let parts: Vec<String> = stmts.iter().map(|s| hash_stmt(s, ctx)).collect();
    parts.join(";")
}

/// MD5 hex digest of a statement list's canonical form.
pub fn fingerprint(stmts: &[Statement], ctx: &mut HashContext) -> String {
    md5_hex(&hash_statements(stmts, ctx))
}

/// Lowercase MD5 hex of a string.
pub fn md5_hex(s: &str) -> String {
    hex::encode(Md5::digest(s.as_bytes()))
}

fn hash_stmt(stmt: &Statement, ctx: &mut HashContext) -> String {
    match stmt {
        Statement::ExpressionStatement(s) => hash_expr(&s.expression, ctx),
        Statement::VariableDeclaration(d) => {
            let decls: Vec<String> = d
                .declarations
                .iter()
                .map(|dec| hash_declarator(dec, ctx))
                .collect();
            format!("{} {}", d.kind.as_str(), decls.join(","))
        }
        Statement::ReturnStatement(r) => {
            let arg = r
                .argument
                .as_ref()
                .map(|e| hash_expr(e, ctx))
                .unwrap_or_default();
            format!("return {}", arg)
        }
        Statement::ThrowStatement(t) => {
            format!("throw {}", hash_expr(&t.argument, ctx))
        }
        Statement::ForStatement(_) => "for".to_string(),
        Statement::ForInStatement(_) => "for in".to_string(),
        _ => String::new(),
    }
}

fn hash_declarator(dec: &VariableDeclarator, ctx: &mut HashContext) -> String {
    let id = match &dec.id.kind {
        BindingPatternKind::BindingIdentifier(b) => ctx.ident(b.name.as_str()),
        _ => String::new(),
    };
    match &dec.init {
        Some(init) => format!("{}={}", id, hash_expr(init, ctx)),
        None => id,
    }
}

fn hash_expr(expr: &Expression, ctx: &mut HashContext) -> String {
    match expr {
        Expression::NullLiteral(_) => "null".to_string(),
        Expression::NumericLiteral(n) => {
            repr_numeric(n.raw.as_ref().map(|a| a.as_str()), n.value)
        }
        Expression::StringLiteral(s) => repr_str(s.value.as_str()),
        // The reference extractor could not canonicalize boolean literals;
        // payload handlers spell booleans as !0/!1, so this arm is inert and
        // only keeps the walk total.
        Expression::BooleanLiteral(b) => if b.value { "true" } else { "false" }.to_string(),
        Expression::Identifier(id) => ctx.ident(id.name.as_str()),
        Expression::AssignmentExpression(a) => {
            format!(
                "{}{}{}",
                hash_assignment_target(&a.left, ctx),
                a.operator.as_str(),
                hash_expr(&a.right, ctx)
            )
        }
        Expression::BinaryExpression(b) => {
            format!(
                "{}{}{}",
                hash_expr(&b.left, ctx),
                b.operator.as_str(),
                hash_expr(&b.right, ctx)
            )
        }
        Expression::UnaryExpression(u) => {
            format!("{}{}", u.operator.as_str(), hash_expr(&u.argument, ctx))
        }
        Expression::UpdateExpression(u) => {
            if u.prefix {
                "^".to_string()
            } else {
                u.operator.as_str().to_string()
            }
        }
        Expression::ArrayExpression(a) => {
            let parts: Vec<String> = a
                .elements
                .iter()
                .map(|el| hash_array_element(el, ctx))
                .collect();
            format!("[{}]", parts.join(","))
        }
        Expression::CallExpression(c) => {
            let args: Vec<String> = c
                .arguments
                .iter()
                .map(|arg| hash_argument(arg, ctx))
                .collect();
            format!("{}({})", hash_expr(&c.callee, ctx), args.join(","))
        }
        Expression::StaticMemberExpression(m) => {
            format!(
                "{}[{}]",
                hash_expr(&m.object, ctx),
                ctx.ident(m.property.name.as_str())
            )
        }
        Expression::ComputedMemberExpression(m) => {
            format!(
                "{}[{}]",
                hash_expr(&m.object, ctx),
                hash_expr(&m.expression, ctx)
            )
        }
        Expression::SequenceExpression(s) => {
            let parts: Vec<String> =
                s.expressions.iter().map(|e| hash_expr(e, ctx)).collect();
            parts.join(",")
        }
        Expression::ConditionalExpression(c) => {
            format!(
                "{}?({}):({})",
                hash_expr(&c.test, ctx),
                hash_expr(&c.consequent, ctx),
                hash_expr(&c.alternate, ctx)
            )
        }
        _ => String::new(),
    }
}

fn hash_assignment_target(target: &AssignmentTarget, ctx: &mut HashContext) -> String {
    match target {
        AssignmentTarget::AssignmentTargetIdentifier(id) => ctx.ident(id.name.as_str()),
        AssignmentTarget::StaticMemberExpression(m) => {
            format!(
                "{}[{}]",
                hash_expr(&m.object, ctx),
                ctx.ident(m.property.name.as_str())
            )
        }
        AssignmentTarget::ComputedMemberExpression(m) => {
            format!(
                "{}[{}]",
                hash_expr(&m.object, ctx),
                hash_expr(&m.expression, ctx)
            )
        }
        _ => String::new(),
    }
}

fn hash_array_element(el: &ArrayExpressionElement, ctx: &mut HashContext) -> String {
    match el.as_expression() {
        Some(e) => hash_expr(e, ctx),
        None => String::new(),
    }
}

fn hash_argument(arg: &Argument, ctx: &mut HashContext) -> String {
    match arg.as_expression() {
        Some(e) => hash_expr(e, ctx),
        None => String::new(),
    }
}

/// Repr a numeric literal: integer raw forms (decimal, hex, octal, binary)
/// print as decimal integers; everything else goes through the float repr.
fn repr_numeric(raw: Option<&str>, value: f64) -> String {
    if let Some(raw) = raw {
        let t = raw.trim();
        let lower = t.to_ascii_lowercase();
        let radix = if let Some(rest) = lower.strip_prefix("0x") {
            Some((rest.to_string(), 16))
        } else if let Some(rest) = lower.strip_prefix("0o") {
            Some((rest.to_string(), 8))
        } else if let Some(rest) = lower.strip_prefix("0b") {
            Some((rest.to_string(), 2))
        } else {
            None
        };
        if let Some((digits, radix)) = radix {
            if let Ok(i) = i128::from_str_radix(&digits, radix) {
                return i.to_string();
            }
        }
        if !lower.contains('.') && !lower.contains('e') {
            if let Ok(i) = t.parse::<i128>() {
                return i.to_string();
            }
        }
    }
    repr_float(value)
}

/// Repr a float the way the reference extractor's language does: integral
/// values keep a trailing `.0`, very large/small magnitudes switch to
/// `e`-notation with a signed two-digit exponent.
fn repr_float(f: f64) -> String {
    if !f.is_finite() {
        return if f.is_nan() {
            "nan".to_string()
        } else if f > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }
    let abs = f.abs();
    if abs != 0.0 && (abs >= 1e16 || abs < 1e-4) {
        let s = format!("{:e}", f);
        let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    if f == f.trunc() {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Repr a string literal: single-quoted unless the text contains `'` but no
/// `"`; backslashes, quotes, and control characters are escaped.
fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || (c as u32) == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::{ParseOptions, Parser};
    use oxc_span::SourceType;

    /// Parse `src`, expecting a single function declaration, and hash its
    /// body with a context preseeded from its parameters.
    fn hash_fn_body(src: &str, strict: bool) -> String {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, src, SourceType::cjs())
            .with_options(ParseOptions {
                preserve_parens: false,
                ..ParseOptions::default()
            })
            .parse();
        assert!(ret.errors.is_empty(), "test source must parse cleanly");
        for stmt in &ret.program.body {
            if let Statement::FunctionDeclaration(f) = stmt {
                let params: Vec<String> = f
                    .params
                    .items
                    .iter()
                    .filter_map(|p| match &p.pattern.kind {
                        BindingPatternKind::BindingIdentifier(b) => {
                            Some(b.name.to_string())
                        }
                        _ => None,
                    })
                    .collect();
                let mut ctx = HashContext::new(&params, strict);
                let body = f.body.as_ref().expect("function body");
                return hash_statements(&body.statements, &mut ctx);
            }
        }
        panic!("no function declaration in test source");
    }

    #[test]
    fn params_preseed_and_locals_mint_in_order() {
        let h = hash_fn_body("function f(A, B, C, D) { var E = A + 1; return E; }", true);
        assert_eq!(h, "var t0=p+1;return t0");
    }

    #[test]
    fn strict_rule_ignores_lowercase_singles() {
        let h = hash_fn_body("function f(A, B, C, D) { var x = B; }", true);
        assert_eq!(h, "var x=P");
    }

    #[test]
    fn loose_rule_replaces_lowercase_singles() {
        let h = hash_fn_body("function f(A, B, C, D) { var x = B; }", false);
        assert_eq!(h, "var t0=P");
    }

    #[test]
    fn update_expression_quirk_is_preserved() {
        assert_eq!(
            hash_fn_body("function f(A, B, C, D) { A++; }", true),
            "++"
        );
        assert_eq!(
            hash_fn_body("function f(A, B, C, D) { ++A; }", true),
            "^"
        );
    }

    #[test]
    fn member_call_and_conditional_shapes() {
        let h = hash_fn_body(
            "function f(A, B, C, D) { return D.pop() ? (A[0]) : (B); }",
            true,
        );
        // Conditional wraps both arms in parens; member access is bracketed.
        assert_eq!(h, "return S[pop]()?(p[0]):(P)");
    }

    #[test]
    fn logical_expressions_vanish() {
        let h = hash_fn_body("function f(A, B, C, D) { return A && B; }", true);
        assert_eq!(h, "return ");
    }

    #[test]
    fn statement_joins_and_for_markers() {
        let h = hash_fn_body(
            "function f(A, B, C, D) { for (;;) {} A = 1; }",
            true,
        );
        assert_eq!(h, "for;p=1");
    }

    #[test]
    fn literal_reprs() {
        assert_eq!(repr_numeric(Some("0x10"), 16.0), "16");
        assert_eq!(repr_numeric(Some("57"), 57.0), "57");
        assert_eq!(repr_numeric(Some("1.5"), 1.5), "1.5");
        assert_eq!(repr_numeric(Some("1e3"), 1000.0), "1000.0");
        assert_eq!(repr_str("abc"), "'abc'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("var t0=p+1"), md5_hex("var t0=p+1"));
    }
}
