use std::rc::Rc;

use super::*;
use crate::error::VmError;
use crate::host::{self, window::build_window};
use crate::opcode::Op;
use crate::value::{new_list, Value};

/// Local opcode for a canonical operation under the identity map.
fn code(op: Op) -> i64 {
    Op::ALL.iter().position(|o| *o == op).unwrap() as i64
}

fn identity_opmap() -> Rc<crate::opcode::OpMap> {
    Rc::new(
        Op::ALL
            .iter()
            .enumerate()
            .map(|(i, op)| (i as i64, *op))
            .collect(),
    )
}

fn run_outer(prog: Vec<i64>) -> Result<Value, VmError> {
    let win = build_window();
    Vm::outer(0, Rc::new(prog), identity_opmap(), win).run()
}

fn run_nested(prog: Vec<i64>, stack: Vec<Value>) -> Result<Value, VmError> {
    let win = build_window();
    Vm::nested(0, Rc::new(prog), identity_opmap(), win, stack).run()
}

fn list_values(v: &Value) -> Vec<Value> {
    v.as_list().unwrap().borrow().clone()
}

#[test]
fn outer_invocation_returns_the_stack_tail() {
    // Pad one slot so the sum lands at stack position 3, then leave a
    // scratch value for the final pop to discard.
    let prog = vec![
        code(Op::Inst),
        0,
        code(Op::Inst),
        7,
        code(Op::Inst),
        5,
        code(Op::Add),
        code(Op::Undefined),
        code(Op::Stop),
    ];
    let result = run_outer(prog).unwrap();
    let tail = list_values(&result);
    assert_eq!(tail.len(), 1);
    assert!(matches!(tail[0], Value::Int(12)));
}

#[test]
fn zstr_collects_following_concat_bytes() {
    let prog = vec![
        code(Op::Zstr),
        code(Op::Concat),
        0x68,
        code(Op::Concat),
        0x69,
        code(Op::Stop),
    ];
    let result = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(result, Value::Str(ref s) if s == "hi"));
}

#[test]
fn standalone_concat_appends_a_code_point() {
    let prog = vec![code(Op::Concat), 0x21, code(Op::Stop)];
    let result = run_nested(prog, vec![Value::Str("hey".to_string())]).unwrap();
    assert!(matches!(result, Value::Str(ref s) if s == "hey!"));
}

#[test]
fn null_refeq_fusion_tests_the_sentinel_only() {
    let fused = vec![code(Op::Null), code(Op::Refeq), code(Op::Stop)];

    let hit = run_nested(fused.clone(), vec![Value::Null]).unwrap();
    assert!(matches!(hit, Value::Bool(true)));

    // Host undefined is NOT the null sentinel.
    let miss = run_nested(fused.clone(), vec![Value::Undefined]).unwrap();
    assert!(matches!(miss, Value::Bool(false)));

    let miss = run_nested(fused, vec![Value::Int(5)]).unwrap();
    assert!(matches!(miss, Value::Bool(false)));
}

#[test]
fn null_without_refeq_pushes_the_sentinel() {
    let prog = vec![code(Op::Null), code(Op::Stop)];
    let result = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(result, Value::Null));
}

/// stepin 6 1; inst 7; throw; [6]: clear; getobj 1; stop
fn catch_program() -> Vec<i64> {
    vec![
        code(Op::Stepin),
        6,
        1,
        code(Op::Inst),
        7,
        code(Op::Throw),
        code(Op::Clear),
        code(Op::Getobj),
        1,
        code(Op::Stop),
    ]
}

#[test]
fn unwind_writes_into_an_occupied_catch_cell() {
    let stack = vec![
        new_list(vec![Value::Undefined]),
        new_list(vec![Value::Int(99)]),
    ];
    let result = run_nested(catch_program(), stack).unwrap();
    let exc = result.as_object().expect("boxed exception");
    assert!(matches!(exc.kind, host::Kind::Exception));
    assert!(matches!(exc.get_raw("message"), Some(Value::Int(7))));
    assert!(matches!(exc.get_raw("stack"), Some(Value::Str(_))));
}

#[test]
fn unwind_fills_an_empty_catch_cell() {
    let stack = vec![new_list(vec![Value::Undefined]), new_list(Vec::new())];
    let result = run_nested(catch_program(), stack).unwrap();
    let exc = result.as_object().expect("boxed exception");
    assert!(matches!(exc.get_raw("message"), Some(Value::Int(7))));
}

#[test]
fn unwind_truncates_to_the_frame_depth() {
    // Push two extra values before throwing; the handler's getobj must
    // still find the catch cell at slot 1 after truncation.
    let prog = vec![
        code(Op::Stepin),
        10,
        1,
        code(Op::Inst),
        1,
        code(Op::Inst),
        2,
        code(Op::Inst),
        3,
        code(Op::Throw),
        code(Op::Clear),
        code(Op::Getobj),
        1,
        code(Op::Stop),
    ];
    let stack = vec![new_list(vec![Value::Undefined]), new_list(Vec::new())];
    let result = run_nested(prog, stack).unwrap();
    assert!(result.as_object().is_some());
}

#[test]
fn check_err_with_pending_error_rethrows_uncatchably() {
    let prog = vec![
        code(Op::Stepin),
        6,
        0,
        code(Op::Inst),
        7,
        code(Op::Throw),
        code(Op::CheckErr),
    ];
    let stack = vec![new_list(vec![Value::Undefined])];
    let err = run_nested(prog, stack).unwrap_err();
    assert!(matches!(err, VmError::Rethrown(_)));
    assert!(!err.is_catchable());
}

#[test]
fn uncaught_errors_escape_to_the_caller() {
    let prog = vec![code(Op::Inst), 7, code(Op::Throw)];
    let err = run_nested(prog, Vec::new()).unwrap_err();
    assert!(matches!(err, VmError::Js(Value::Int(7))));
}

#[test]
fn closures_are_reentrant_with_independent_stacks() {
    // Outer: pad, mint a closure (no captures, one arg slot at 3), stop.
    // Closure body at 9: getobj 3; stop — i.e. return the first argument.
    let prog = vec![
        code(Op::Inst),
        0,
        code(Op::VmFactory),
        9,
        0,
        1,
        3,
        code(Op::Undefined),
        code(Op::Stop),
        code(Op::Getobj),
        3,
        code(Op::Stop),
    ];
    let result = run_outer(prog).unwrap();
    let tail = list_values(&result);
    let func = tail[0].as_object().expect("closure object");
    assert!(func.is_callable());

    let a = host::call_function(func, &[Value::Null, Value::Int(42)]).unwrap();
    assert!(matches!(a, Value::Int(42)));
    let b = host::call_function(func, &[Value::Null, Value::Str("x".into())]).unwrap();
    assert!(matches!(b, Value::Str(ref s) if s == "x"));
}

#[test]
fn closures_read_captured_cells_at_call_time() {
    // Outer: inst_arr 5 makes a cell at slot 2; the closure captures it
    // into child slot 3 and dereferences it.
    let prog = vec![
        code(Op::InstArr),
        5,
        code(Op::VmFactory),
        10,
        1,
        0,
        3,
        2,
        code(Op::Undefined),
        code(Op::Stop),
        code(Op::Getobj),
        3,
        code(Op::Stop),
    ];
    // Layout check: pc 10 is the closure body (getobj 3; stop).
    let win = build_window();
    let vm = Vm::outer(0, Rc::new(prog), identity_opmap(), win);
    let result = vm.run().unwrap();
    let tail = list_values(&result);
    let func = tail[0].as_object().expect("closure object");

    let first = host::call_function(func, &[]).unwrap();
    assert!(matches!(first, Value::Int(5)));
}

#[test]
fn je_jumps_on_truthy_without_popping() {
    let prog = vec![
        code(Op::True),
        code(Op::Je),
        5,
        code(Op::Inst),
        99,
        code(Op::Stop),
    ];
    let result = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(result, Value::Bool(true)));
}

#[test]
fn swap_reaches_below_the_top() {
    let prog = vec![
        code(Op::Inst),
        1,
        code(Op::Inst),
        2,
        code(Op::Inst),
        3,
        code(Op::Swap),
        1,
        code(Op::Stop),
    ];
    let result = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(result, Value::Int(1)));
}

#[test]
fn arr_popleft_reports_emptiness() {
    let prog = vec![code(Op::ArrPopleft), code(Op::Drop), code(Op::Stop)];

    let popped = run_nested(prog.clone(), vec![new_list(vec![Value::Int(7)])]).unwrap();
    assert!(matches!(popped, Value::Int(7)));

    let empty = run_nested(prog, vec![new_list(Vec::new())]).unwrap();
    assert!(matches!(empty, Value::Undefined));
}

#[test]
fn bitwise_results_reduce_to_32_bits() {
    // 1 << 31 wraps into the signed 32-bit range.
    let prog = vec![
        code(Op::Inst),
        1,
        code(Op::Inst),
        31,
        code(Op::Lshift),
        code(Op::Stop),
    ];
    let v = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(v, Value::Int(-2147483648)));

    // -1 >>> 0 reduces to unsigned 32-bit.
    let prog = vec![
        code(Op::Inst),
        -1,
        code(Op::Inst),
        0,
        code(Op::Urshift),
        code(Op::Stop),
    ];
    let v = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(v, Value::Int(4294967295)));
}

#[test]
fn division_demotes_exact_quotients() {
    let prog = vec![
        code(Op::Inst),
        10,
        code(Op::Inst),
        4,
        code(Op::Div),
        code(Op::Stop),
    ];
    let v = run_nested(prog.clone(), Vec::new()).unwrap();
    assert!(matches!(v, Value::Float(f) if f == 2.5));

    let prog = vec![
        code(Op::Inst),
        10,
        code(Op::Inst),
        5,
        code(Op::Div),
        code(Op::Stop),
    ];
    let v = run_nested(prog, Vec::new()).unwrap();
    assert!(matches!(v, Value::Int(2)));
}

#[test]
fn get_global_resolves_through_the_window() {
    let prog = vec![code(Op::GetGlobal), code(Op::Stop)];
    let v = run_nested(prog, vec![Value::Str("innerWidth".to_string())]).unwrap();
    assert!(matches!(v, Value::Int(300)));
}

#[test]
fn member_read_on_null_unwinds_into_a_catch_frame() {
    // stepin; null; zstr 'x'; group; getattr → TypeError → the handler
    // returns the boxed exception from the catch cell.
    let prog = {
        let mut p = vec![code(Op::Stepin), 0, 1];
        p.extend([code(Op::Null)]);
        p.extend([code(Op::Zstr), code(Op::Concat), 0x78]);
        p.extend([code(Op::Group), code(Op::Getattr)]);
        let catch_pc = p.len() as i64;
        p.extend([code(Op::Clear), code(Op::Getobj), 1, code(Op::Stop)]);
        p[1] = catch_pc;
        p
    };
    let stack = vec![new_list(vec![Value::Undefined]), new_list(Vec::new())];
    let result = run_nested(prog, stack).unwrap();
    let exc = result.as_object().expect("boxed exception");
    let msg = exc.get_raw("message").unwrap().to_display();
    assert!(msg.contains("Cannot read properties of null (reading 'x')"));
}
