use std::sync::Mutex;

use super::*;
use crate::{
    assembly::Operand,
    metadata::{
        body::{MethodFlags, Param},
        identity::MethodIdentity,
    },
};

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, Option<Value>, Vec<Value>)>>,
}

impl Dispatch for Recorder {
    fn dispatch(
        &self,
        method: &MethodRef,
        this: Option<Value>,
        args: Vec<Value>,
        _depth: usize,
    ) -> Result<Option<Value>> {
        lock!(self.calls).push((method.name.clone(), this, args));
        Ok(method.returns.as_ref().map(|_| Value::from("ok")))
    }
}

fn method(returns: Option<&str>, locals: usize) -> MethodDef {
    MethodDef {
        identity: MethodIdentity::new("Acme.Tests", "Run", &["System.Int64"]),
        flags: MethodFlags::STATIC,
        params: vec![Param::new("value", "System.Int64")],
        returns: returns.map(str::to_string),
        locals: vec!["System.Object".to_string(); locals],
        body: Default::default(),
    }
}

fn run(ops: Vec<Operation>, def: &MethodDef, args: Vec<Value>) -> Result<Option<Value>> {
    let recorder = Recorder::default();
    let config = EngineConfig::default();
    let program = Program::new(InstructionStream::from_operations(ops), def)?;
    let mut frame = Frame::new(args, program.local_count());
    Interpreter::new(&recorder, &config, 0).execute(&program, &mut frame)
}

#[test]
fn arithmetic() {
    let def = method(Some("System.Int64"), 0);
    let result = run(
        vec![
            Operation::load_arg(0),
            Operation::push_int(5),
            Operation::simple(OpCode::Add),
            Operation::push_int(2),
            Operation::simple(OpCode::Sub),
            Operation::simple(OpCode::Return),
        ],
        &def,
        vec![Value::Int(10)],
    )
    .unwrap();

    assert_eq!(result, Some(Value::Int(13)));
}

#[test]
fn locals_start_null() {
    let def = method(Some("System.Object"), 1);
    let result = run(
        vec![Operation::load_local(0), Operation::simple(OpCode::Return)],
        &def,
        vec![Value::Int(0)],
    )
    .unwrap();

    assert_eq!(result, Some(Value::Null));
}

#[test]
fn branches() {
    // if (value == 3) return 1; return 0;
    let mut stream = InstructionStream::new();
    let other = stream.define_label();
    let ops = vec![
        Operation::load_arg(0),
        Operation::push_int(3),
        Operation::simple(OpCode::CompareEq),
        Operation::branch(OpCode::BranchIfFalse, other),
        Operation::push_int(1),
        Operation::simple(OpCode::Return),
        Operation::push_int(0).with_label(other),
        Operation::simple(OpCode::Return),
    ];
    let def = method(Some("System.Int64"), 0);

    assert_eq!(run(ops.clone(), &def, vec![Value::Int(3)]).unwrap(), Some(Value::Int(1)));
    assert_eq!(run(ops, &def, vec![Value::Int(4)]).unwrap(), Some(Value::Int(0)));
}

#[test]
fn calls_pop_this_and_arguments() {
    let setter = MethodRef::instance("Acme.Model", "set_Version").with_params(&["System.String"]);
    let getter = MethodRef::instance("Acme.Model", "get_Version").returning("System.String");

    let recorder = Recorder::default();
    let config = EngineConfig::default();
    let def = method(Some("System.String"), 1);
    let program = Program::new(
        InstructionStream::from_operations(vec![
            Operation::load_local(0),
            Operation::push_string("1.0"),
            Operation::call_virtual(setter),
            Operation::load_local(0),
            Operation::call_virtual(getter),
            Operation::simple(OpCode::Return),
        ]),
        &def,
    )
    .unwrap();

    let model = Value::object("Acme.Model");
    let mut frame = Frame::new(vec![Value::Int(0)], 1);
    frame.locals[0] = model.clone();

    let result = Interpreter::new(&recorder, &config, 0)
        .execute(&program, &mut frame)
        .unwrap();
    assert_eq!(result, Some(Value::from("ok")));

    let calls = lock!(recorder.calls);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "set_Version");
    assert_eq!(calls[0].1, Some(model.clone()));
    assert_eq!(calls[0].2, vec![Value::from("1.0")]);
    assert_eq!(calls[1].0, "get_Version");
    assert!(calls[1].2.is_empty());
}

#[test]
fn virtual_call_on_null_faults() {
    let def = method(None, 1);
    let result = run(
        vec![
            Operation::load_local(0),
            Operation::call_virtual(MethodRef::instance("Acme.Model", "Touch")),
            Operation::simple(OpCode::Return),
        ],
        &def,
        vec![Value::Int(0)],
    );

    assert!(matches!(result, Err(Error::Execution(_))));
}

#[test]
fn instruction_budget() {
    let mut stream = InstructionStream::new();
    let top = stream.define_label();
    let def = method(None, 0);
    let program = Program::new(
        InstructionStream::from_operations(vec![
            Operation::simple(OpCode::Nop).with_label(top),
            Operation::branch(OpCode::Branch, top),
        ]),
        &def,
    )
    .unwrap();

    let recorder = Recorder::default();
    let config = EngineConfig::default().with_max_instructions(100);
    let mut frame = Frame::new(vec![Value::Int(0)], 0);
    let mut interpreter = Interpreter::new(&recorder, &config, 0);

    assert!(matches!(
        interpreter.execute(&program, &mut frame),
        Err(Error::InstructionLimit(100))
    ));
    assert_eq!(interpreter.executed(), 101);
}

#[test]
fn falling_off_the_end() {
    let def = method(None, 0);
    assert!(matches!(
        run(vec![Operation::simple(OpCode::Nop)], &def, vec![Value::Int(0)]),
        Err(Error::Execution(_))
    ));
}

#[test]
fn underflow() {
    let def = method(None, 0);
    assert!(matches!(
        run(
            vec![Operation::simple(OpCode::Pop), Operation::simple(OpCode::Return)],
            &def,
            vec![]
        ),
        Err(Error::StackImbalance(_))
    ));
}

#[test]
fn duplicate_labels_are_rejected() {
    let mut stream = InstructionStream::new();
    let label = stream.define_label();
    let def = method(None, 0);

    let result = Program::new(
        InstructionStream::from_operations(vec![
            Operation::simple(OpCode::Nop).with_label(label),
            Operation::simple(OpCode::Return).with_label(label),
        ]),
        &def,
    );
    assert!(matches!(result, Err(Error::InvalidBranch(_))));
}

#[test]
fn store_argument_is_visible_to_later_loads() {
    let def = method(Some("System.Int64"), 0);
    let result = run(
        vec![
            Operation::push_int(7),
            Operation::new(OpCode::StoreArg, Operand::Integer(0)),
            Operation::load_arg(0),
            Operation::simple(OpCode::Dup),
            Operation::simple(OpCode::Add),
            Operation::simple(OpCode::Return),
        ],
        &def,
        vec![Value::Int(1)],
    )
    .unwrap();

    assert_eq!(result, Some(Value::Int(14)));
}
