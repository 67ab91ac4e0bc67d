//! Tests for value propagation, assignment targets and error routing.
mod common;
use benchflow::prelude::*;
use common::*;

#[test]
fn test_fan_out_writes_every_target() {
    let mut definition = DefinitionBuilder::new();
    let answer = definition.constant(42);
    let mut flow = FlowBuilder::new("fan-out");
    let trigger = flow.seq_input();
    let targets: Vec<u16> = (0..3).map(|_| flow.data_input()).collect();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let producer = flow.component(
        Component::new(ComponentType::EvalExpr)
            .with_inputs(&[trigger])
            .with_property(constant_expr(answer))
            .with_outputs(2),
    );
    flow.connect(start_index, SEQOUT, producer, trigger);
    for &slot in &targets {
        let reader = flow.component(Component::new(ComponentType::Noop).with_inputs(&[slot]));
        flow.connect(producer, 1, reader, slot);
    }
    definition.flow(flow.build());

    let (mut runtime, _) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    runtime.tick();
    runtime.tick();

    for &slot in &targets {
        assert_eq!(runtime.input_value(id, slot as usize), Some(&Value::Int32(42)));
    }
    // Every reader became ready independently.
    assert_eq!(runtime.queue().len(), 3);

    // Disturbing one target leaves its siblings untouched.
    runtime.clear_input_value(id, targets[1] as usize);
    assert_eq!(runtime.input_value(id, targets[0] as usize), Some(&Value::Int32(42)));
    assert_eq!(runtime.input_value(id, targets[2] as usize), Some(&Value::Int32(42)));
}

#[test]
fn test_sequence_pulse_fires_once() {
    let mut definition = DefinitionBuilder::new();
    let text = definition.constant("tick");
    let mut flow = FlowBuilder::new("pulse");
    let trigger = flow.seq_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let log = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[trigger])
            .with_property(constant_expr(text)),
    );
    flow.connect(start_index, SEQOUT, log, trigger);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    let trigger_changes = |recorder: &Recorder| {
        recorder
            .value_changes
            .iter()
            .filter(|location| {
                **location
                    == ValueLocation::Slot {
                        instance: id,
                        slot: trigger as usize,
                    }
            })
            .count()
    };
    runtime.tick();
    // The pulse write and the reset at enqueue are both reported.
    assert_eq!(trigger_changes(&*recorder.borrow()), 2);
    for _ in 0..4 {
        runtime.tick();
    }
    assert_eq!(recorder.borrow().logs.len(), 1);
    assert_eq!(runtime.input_value(id, trigger as usize), Some(&Value::Undefined));

    // Only a new propagation re-arms it.
    runtime
        .propagate_value_through_seqout(id, start_index)
        .unwrap();
    runtime.tick();
    runtime.tick();
    assert_eq!(recorder.borrow().logs.len(), 2);
}

/// Start -> SetVariable with the given (destination, value) property pairs.
/// Output 1 of the SetVariable is its catch output.
fn set_variable_flow(flow: &mut FlowBuilder, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> usize {
    let trigger = flow.seq_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let mut set = Component::new(ComponentType::SetVariable)
        .with_inputs(&[trigger])
        .with_error_catch_output(1);
    for (destination, value) in pairs {
        set = set.with_property(destination).with_property(value);
    }
    let set = flow.component(set);
    flow.connect(start_index, SEQOUT, set, trigger);
    set
}

#[test]
fn test_assignment_coerces_to_prior_type() {
    let mut definition = DefinitionBuilder::new();
    let fraction = definition.constant(2.75f64);
    let number = definition.constant(5);
    let mut flow = FlowBuilder::new("coerce");
    let int_local = flow.local(0);
    let float_local = flow.local(0.0f32);
    let double_local = flow.local(0.0f64);
    let text_local = flow.local("");
    let bool_local = flow.local(false);
    let null_local = flow.local(Literal::Null);
    set_variable_flow(
        &mut flow,
        vec![
            (local_expr(int_local), constant_expr(fraction)),
            (local_expr(float_local), constant_expr(number)),
            (local_expr(double_local), constant_expr(number)),
            (local_expr(text_local), constant_expr(number)),
            (local_expr(bool_local), constant_expr(number)),
            (local_expr(null_local), constant_expr(fraction)),
        ],
    );
    definition.flow(flow.build());

    let (mut runtime, _) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    run_to_idle(&mut runtime, 10);

    let state = runtime.instance(id).unwrap();
    assert_eq!(state.local(int_local as usize), Some(&Value::Int32(2)));
    assert_eq!(state.local(float_local as usize), Some(&Value::Float(5.0)));
    assert_eq!(state.local(double_local as usize), Some(&Value::Double(5.0)));
    assert_eq!(state.local(text_local as usize), Some(&Value::from("5")));
    // Booleans and untyped slots take the value as is.
    assert_eq!(state.local(bool_local as usize), Some(&Value::Int32(5)));
    assert_eq!(state.local(null_local as usize), Some(&Value::Double(2.75)));
}

#[test]
fn test_assign_to_array_element() {
    let mut definition = DefinitionBuilder::new();
    let one = definition.constant(1);
    let nine = definition.constant(9.5f64);
    let mut flow = FlowBuilder::new("array");
    let array = flow.local(Literal::Array(vec![
        Literal::Int32(1),
        Literal::Int32(2),
        Literal::Int32(3),
    ]));
    set_variable_flow(
        &mut flow,
        vec![(
            Assembler::new().local(array).constant(one).element().finish(),
            constant_expr(nine),
        )],
    );
    definition.flow(flow.build());

    let (mut runtime, _) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    run_to_idle(&mut runtime, 10);

    let state = runtime.instance(id).unwrap();
    assert_eq!(state.local(array as usize).unwrap().to_text(), "[1, 9, 3]");
}

#[test]
fn test_out_of_bounds_assignment_reaches_catch_output() {
    let mut definition = DefinitionBuilder::new();
    let five = definition.constant(5);
    let mut flow = FlowBuilder::new("array");
    let array = flow.local(Literal::Array(vec![Literal::Int32(1)]));
    let caught = flow.data_input();
    let set = set_variable_flow(
        &mut flow,
        vec![(
            Assembler::new().local(array).constant(five).element().finish(),
            constant_expr(five),
        )],
    );
    let reader = flow.component(Component::new(ComponentType::Noop).with_inputs(&[caught]));
    flow.connect(set, 1, reader, caught);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    runtime.tick();
    runtime.tick();

    let message = runtime.input_value(id, caught as usize).unwrap().to_text();
    assert!(message.contains("out of bounds"), "{}", message);
    assert!(recorder.borrow().errors.is_empty());
    assert!(!runtime.is_stopped());
}

#[test]
fn test_assign_global_native_and_flow_output() {
    let mut definition = DefinitionBuilder::new();
    let value = definition.constant(12);
    let global = definition.global(0.0f64);

    let mut flow = FlowBuilder::new("targets");
    let trigger = flow.seq_input();
    let forwarded = flow.data_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let set = flow.component(
        Component::new(ComponentType::SetVariable)
            .with_inputs(&[trigger])
            .with_property(Assembler::new().global(global).finish())
            .with_property(constant_expr(value))
            .with_property(Assembler::new().global(global + 1).finish())
            .with_property(constant_expr(value))
            .with_property(Assembler::new().output(1).finish())
            .with_property(constant_expr(value))
            .with_outputs(2),
    );
    let reader = flow.component(Component::new(ComponentType::Noop).with_inputs(&[forwarded]));
    flow.connect(start_index, SEQOUT, set, trigger)
        .connect(set, 1, reader, forwarded);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    runtime.tick();
    runtime.tick();

    assert_eq!(runtime.global_variable(0), Some(&Value::Double(12.0)));
    assert_eq!(
        recorder.borrow().native_writes,
        vec![(1, Value::Int32(12))]
    );
    assert_eq!(runtime.input_value(id, forwarded as usize), Some(&Value::Int32(12)));
    assert!(
        recorder
            .borrow()
            .value_changes
            .contains(&ValueLocation::Global(0))
    );
}

/// Start -> EvalExpr(2 / 0); the expression always fails.
fn failing_flow(flow: &mut FlowBuilder, zero: u16, two: u16) -> usize {
    let trigger = flow.seq_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let failing = flow.component(
        Component::new(ComponentType::EvalExpr)
            .with_inputs(&[trigger])
            .with_property(
                Assembler::new()
                    .constant(two)
                    .constant(zero)
                    .op(Operation::Div)
                    .finish(),
            ),
    );
    flow.connect(start_index, SEQOUT, failing, trigger);
    failing
}

#[test]
fn test_catch_error_component_receives_message() {
    let mut definition = DefinitionBuilder::new();
    let zero = definition.constant(0);
    let two = definition.constant(2);
    let mut flow = FlowBuilder::new("catching");
    failing_flow(&mut flow, zero, two);
    let message_slot = flow.data_input();
    let catcher = flow.component(Component::new(ComponentType::CatchError).with_outputs(2));
    let log = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[message_slot])
            .with_property(Assembler::new().input(message_slot).finish()),
    );
    flow.connect(catcher, 1, log, message_slot);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    run_to_idle(&mut runtime, 10);

    let recorder = recorder.borrow();
    assert_eq!(recorder.logs.len(), 1);
    assert!(recorder.logs[0].contains("division by zero"));
    assert!(recorder.errors.is_empty());
    assert!(runtime.execution_state(id, catcher).is_none());
    assert!(!runtime.is_stopped());
}

#[test]
fn test_uncaught_error_is_fatal() {
    let mut definition = DefinitionBuilder::new();
    let zero = definition.constant(0);
    let two = definition.constant(2);
    let mut flow = FlowBuilder::new("failing");
    let failing = failing_flow(&mut flow, zero, two);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    runtime.tick();
    let report = runtime.tick();

    assert!(report.stopped);
    assert!(runtime.instance(id).is_none());
    assert!(runtime.execution_state(id, failing).is_none());
    assert!(runtime.last_error().unwrap().contains("division by zero"));
    let recorder = recorder.borrow();
    assert_eq!(recorder.errors.len(), 1);
    assert_eq!(recorder.stop_script_calls, 1);
}

#[test]
fn test_error_in_called_flow_is_caught_by_caller() {
    let mut definition = DefinitionBuilder::new();
    let boom = definition.constant("boom");

    let mut parent = FlowBuilder::new("parent");
    let call_trigger = parent.seq_input();
    let message_slot = parent.data_input();
    let start_index = parent.component(Component::new(ComponentType::Start));
    let call = parent.component(
        Component::new(ComponentType::CallAction)
            .with_inputs(&[call_trigger])
            .with_target(1),
    );
    let catcher = parent.component(Component::new(ComponentType::CatchError).with_outputs(2));
    let log = parent.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[message_slot])
            .with_property(Assembler::new().input(message_slot).finish()),
    );
    parent
        .connect(start_index, SEQOUT, call, call_trigger)
        .connect(catcher, 1, log, message_slot);

    let mut child = FlowBuilder::new("child");
    let raise_trigger = child.seq_input();
    let child_start = child.component(Component::new(ComponentType::Start));
    let raise = child.component(
        Component::new(ComponentType::Error)
            .with_inputs(&[raise_trigger])
            .with_property(constant_expr(boom)),
    );
    child.connect(child_start, SEQOUT, raise, raise_trigger);

    definition.flow(parent.build());
    definition.flow(child.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let root = start(&mut runtime);
    runtime.tick(); // Start
    runtime.tick(); // CallAction
    let child_id = runtime.instance(root).unwrap().children()[0];
    runtime.tick(); // child Start
    runtime.tick(); // Error raises into the parent's catch component

    // Nothing is left to run in the child, so it is released right away.
    assert!(runtime.instance(child_id).is_none());
    assert_eq!(recorder.borrow().destroyed, 1);
    assert!(runtime.execution_state(root, catcher).is_some());
    assert!(!runtime.instance(root).unwrap().is_async(call));

    run_to_idle(&mut runtime, 10);
    assert_eq!(recorder.borrow().logs, vec!["boom".to_string()]);
    assert!(!runtime.instance(root).unwrap().has_error());
    assert!(recorder.borrow().errors.is_empty());
    assert!(!runtime.is_stopped());
}

#[test]
fn test_failed_instance_skips_remaining_components() {
    let mut definition = DefinitionBuilder::new();
    let boom = definition.constant("boom");
    let after = definition.constant("after-error");

    let mut parent = FlowBuilder::new("parent");
    let call_trigger = parent.seq_input();
    let message_slot = parent.data_input();
    let start_index = parent.component(Component::new(ComponentType::Start));
    let call = parent.component(
        Component::new(ComponentType::CallAction)
            .with_inputs(&[call_trigger])
            .with_target(1),
    );
    let catcher = parent.component(Component::new(ComponentType::CatchError).with_outputs(2));
    let log = parent.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[message_slot])
            .with_property(Assembler::new().input(message_slot).finish()),
    );
    parent
        .connect(start_index, SEQOUT, call, call_trigger)
        .connect(catcher, 1, log, message_slot);

    // Start fans out to Error first, then to a Log queued behind it.
    let mut child = FlowBuilder::new("child");
    let raise_trigger = child.seq_input();
    let log_trigger = child.seq_input();
    let child_start = child.component(Component::new(ComponentType::Start));
    let raise = child.component(
        Component::new(ComponentType::Error)
            .with_inputs(&[raise_trigger])
            .with_property(constant_expr(boom)),
    );
    let late_log = child.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[log_trigger])
            .with_property(constant_expr(after)),
    );
    child
        .connect(child_start, SEQOUT, raise, raise_trigger)
        .connect(child_start, SEQOUT, late_log, log_trigger);

    definition.flow(parent.build());
    definition.flow(child.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let root = start(&mut runtime);
    runtime.tick(); // Start
    runtime.tick(); // CallAction
    let child_id = runtime.instance(root).unwrap().children()[0];

    run_to_idle(&mut runtime, 10);
    assert_eq!(recorder.borrow().logs, vec!["boom".to_string()]);
    assert!(runtime.instance(child_id).is_none());
    assert_eq!(recorder.borrow().destroyed, 1);
    assert!(!runtime.instance(root).unwrap().is_async(call));
    assert!(recorder.borrow().errors.is_empty());
    assert!(!runtime.is_stopped());
}
