//! Tests for the execution queue, the time-boxed tick and instance lifetimes.
mod common;
use benchflow::prelude::*;
use common::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLEEPER: u16 = 1;
const TWO_STEP: u16 = 2;

/// One flow of `count` input-less host components, all ready at start.
fn host_flow(count: usize, code: u16) -> FlowDefinition {
    let mut definition = DefinitionBuilder::new();
    let mut flow = FlowBuilder::new("hosts");
    for _ in 0..count {
        flow.component(Component::new(ComponentType::Host(code)));
    }
    definition.flow(flow.build());
    definition.build()
}

/// Start -> Log(constant "hello") with the log optionally flagged as a breakpoint.
fn start_then_log(breakpoint: bool) -> FlowDefinition {
    let mut definition = DefinitionBuilder::new();
    let hello = definition.constant("hello");
    let mut flow = FlowBuilder::new("main");
    let trigger = flow.seq_input();
    let start = flow.component(Component::new(ComponentType::Start));
    let mut log = Component::new(ComponentType::Log)
        .with_inputs(&[trigger])
        .with_property(constant_expr(hello));
    if breakpoint {
        log = log.with_breakpoint();
    }
    let log = flow.component(log);
    flow.connect(start, SEQOUT, log, trigger);
    definition.flow(flow.build());
    definition.build()
}

#[test]
fn test_tick_respects_time_budget() {
    let (hooks, _) = recording_hooks();
    let mut runtime = Runtime::builder(Arc::new(host_flow(100, SLEEPER)))
        .with_hooks(hooks)
        .with_host_component(
            SLEEPER,
            |_: &mut Runtime, _: InstanceId, _: usize| -> Result<Step, FlowError> {
                thread::sleep(Duration::from_millis(2));
                Ok(Step::Completed)
            },
        )
        .build()
        .unwrap();
    start(&mut runtime);
    assert_eq!(runtime.queue().len(), 100);

    let started = Instant::now();
    let report = runtime.tick();
    let elapsed = started.elapsed();

    assert!(report.budget_exhausted);
    assert!(report.executed >= 1 && report.executed < 100);
    assert_eq!(report.remaining, 100 - report.executed);
    // Bounded by the budget plus the one task that crossed it.
    assert!(elapsed < Duration::from_millis(200), "tick took {:?}", elapsed);

    // The backlog is finished on later ticks without loss.
    let mut executed = report.executed;
    for _ in 0..100 {
        if runtime.queue().is_empty() {
            break;
        }
        executed += runtime.tick().executed;
    }
    assert_eq!(executed, 100);
}

#[test]
fn test_continuations_wait_for_next_tick() {
    let (hooks, _) = recording_hooks();
    let mut runtime = Runtime::builder(Arc::new(host_flow(1, TWO_STEP)))
        .with_hooks(hooks)
        .with_host_component(
            TWO_STEP,
            |runtime: &mut Runtime, instance: InstanceId, index: usize| -> Result<Step, FlowError> {
                match runtime.host_execution_state(instance, index) {
                    None => {
                        runtime.set_host_execution_state(instance, index, Some(1));
                        Ok(Step::Suspended)
                    }
                    Some(_) => {
                        runtime.set_host_execution_state(instance, index, None);
                        Ok(Step::Completed)
                    }
                }
            },
        )
        .build()
        .unwrap();
    let id = start(&mut runtime);

    let first = runtime.tick();
    assert_eq!(first.executed, 1);
    assert_eq!(first.remaining, 1);
    assert_eq!(runtime.host_execution_state(id, 0), Some(1));
    assert!(runtime.queue().peek().unwrap().continuous);

    let second = runtime.tick();
    assert_eq!(second.executed, 1);
    assert_eq!(second.remaining, 0);
    assert!(runtime.execution_state(id, 0).is_none());
}

#[test]
fn test_task_that_lost_its_input_stalls_the_tick() {
    let (mut runtime, _) = recorded_runtime(expression_definition(constant_expr(2)));
    let id = start(&mut runtime);
    runtime.set_input_value(id, 0, Value::Int32(1)).unwrap();
    assert_eq!(runtime.queue().len(), 1);

    runtime.clear_input_value(id, 0);
    let report = runtime.tick();
    assert!(report.stalled);
    assert_eq!(report.executed, 0);
    assert_eq!(report.remaining, 1);
}

#[test]
fn test_full_queue_is_fatal() {
    let mut definition = DefinitionBuilder::new();
    let mut flow = FlowBuilder::new("crowded");
    for _ in 0..3 {
        flow.component(Component::new(ComponentType::Noop));
    }
    definition.flow(flow.build());

    let (hooks, recorder) = recording_hooks();
    let config = RuntimeConfig {
        queue_capacity: 2,
        ..RuntimeConfig::default()
    };
    let mut runtime = Runtime::builder(Arc::new(definition.build()))
        .with_hooks(hooks)
        .with_config(config)
        .build()
        .unwrap();
    start(&mut runtime);

    assert_eq!(runtime.last_error(), Some("Execution queue is full"));
    assert_eq!(recorder.borrow().stop_script_calls, 1);
    assert!(runtime.is_stopped());

    let report = runtime.tick();
    assert!(report.stopped);
    assert_eq!(report.executed, 0);
    assert!(runtime.root_instances().is_empty());
    assert!(runtime.queue().is_empty());
}

#[test]
fn test_tick_is_skipped_while_flows_are_not_running() {
    let (mut hooks, recorder) = recording_hooks();
    hooks.running = false;
    let mut runtime = Runtime::builder(Arc::new(start_then_log(false)))
        .with_hooks(hooks)
        .build()
        .unwrap();
    start(&mut runtime);

    let report = runtime.tick();
    assert_eq!(report.executed, 0);
    assert_eq!(report.remaining, 1);
    assert!(recorder.borrow().logs.is_empty());
}

#[test]
fn test_stop_is_deferred_to_the_tick() {
    let (mut runtime, recorder) = recorded_runtime(start_then_log(false));
    start(&mut runtime);
    runtime.stop();
    assert_eq!(runtime.root_instances().len(), 1);
    assert_eq!(runtime.instances().len(), 1);

    let report = runtime.tick();
    assert!(report.stopped);
    assert_eq!(report.executed, 0);
    assert!(runtime.root_instances().is_empty());
    assert!(runtime.instances().is_empty());
    assert_eq!(recorder.borrow().destroyed, 1);
    assert_eq!(recorder.borrow().debugger_messages, 1);
}

#[test]
fn test_breakpoint_pauses_before_component() {
    let (mut runtime, recorder) = recorded_runtime(start_then_log(true));
    runtime.attach_debugger();
    start(&mut runtime);

    // Start runs; the log component is queued behind the snapshot.
    assert_eq!(runtime.tick().executed, 1);

    let report = runtime.tick();
    assert!(report.paused);
    assert_eq!(report.executed, 0);
    assert_eq!(runtime.debugger_state(), Some(DebuggerState::Paused));
    assert!(runtime.tick().paused);

    runtime.resume();
    let report = runtime.tick();
    assert_eq!(report.executed, 1);
    assert_eq!(recorder.borrow().logs, vec!["hello".to_string()]);
}

#[test]
fn test_single_step_runs_one_task() {
    let (hooks, _) = recording_hooks();
    let mut runtime = Runtime::builder(Arc::new(host_flow(3, SLEEPER)))
        .with_hooks(hooks)
        .with_host_component(
            SLEEPER,
            |_: &mut Runtime, _: InstanceId, _: usize| -> Result<Step, FlowError> {
                Ok(Step::Completed)
            },
        )
        .build()
        .unwrap();
    runtime.attach_debugger();
    runtime.pause();
    start(&mut runtime);

    assert_eq!(runtime.tick().executed, 0);
    runtime.single_step();
    let report = runtime.tick();
    assert_eq!(report.executed, 1);
    assert!(report.paused);
    assert_eq!(runtime.debugger_state(), Some(DebuggerState::Paused));

    runtime.detach_debugger();
    assert_eq!(runtime.tick().executed, 2);
}

#[test]
fn test_delay_holds_execution_state_until_done() {
    let mut definition = DefinitionBuilder::new();
    let millis = definition.constant(30);
    let done = definition.constant("done");
    let mut flow = FlowBuilder::new("delay");
    let delay_trigger = flow.seq_input();
    let log_trigger = flow.seq_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let delay = flow.component(
        Component::new(ComponentType::Delay)
            .with_inputs(&[delay_trigger])
            .with_property(constant_expr(millis)),
    );
    let log = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[log_trigger])
            .with_property(constant_expr(done)),
    );
    flow.connect(start_index, SEQOUT, delay, delay_trigger)
        .connect(delay, SEQOUT, log, log_trigger);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    runtime.tick();
    runtime.tick();
    assert!(matches!(
        runtime.execution_state(id, delay),
        Some(ExecutionState::Delay { .. })
    ));
    assert!(recorder.borrow().logs.is_empty());

    thread::sleep(Duration::from_millis(40));
    run_to_idle(&mut runtime, 10);
    assert!(runtime.execution_state(id, delay).is_none());
    assert_eq!(recorder.borrow().logs, vec!["done".to_string()]);
}

#[test]
fn test_loop_iterates_and_fires_done() {
    let mut definition = DefinitionBuilder::new();
    let zero = definition.constant(0);
    let three = definition.constant(3);
    let one = definition.constant(1);
    let finished = definition.constant("finished");

    let mut flow = FlowBuilder::new("loop");
    let loop_trigger = flow.seq_input();
    let body_trigger = flow.seq_input();
    let done_trigger = flow.seq_input();
    let counter = flow.local(-1);

    let start_index = flow.component(Component::new(ComponentType::Start));
    let repeat = flow.component(
        Component::new(ComponentType::Loop)
            .with_inputs(&[loop_trigger])
            .with_property(local_expr(counter))
            .with_property(constant_expr(zero))
            .with_property(constant_expr(three))
            .with_property(constant_expr(one))
            .with_outputs(2),
    );
    let body = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[body_trigger])
            .with_property(local_expr(counter)),
    );
    let done = flow.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[done_trigger])
            .with_property(constant_expr(finished)),
    );
    flow.connect(start_index, SEQOUT, repeat, loop_trigger)
        .connect(repeat, SEQOUT, body, body_trigger)
        .connect(body, SEQOUT, repeat, loop_trigger)
        .connect(repeat, 1, done, done_trigger);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    let id = start(&mut runtime);
    run_to_idle(&mut runtime, 50);

    assert_eq!(recorder.borrow().logs, vec!["0", "1", "2", "finished"]);
    assert_eq!(runtime.instance(id).unwrap().local(counter as usize), Some(&Value::Int32(2)));
    assert!(runtime.execution_state(id, repeat).is_none());
}

/// Parent: Start -> CallAction(child) -> Log("after"), with the child's output 1
/// logged too. Child: Start -> EvalExpr(7) -> Output(1) and -> End.
fn call_definition() -> FlowDefinition {
    let mut definition = DefinitionBuilder::new();
    let seven = definition.constant(7);
    let after = definition.constant("after");
    let child_index = 1u16;

    let mut parent = FlowBuilder::new("parent");
    let call_trigger = parent.seq_input();
    let after_trigger = parent.seq_input();
    let result_slot = parent.data_input();
    let start_index = parent.component(Component::new(ComponentType::Start));
    let call = parent.component(
        Component::new(ComponentType::CallAction)
            .with_inputs(&[call_trigger])
            .with_target(child_index)
            .with_outputs(2),
    );
    let log_after = parent.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[after_trigger])
            .with_property(constant_expr(after)),
    );
    let log_result = parent.component(
        Component::new(ComponentType::Log)
            .with_inputs(&[result_slot])
            .with_property(Assembler::new().input(result_slot).finish()),
    );
    parent
        .connect(start_index, SEQOUT, call, call_trigger)
        .connect(call, SEQOUT, log_after, after_trigger)
        .connect(call, 1, log_result, result_slot);

    let mut child = FlowBuilder::new("child");
    let eval_trigger = child.seq_input();
    let value_slot = child.data_input();
    let end_trigger = child.seq_input();
    let child_start = child.component(Component::new(ComponentType::Start));
    let eval = child.component(
        Component::new(ComponentType::EvalExpr)
            .with_inputs(&[eval_trigger])
            .with_property(constant_expr(seven))
            .with_outputs(2),
    );
    let output = child.component(
        Component::new(ComponentType::Output)
            .with_inputs(&[value_slot])
            .with_target(1),
    );
    let end = child.component(Component::new(ComponentType::End).with_inputs(&[end_trigger]));
    child
        .connect(child_start, SEQOUT, eval, eval_trigger)
        .connect(eval, 1, output, value_slot)
        .connect(eval, SEQOUT, end, end_trigger);

    definition.flow(parent.build());
    definition.flow(child.build());
    definition.build()
}

#[test]
fn test_call_action_child_lifetime() {
    let (mut runtime, recorder) = recorded_runtime(call_definition());
    let root = start(&mut runtime);
    run_to_idle(&mut runtime, 50);

    let recorder = recorder.borrow();
    assert_eq!(recorder.created, 2);
    assert_eq!(recorder.destroyed, 1);
    assert!(recorder.logs.contains(&"after".to_string()));
    assert!(recorder.logs.contains(&"7".to_string()));

    let state = runtime.instance(root).unwrap();
    assert!(state.children().is_empty());
    assert_eq!(state.num_async_components(), 0);
    assert!(!runtime.is_stopped());
}

#[test]
fn test_call_action_marks_caller_async_while_child_runs() {
    let (mut runtime, _) = recorded_runtime(call_definition());
    let root = start(&mut runtime);
    runtime.tick(); // parent Start
    runtime.tick(); // CallAction creates the child

    let state = runtime.instance(root).unwrap();
    assert_eq!(state.children().len(), 1);
    assert!(state.is_async(1));
    let child = state.children()[0];
    assert!(runtime.instance(child).unwrap().is_action());
}

#[test]
fn test_end_in_root_flow_stops_runtime() {
    let mut definition = DefinitionBuilder::new();
    let mut flow = FlowBuilder::new("main");
    let trigger = flow.seq_input();
    let start_index = flow.component(Component::new(ComponentType::Start));
    let end = flow.component(Component::new(ComponentType::End).with_inputs(&[trigger]));
    flow.connect(start_index, SEQOUT, end, trigger);
    definition.flow(flow.build());

    let (mut runtime, recorder) = recorded_runtime(definition.build());
    start(&mut runtime);
    run_to_idle(&mut runtime, 10);

    assert!(runtime.is_stopped());
    assert!(runtime.root_instances().is_empty());
    assert_eq!(recorder.borrow().stop_script_calls, 1);
    assert!(runtime.last_error().is_none());
}
