//! Common test utilities for building flow definitions and observing a runtime.
use benchflow::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Everything the recording hooks have seen, shared with the test body.
#[derive(Debug, Default)]
pub struct Recorder {
    pub logs: Vec<String>,
    pub scpi_traffic: Vec<LogEntry>,
    pub errors: Vec<String>,
    pub created: usize,
    pub destroyed: usize,
    pub stop_script_calls: usize,
    pub value_changes: Vec<ValueLocation>,
    pub execution_state_changes: Vec<(InstanceId, usize)>,
    pub native_writes: Vec<(u32, Value)>,
    pub debugger_messages: usize,
}

/// Hooks that record every callback into a shared `Recorder`.
pub struct RecordingHooks {
    pub recorder: Rc<RefCell<Recorder>>,
    pub running: bool,
    pub native_value: Value,
}

impl RuntimeHooks for RecordingHooks {
    fn is_flow_running(&self) -> bool {
        self.running
    }

    fn get_native_variable(&self, _id: u32) -> Value {
        self.native_value.clone()
    }

    fn set_native_variable(&mut self, id: u32, value: Value) -> Result<(), FlowError> {
        self.recorder.borrow_mut().native_writes.push((id, value));
        Ok(())
    }

    fn on_value_changed(&mut self, location: ValueLocation) {
        self.recorder.borrow_mut().value_changes.push(location);
    }

    fn on_flow_state_created(&mut self, _instance: InstanceId, _flow_index: usize) {
        self.recorder.borrow_mut().created += 1;
    }

    fn on_flow_state_destroyed(&mut self, _instance: InstanceId) {
        self.recorder.borrow_mut().destroyed += 1;
    }

    fn on_component_execution_state_changed(&mut self, instance: InstanceId, component: usize) {
        self.recorder
            .borrow_mut()
            .execution_state_changes
            .push((instance, component));
    }

    fn on_flow_error(&mut self, _instance: InstanceId, _component: usize, message: &str) {
        self.recorder.borrow_mut().errors.push(message.to_string());
    }

    fn on_log(&mut self, _instance: InstanceId, _component: usize, entry: LogEntry) {
        let mut recorder = self.recorder.borrow_mut();
        match entry {
            LogEntry::Info(text) => recorder.logs.push(text),
            other => recorder.scpi_traffic.push(other),
        }
    }

    fn stop_script(&mut self) {
        self.recorder.borrow_mut().stop_script_calls += 1;
    }

    fn finish_to_debugger_message(&mut self) {
        self.recorder.borrow_mut().debugger_messages += 1;
    }
}

/// Recording hooks plus the handle used to inspect them.
#[allow(dead_code)]
pub fn recording_hooks() -> (RecordingHooks, Rc<RefCell<Recorder>>) {
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let hooks = RecordingHooks {
        recorder: Rc::clone(&recorder),
        running: true,
        native_value: Value::Undefined,
    };
    (hooks, recorder)
}

/// A runtime over `definition` with recording hooks and default limits.
#[allow(dead_code)]
pub fn recorded_runtime(definition: FlowDefinition) -> (Runtime, Rc<RefCell<Recorder>>) {
    let (hooks, recorder) = recording_hooks();
    let runtime = Runtime::builder(Arc::new(definition))
        .with_hooks(hooks)
        .build()
        .unwrap();
    (runtime, recorder)
}

/// Ticks until the queue drains, the runtime stops, or `max_ticks` pass.
#[allow(dead_code)]
pub fn run_to_idle(runtime: &mut Runtime, max_ticks: usize) {
    runtime.run_until_idle(max_ticks);
}

/// A definition holding one flow with a single data input (slot 0) and one
/// `Noop` component reading it. Property 0 of that component is `instructions`.
///
/// Constant 2 is `Int32(2)`; local 0 is `[1, 2, 3]`.
#[allow(dead_code)]
pub fn expression_definition(instructions: Vec<u8>) -> FlowDefinition {
    let mut definition = DefinitionBuilder::new();
    definition.constant(2);
    definition.global(Literal::Int32(100));

    let mut flow = FlowBuilder::new("expression");
    let input = flow.data_input();
    flow.local(Literal::Array(vec![
        Literal::Int32(1),
        Literal::Int32(2),
        Literal::Int32(3),
    ]));
    flow.component(
        Component::new(ComponentType::Noop)
            .with_inputs(&[input])
            .with_property(instructions),
    );
    definition.flow(flow.build());
    definition.build()
}

/// Starts flow 0 and returns the root instance.
#[allow(dead_code)]
pub fn start(runtime: &mut Runtime) -> InstanceId {
    runtime.start().unwrap()
}

/// Property stream producing constant `index`.
#[allow(dead_code)]
pub fn constant_expr(index: u16) -> Vec<u8> {
    Assembler::new().constant(index).finish()
}

#[allow(dead_code)]
pub fn local_expr(index: u16) -> Vec<u8> {
    Assembler::new().local(index).finish()
}
