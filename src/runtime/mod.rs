//! The flow scheduler and the host-facing surface of a running program.
//!
//! A [`Runtime`] owns every live flow instance, the bounded execution queue and
//! the evaluator's operand stack. Hosts drive it by calling [`Runtime::tick`]
//! from one cooperative thread of control; nothing inside is shared across
//! threads except the SCPI reply channels.

pub mod hooks;
pub mod instance;
mod propagation;
pub mod queue;

pub use instance::{FlowState, InstanceArena, InstanceId};

use crate::asset::FlowDefinition;
use crate::components::{self, ExecutionState, HostComponent, Step};
use crate::config::RuntimeConfig;
use crate::error::{AssetError, EvalError, FlowError};
use crate::evaluator::{EvalScope, EvalStack, Evaluator, resolve};
use crate::scpi::{ScpiDispatch, ScpiRequest};
use crate::value::{Literal, Value};
use ahash::AHashMap;
use hooks::{DefaultHooks, LogEntry, RuntimeHooks, ValueLocation};
use propagation::component_record;
use queue::{ExecutionQueue, Task};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Debugger gate consulted before every task while a debugger is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    Resumed,
    Paused,
    /// Run exactly one task, then pause.
    SingleStep,
}

/// What one call to [`Runtime::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    /// Tasks dropped because their instance no longer exists.
    pub discarded: usize,
    /// Tasks left in the queue when the tick returned.
    pub remaining: usize,
    pub budget_exhausted: bool,
    /// The head task was no longer ready and blocked the rest of the tick.
    pub stalled: bool,
    pub paused: bool,
    pub stopped: bool,
}

pub struct RuntimeBuilder {
    definition: Arc<FlowDefinition>,
    config: RuntimeConfig,
    hooks: Box<dyn RuntimeHooks>,
    scpi: Option<Box<dyn ScpiDispatch>>,
    host_components: AHashMap<u16, Rc<dyn HostComponent>>,
}

impl RuntimeBuilder {
    pub fn new(definition: Arc<FlowDefinition>) -> Self {
        Self {
            definition,
            config: RuntimeConfig::default(),
            hooks: Box::new(DefaultHooks),
            scpi: None,
            host_components: AHashMap::new(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hooks(mut self, hooks: impl RuntimeHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn with_scpi(mut self, dispatch: impl ScpiDispatch + 'static) -> Self {
        self.scpi = Some(Box::new(dispatch));
        self
    }

    /// Registers the handler executed for components of type `ComponentType::Host(code)`.
    pub fn with_host_component(mut self, code: u16, handler: impl HostComponent + 'static) -> Self {
        self.host_components.insert(code, Rc::new(handler));
        self
    }

    pub fn build(self) -> Result<Runtime, AssetError> {
        self.definition.validate()?;
        let globals = self
            .definition
            .global_variables
            .iter()
            .map(Literal::to_value)
            .collect();

        log::debug!(
            "Runtime built: {} flows, queue capacity {}, stack capacity {}",
            self.definition.flows.len(),
            self.config.queue_capacity,
            self.config.stack_capacity
        );

        Ok(Runtime {
            queue: ExecutionQueue::new(self.config.queue_capacity),
            stack: EvalStack::new(self.config.stack_capacity),
            definition: self.definition,
            config: self.config,
            instances: InstanceArena::new(),
            globals,
            hooks: self.hooks,
            scpi: self.scpi,
            host_components: self.host_components,
            debugger: None,
            skip_breakpoint: None,
            executing: None,
            stop_requested: false,
            stopped: true,
            last_error: None,
        })
    }
}

pub struct Runtime {
    definition: Arc<FlowDefinition>,
    config: RuntimeConfig,
    instances: InstanceArena,
    globals: Vec<Value>,
    queue: ExecutionQueue,
    stack: EvalStack,
    hooks: Box<dyn RuntimeHooks>,
    scpi: Option<Box<dyn ScpiDispatch>>,
    host_components: AHashMap<u16, Rc<dyn HostComponent>>,
    debugger: Option<DebuggerState>,
    skip_breakpoint: Option<(InstanceId, usize)>,
    /// The (instance, component) whose step is currently running.
    executing: Option<(InstanceId, usize)>,
    stop_requested: bool,
    stopped: bool,
    last_error: Option<String>,
}

impl Runtime {
    pub fn builder(definition: Arc<FlowDefinition>) -> RuntimeBuilder {
        RuntimeBuilder::new(definition)
    }

    /// A runtime with default limits and hooks and no SCPI dispatcher.
    pub fn new(definition: Arc<FlowDefinition>) -> Result<Self, AssetError> {
        RuntimeBuilder::new(definition).build()
    }

    // --- Lifecycle ---

    /// Starts flow 0 as the root instance.
    pub fn start(&mut self) -> Result<InstanceId, FlowError> {
        self.start_flow(0)
    }

    pub fn start_flow(&mut self, flow_index: usize) -> Result<InstanceId, FlowError> {
        self.stopped = false;
        self.stop_requested = false;
        self.last_error = None;
        log::info!("Starting flow {}", flow_index);
        self.create_flow_state(flow_index, None, false)
    }

    /// Requests a stop; the instance forest is destroyed at the next tick boundary.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Destroys every instance and empties the queue immediately.
    pub fn shutdown(&mut self) {
        let roots = self.instances.roots().to_vec();
        for root in roots {
            self.free_flow_state(root);
        }
        self.queue.clear();
        self.stack.reset();
        self.stop_requested = false;
        self.stopped = true;
        log::info!("Runtime stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped || self.stop_requested
    }

    // --- Scheduling ---

    /// Runs queued tasks until the queue snapshot taken at entry is drained, the
    /// tick budget elapses, a stop is requested, or the head task cannot run.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if !self.stop_requested && !self.stopped && self.hooks.is_flow_running() {
            let started = Instant::now();
            let budget = self.config.tick_budget();
            let snapshot = self.queue.len();
            let mut processed = 0;

            while processed < snapshot && !self.stop_requested {
                if started.elapsed() >= budget {
                    report.budget_exhausted = true;
                    break;
                }
                let Some(task) = self.queue.peek().copied() else {
                    break;
                };

                if !self.instances.contains(task.instance) {
                    self.queue.pop();
                    processed += 1;
                    report.discarded += 1;
                    continue;
                }
                if !task.continuous && !self.data_inputs_ready(task.instance, task.component) {
                    log::debug!(
                        "Component {} no longer ready, ending tick",
                        task.component
                    );
                    report.stalled = true;
                    break;
                }
                if self.debugger_blocks(&task) {
                    report.paused = true;
                    break;
                }

                self.queue.pop();
                processed += 1;
                self.run_component(task);
                report.executed += 1;

                if self.debugger == Some(DebuggerState::SingleStep) {
                    self.debugger = Some(DebuggerState::Paused);
                    report.paused = true;
                    break;
                }
            }
        }

        if self.stop_requested {
            self.shutdown();
        }
        report.stopped = self.stopped;
        report.remaining = self.queue.len();
        self.hooks.finish_to_debugger_message();
        report
    }

    /// Ticks until the queue is empty or the runtime stops. Returns the tick count.
    pub fn run_until_idle(&mut self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && !self.stopped && !self.queue.is_empty() {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    fn run_component(&mut self, task: Task) {
        let Task {
            instance,
            component,
            ..
        } = task;
        let definition = Arc::clone(&self.definition);
        let Some(flow_index) = self.instances.get(instance).map(|state| state.flow_index) else {
            return;
        };
        let record = match component_record(&definition, flow_index, component) {
            Ok(record) => record,
            Err(err) => {
                self.fatal_error(instance, component, &err.to_string());
                return;
            }
        };

        // A failed instance only drains its queued tasks until it can be freed.
        if self.instances.get(instance).is_some_and(FlowState::has_error) {
            log::debug!(
                "Skipping component {} of failed instance {:?}",
                component,
                instance
            );
            self.deallocate_execution_state(instance, component);
            self.reset_sequence_inputs(instance, component);
            if self.can_free_flow_state(instance) {
                self.free_flow_state(instance);
            }
            return;
        }

        self.executing = Some((instance, component));
        let result = components::execute(self, instance, component, record);
        self.executing = None;

        match result {
            Ok(Step::Completed) => {}
            Ok(Step::Suspended) => {
                let continuation = Task {
                    instance,
                    component,
                    continuous: true,
                };
                if let Err(err) = self.queue.push(continuation) {
                    self.deallocate_execution_state(instance, component);
                    self.fatal_error(instance, component, &err.to_string());
                }
            }
            Err(err) => {
                self.deallocate_execution_state(instance, component);
                self.throw_error(instance, component, &err.to_string());
            }
        }

        self.reset_sequence_inputs(instance, component);
        if self.can_free_flow_state(instance) {
            self.free_flow_state(instance);
        }
    }

    fn debugger_blocks(&mut self, task: &Task) -> bool {
        match self.debugger {
            None | Some(DebuggerState::SingleStep) => false,
            Some(DebuggerState::Paused) => true,
            Some(DebuggerState::Resumed) => {
                let pair = (task.instance, task.component);
                if self.skip_breakpoint == Some(pair) {
                    self.skip_breakpoint = None;
                    return false;
                }
                let breakpoint = self
                    .instances
                    .get(task.instance)
                    .and_then(|state| {
                        component_record(&self.definition, state.flow_index, task.component).ok()
                    })
                    .is_some_and(|record| record.breakpoint);
                if breakpoint && !task.continuous {
                    log::info!("Breakpoint hit at component {}", task.component);
                    self.debugger = Some(DebuggerState::Paused);
                    self.skip_breakpoint = Some(pair);
                    return true;
                }
                false
            }
        }
    }

    // --- Debugger ---

    pub fn attach_debugger(&mut self) {
        self.debugger = Some(DebuggerState::Resumed);
    }

    pub fn detach_debugger(&mut self) {
        self.debugger = None;
        self.skip_breakpoint = None;
    }

    pub fn debugger_state(&self) -> Option<DebuggerState> {
        self.debugger
    }

    pub fn pause(&mut self) {
        if self.debugger.is_some() {
            self.debugger = Some(DebuggerState::Paused);
        }
    }

    pub fn resume(&mut self) {
        if self.debugger.is_some() {
            self.debugger = Some(DebuggerState::Resumed);
        }
    }

    pub fn single_step(&mut self) {
        if self.debugger.is_some() {
            self.debugger = Some(DebuggerState::SingleStep);
        }
    }

    // --- Evaluation ---

    pub(crate) fn scope(&self) -> EvalScope<'_> {
        EvalScope {
            definition: &self.definition,
            instances: &self.instances,
            globals: &self.globals,
            hooks: &*self.hooks,
        }
    }

    fn run_evaluator(
        &mut self,
        instance: InstanceId,
        instructions: &[u8],
        iterators: &[i32],
        assignable: bool,
    ) -> Result<(Value, usize), EvalError> {
        let scope = EvalScope {
            definition: &self.definition,
            instances: &self.instances,
            globals: &self.globals,
            hooks: &*self.hooks,
        };
        let mut evaluator = Evaluator::new(scope, &mut self.stack, instance, iterators);
        if assignable {
            evaluator.evaluate_assignable(instructions)
        } else {
            evaluator.evaluate(instructions)
        }
    }

    /// Evaluates a raw instruction stream. Returns the value and the bytes consumed.
    pub(crate) fn evaluate_instructions(
        &mut self,
        instance: InstanceId,
        instructions: &[u8],
    ) -> Result<(Value, usize), EvalError> {
        self.run_evaluator(instance, instructions, &[], false)
    }

    pub(crate) fn evaluate_assignable_instructions(
        &mut self,
        instance: InstanceId,
        instructions: &[u8],
    ) -> Result<(Value, usize), EvalError> {
        self.run_evaluator(instance, instructions, &[], true)
    }

    fn eval_property_as(
        &mut self,
        instance: InstanceId,
        component: usize,
        property: usize,
        iterators: &[i32],
        assignable: bool,
    ) -> Result<Value, FlowError> {
        let definition = Arc::clone(&self.definition);
        let flow_index = self
            .instances
            .get(instance)
            .ok_or(FlowError::InvalidInstance)?
            .flow_index;
        let record = component_record(&definition, flow_index, component)?;
        let instructions = &record
            .properties
            .get(property)
            .ok_or_else(|| FlowError::MalformedComponent {
                flow: flow_index,
                component,
                detail: format!("property {} does not exist", property),
            })?
            .instructions;

        self.run_evaluator(instance, instructions, iterators, assignable)
            .map(|(value, _)| value)
            .map_err(|e| {
                FlowError::evaluation(
                    format!(
                        "Failed to evaluate property #{} in component #{}",
                        property, component
                    ),
                    e,
                )
            })
    }

    /// Evaluates property `property` of a component to a plain value.
    pub fn eval_property(
        &mut self,
        instance: InstanceId,
        component: usize,
        property: usize,
        iterators: &[i32],
    ) -> Result<Value, FlowError> {
        self.eval_property_as(instance, component, property, iterators, false)
    }

    /// Evaluates property `property` of a component to a write target.
    pub fn eval_assignable_property(
        &mut self,
        instance: InstanceId,
        component: usize,
        property: usize,
        iterators: &[i32],
    ) -> Result<Value, FlowError> {
        self.eval_property_as(instance, component, property, iterators, true)
    }

    /// Writes `value` to the target computed by an assignable property.
    pub fn assign_property(
        &mut self,
        instance: InstanceId,
        component: usize,
        property: usize,
        iterators: &[i32],
        value: Value,
    ) -> Result<(), FlowError> {
        let destination = self.eval_assignable_property(instance, component, property, iterators)?;
        self.assign_value(instance, component, destination, value)
    }

    /// Reads through a write target; plain values pass through.
    pub fn read_value(&self, value: Value) -> Result<Value, FlowError> {
        resolve(&self.scope(), value).map_err(|e| FlowError::evaluation("Failed to read value", e))
    }

    // --- Instances and storage ---

    pub fn instance(&self, id: InstanceId) -> Option<&FlowState> {
        self.instances.get(id)
    }

    pub fn instances(&self) -> &InstanceArena {
        &self.instances
    }

    pub fn root_instances(&self) -> &[InstanceId] {
        self.instances.roots()
    }

    pub fn input_value(&self, instance: InstanceId, slot: usize) -> Option<&Value> {
        self.instances.get(instance).and_then(|state| state.input(slot))
    }

    pub fn clear_input_value(&mut self, instance: InstanceId, slot: usize) {
        let Some(value) = self
            .instances
            .get_mut(instance)
            .filter(|state| slot < state.input_count)
            .and_then(|state| state.values.get_mut(slot))
        else {
            return;
        };
        if !value.is_undefined() {
            *value = Value::Undefined;
            self.hooks
                .on_value_changed(ValueLocation::Slot { instance, slot });
        }
    }

    /// Writes a flow input from outside the graph and pings every component reading it.
    pub fn set_input_value(
        &mut self,
        instance: InstanceId,
        slot: usize,
        value: Value,
    ) -> Result<(), FlowError> {
        let definition = Arc::clone(&self.definition);
        let state = self
            .instances
            .get_mut(instance)
            .ok_or(FlowError::InvalidInstance)?;
        let flow = &definition.flows[state.flow_index];
        let stored = state
            .values
            .get_mut(slot)
            .filter(|_| slot < flow.input_count())
            .ok_or(FlowError::InvalidDestination("input slot"))?;
        *stored = value;
        self.hooks
            .on_value_changed(ValueLocation::Slot { instance, slot });

        let readers = flow
            .components
            .iter()
            .enumerate()
            .filter(|(_, component)| component.inputs.contains(&(slot as u16)))
            .map(|(index, _)| index);
        for component in readers {
            self.ping_component(instance, component);
        }
        Ok(())
    }

    pub fn global_variable(&self, index: usize) -> Option<&Value> {
        self.globals.get(index)
    }

    pub fn set_global_variable(&mut self, index: usize, value: Value) -> Result<(), FlowError> {
        let slot = self
            .globals
            .get_mut(index)
            .ok_or(FlowError::InvalidDestination("global variable"))?;
        *slot = value;
        self.hooks.on_value_changed(ValueLocation::Global(index));
        Ok(())
    }

    /// Stores (or with `None` releases) the opaque state of a host-implemented component.
    pub fn set_host_execution_state(
        &mut self,
        instance: InstanceId,
        component: usize,
        state: Option<i32>,
    ) {
        match state {
            Some(value) => {
                self.allocate_execution_state(instance, component, ExecutionState::Host(value))
            }
            None => self.deallocate_execution_state(instance, component),
        }
    }

    pub fn host_execution_state(&self, instance: InstanceId, component: usize) -> Option<i32> {
        match self.execution_state(instance, component) {
            Some(ExecutionState::Host(value)) => Some(*value),
            _ => None,
        }
    }

    /// Starts `flow_index` as a called flow of `(instance, component)`. The caller
    /// stays asynchronous until the child finishes; a child with nothing to run is
    /// released at once and the caller continues through its seqout.
    pub fn call_action(
        &mut self,
        instance: InstanceId,
        component: usize,
        flow_index: usize,
    ) -> Result<InstanceId, FlowError> {
        let child = self.create_flow_state(flow_index, Some((instance, component)), true)?;
        self.start_async_execution(instance, component);

        if self.can_free_flow_state(child) {
            self.free_flow_state(child);
            self.propagate_value_through_seqout(instance, component)?;
        }
        Ok(child)
    }

    // --- Collaborators ---

    pub fn hooks(&self) -> &dyn RuntimeHooks {
        &*self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut dyn RuntimeHooks {
        &mut *self.hooks
    }

    pub fn log(&mut self, instance: InstanceId, component: usize, entry: LogEntry) {
        self.hooks.on_log(instance, component, entry);
    }

    pub(crate) fn dispatch_scpi(&mut self, request: ScpiRequest) -> Result<(), FlowError> {
        match self.scpi.as_mut() {
            Some(dispatch) => dispatch.dispatch(request),
            None => Err(FlowError::Dispatch(
                "no SCPI dispatcher configured".to_string(),
            )),
        }
    }

    pub(crate) fn host_component(&self, code: u16) -> Option<Rc<dyn HostComponent>> {
        self.host_components.get(&code).cloned()
    }

    // --- Introspection ---

    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.definition
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn evaluation_stack(&self) -> &EvalStack {
        &self.stack
    }

    /// Message of the most recent fatal error.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
