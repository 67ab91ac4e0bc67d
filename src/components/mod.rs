//! Execution steps of the built-in component types.
//!
//! A step either completes, or returns [`Step::Suspended`] and keeps its progress in
//! the component's [`ExecutionState`]; the scheduler then re-enqueues the pair as a
//! continuation task. Any error returned from a step releases the execution state and
//! is routed through [`Runtime::throw_error`].

mod basic;
mod control;
pub mod scpi;

use crate::asset::{Component, ComponentType};
use crate::error::FlowError;
use crate::runtime::{InstanceId, Runtime};
use std::time::Instant;

pub use control::LoopState;
pub use scpi::{ScpiProgram, ScpiState, parse_scpi_result};

/// Outcome of one execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Completed,
    /// Not finished; resume on a later tick.
    Suspended,
}

/// Progress a component keeps while it is mid-execution.
#[derive(Debug)]
pub enum ExecutionState {
    Scpi(ScpiState),
    Loop(LoopState),
    Delay { wake_at: Instant },
    CatchError { message: String },
    /// Opaque state of a host-implemented component.
    Host(i32),
}

impl ExecutionState {
    /// Loop state persists between iterations without pinning its instance.
    pub fn keeps_instance_alive(&self) -> bool {
        !matches!(self, ExecutionState::Loop(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionState::Scpi(_) => "scpi",
            ExecutionState::Loop(_) => "loop",
            ExecutionState::Delay { .. } => "delay",
            ExecutionState::CatchError { .. } => "catch_error",
            ExecutionState::Host(_) => "host",
        }
    }
}

/// A component type implemented by the hosting application.
pub trait HostComponent {
    fn execute(
        &self,
        runtime: &mut Runtime,
        instance: InstanceId,
        component: usize,
    ) -> Result<Step, FlowError>;
}

impl<F> HostComponent for F
where
    F: Fn(&mut Runtime, InstanceId, usize) -> Result<Step, FlowError>,
{
    fn execute(
        &self,
        runtime: &mut Runtime,
        instance: InstanceId,
        component: usize,
    ) -> Result<Step, FlowError> {
        self(runtime, instance, component)
    }
}

/// Runs one step of `component`, dispatching on its type.
pub(crate) fn execute(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    component: &Component,
) -> Result<Step, FlowError> {
    match component.component_type {
        ComponentType::Start | ComponentType::Noop => {
            runtime.propagate_value_through_seqout(instance, index)?;
            Ok(Step::Completed)
        }
        ComponentType::End => basic::execute_end(runtime, instance, index),
        ComponentType::Output => basic::execute_output(runtime, instance, index, component),
        ComponentType::CallAction => basic::execute_call_action(runtime, instance, index, component),
        ComponentType::EvalExpr | ComponentType::Constant => {
            basic::execute_eval_expr(runtime, instance, index)
        }
        ComponentType::SetVariable => basic::execute_set_variable(runtime, instance, index, component),
        ComponentType::IsTrue => basic::execute_is_true(runtime, instance, index),
        ComponentType::Log => basic::execute_log(runtime, instance, index),
        ComponentType::Error => {
            let message = runtime.eval_property(instance, index, 0, &[])?;
            Err(FlowError::Raised(message.to_text()))
        }
        ComponentType::CatchError => control::execute_catch_error(runtime, instance, index),
        ComponentType::Delay => control::execute_delay(runtime, instance, index),
        ComponentType::Loop => control::execute_loop(runtime, instance, index),
        ComponentType::Scpi => scpi::execute(runtime, instance, index, component),
        ComponentType::Host(code) => {
            let handler = runtime
                .host_component(code)
                .ok_or(FlowError::UnknownComponent(code))?;
            handler.execute(runtime, instance, index)
        }
    }
}
