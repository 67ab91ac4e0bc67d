use super::{ExecutionState, Step};
use crate::bytecode::opcode::Operation;
use crate::error::FlowError;
use crate::evaluator::arithmetic;
use crate::runtime::{InstanceId, Runtime};
use crate::value::Value;
use std::time::{Duration, Instant};

const LOOP_PROPERTY_VARIABLE: usize = 0;
const LOOP_PROPERTY_FROM: usize = 1;
const LOOP_PROPERTY_TO: usize = 2;
const LOOP_PROPERTY_STEP: usize = 3;
const LOOP_OUTPUT_DONE: usize = 1;

#[derive(Debug)]
pub struct LoopState {
    destination: Value,
    to: Value,
    step: Value,
}

/// Delivers the message stored by `throw_error` through output 1, then pulses seqout.
pub(super) fn execute_catch_error(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let Some(ExecutionState::CatchError { message }) = runtime.take_execution_state(instance, index)
    else {
        return Ok(Step::Completed);
    };
    runtime.settle_execution_state(instance, index, true, None);
    runtime.propagate_value(instance, index, 1, Value::string(message))?;
    runtime.propagate_value_through_seqout(instance, index)?;
    Ok(Step::Completed)
}

/// Waits property 0 milliseconds without blocking the scheduler.
pub(super) fn execute_delay(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let wake_at = match runtime.take_execution_state(instance, index) {
        Some(ExecutionState::Delay { wake_at }) => wake_at,
        _ => {
            let millis = runtime.eval_property(instance, index, 0, &[])?.to_double();
            let wake_at = Instant::now() + Duration::from_secs_f64(millis.max(0.0) / 1000.0);
            runtime.settle_execution_state(
                instance,
                index,
                false,
                Some(ExecutionState::Delay { wake_at }),
            );
            return Ok(Step::Suspended);
        }
    };

    if Instant::now() < wake_at {
        runtime.settle_execution_state(instance, index, true, Some(ExecutionState::Delay { wake_at }));
        return Ok(Step::Suspended);
    }
    runtime.settle_execution_state(instance, index, true, None);
    runtime.propagate_value_through_seqout(instance, index)?;
    Ok(Step::Completed)
}

/// Counts the variable from `from` up to `to` by `step`. Every iteration pulses
/// seqout; reaching `to` releases the state and fires the done output.
pub(super) fn execute_loop(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let Some(ExecutionState::Loop(state)) = runtime.take_execution_state(instance, index) else {
        let destination =
            runtime.eval_assignable_property(instance, index, LOOP_PROPERTY_VARIABLE, &[])?;
        let from = runtime.eval_property(instance, index, LOOP_PROPERTY_FROM, &[])?;
        let to = runtime.eval_property(instance, index, LOOP_PROPERTY_TO, &[])?;
        let step = runtime.eval_property(instance, index, LOOP_PROPERTY_STEP, &[])?;

        runtime.assign_value(instance, index, destination.clone(), from)?;
        runtime.settle_execution_state(
            instance,
            index,
            false,
            Some(ExecutionState::Loop(LoopState {
                destination,
                to,
                step,
            })),
        );
        runtime.propagate_value_through_seqout(instance, index)?;
        return Ok(Step::Completed);
    };

    let current = runtime.read_value(state.destination.clone())?;
    let next = arithmetic(Operation::Add, &current, &state.step)
        .map_err(|e| FlowError::evaluation("Failed to advance loop variable", e))?;

    if next.to_double() >= state.to.to_double() {
        runtime.settle_execution_state(instance, index, true, None);
        runtime.propagate_value(instance, index, LOOP_OUTPUT_DONE, Value::Null)?;
    } else {
        runtime.assign_value(instance, index, state.destination.clone(), next)?;
        runtime.settle_execution_state(instance, index, true, Some(ExecutionState::Loop(state)));
        runtime.propagate_value_through_seqout(instance, index)?;
    }
    Ok(Step::Completed)
}
