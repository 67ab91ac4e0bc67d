use super::Step;
use crate::asset::Component;
use crate::error::FlowError;
use crate::runtime::hooks::LogEntry;
use crate::runtime::{InstanceId, Runtime};
use crate::value::Value;

/// Ends a called flow by resuming the caller, or stops the runtime from a root flow.
pub(super) fn execute_end(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let state = runtime.instance(instance).ok_or(FlowError::InvalidInstance)?;
    match state.parent().filter(|_| state.is_action()) {
        Some((parent, parent_component)) => {
            runtime.propagate_value_through_seqout(parent, parent_component)?;
            runtime.end_async_execution(parent, parent_component);
        }
        None => {
            log::info!("End component {} reached, stopping", index);
            runtime.hooks_mut().stop_script();
            runtime.stop();
        }
    }
    Ok(Step::Completed)
}

/// Forwards input 0 to an output of the calling component.
pub(super) fn execute_output(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    component: &Component,
) -> Result<Step, FlowError> {
    let malformed = |detail: &str| FlowError::MalformedComponent {
        flow: runtime.instance(instance).map_or(0, |s| s.flow_index()),
        component: index,
        detail: detail.to_string(),
    };
    let output = component
        .payload_u16()
        .ok_or_else(|| malformed("missing parent output index"))?;
    let slot = *component
        .inputs
        .first()
        .ok_or_else(|| malformed("missing value input"))?;
    let (parent, parent_component) = runtime
        .instance(instance)
        .and_then(|state| state.parent())
        .ok_or_else(|| malformed("output component outside of a called flow"))?;
    let value = runtime
        .input_value(instance, slot as usize)
        .cloned()
        .unwrap_or_default();

    runtime.propagate_value(parent, parent_component, output as usize, value)?;
    Ok(Step::Completed)
}

/// Starts the target flow as a child instance; the caller stays asynchronous until it ends.
pub(super) fn execute_call_action(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    component: &Component,
) -> Result<Step, FlowError> {
    let flow_index = component
        .payload_u16()
        .ok_or_else(|| FlowError::Raised("Invalid action flow index in CallAction".to_string()))?;
    runtime.call_action(instance, index, flow_index as usize)?;
    Ok(Step::Completed)
}

/// Evaluates property 0 and sends the result through output 1, then pulses seqout.
pub(super) fn execute_eval_expr(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let value = runtime.eval_property(instance, index, 0, &[])?;
    runtime.propagate_value(instance, index, 1, value)?;
    runtime.propagate_value_through_seqout(instance, index)?;
    Ok(Step::Completed)
}

/// Properties come in (destination, value) pairs, assigned in order.
pub(super) fn execute_set_variable(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    component: &Component,
) -> Result<Step, FlowError> {
    for pair in 0..component.properties.len() / 2 {
        let destination = runtime.eval_assignable_property(instance, index, pair * 2, &[])?;
        let value = runtime.eval_property(instance, index, pair * 2 + 1, &[])?;
        runtime.assign_value(instance, index, destination, value)?;
    }
    runtime.propagate_value_through_seqout(instance, index)?;
    Ok(Step::Completed)
}

/// Output 1 fires when property 0 is truthy, output 2 otherwise.
pub(super) fn execute_is_true(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let condition = runtime.eval_property(instance, index, 0, &[])?.to_bool();
    let output = if condition { 1 } else { 2 };
    runtime.propagate_value(instance, index, output, Value::Boolean(condition))?;
    Ok(Step::Completed)
}

pub(super) fn execute_log(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
) -> Result<Step, FlowError> {
    let message = runtime.eval_property(instance, index, 0, &[])?.to_text();
    runtime.log(instance, index, LogEntry::Info(message));
    runtime.propagate_value_through_seqout(instance, index)?;
    Ok(Step::Completed)
}
