use super::hooks::ValueLocation;
use super::queue::Task;
use super::{InstanceId, Runtime};
use crate::asset::{ComponentType, FlowDefinition, SEQOUT};
use crate::components::ExecutionState;
use crate::error::FlowError;
use crate::evaluator::resolve;
use crate::value::{SlotRef, Value};
use std::sync::Arc;

/// Narrows `value` to the kind of the value it replaces.
pub(crate) fn coerce(prior: &Value, value: Value) -> Value {
    match prior {
        Value::Boolean(_) => value,
        Value::Int32(_) => Value::Int32(value.to_int32()),
        Value::Float(_) => Value::Float(value.to_float()),
        Value::Double(_) => Value::Double(value.to_double()),
        Value::String(_) => Value::string(value.to_text()),
        _ => value,
    }
}

impl Runtime {
    /// Readiness for enqueueing: data inputs defined and, if the component has
    /// sequence inputs, at least one pulse present.
    pub(crate) fn is_component_ready(&self, instance: InstanceId, component: usize) -> bool {
        self.check_inputs(instance, component, true)
    }

    /// Readiness rechecked at dequeue: sequence pulses were consumed at enqueue,
    /// so only the non-optional data inputs are considered.
    pub(crate) fn data_inputs_ready(&self, instance: InstanceId, component: usize) -> bool {
        self.check_inputs(instance, component, false)
    }

    fn check_inputs(&self, instance: InstanceId, component: usize, require_pulse: bool) -> bool {
        let Some(state) = self.instances.get(instance) else {
            return false;
        };
        let flow = &self.definition.flows[state.flow_index];
        let Some(record) = flow.components.get(component) else {
            return false;
        };
        match record.component_type {
            ComponentType::CatchError => return !require_pulse,
            ComponentType::Start => return true,
            _ => {}
        }

        let mut has_seq_inputs = false;
        let mut pulse = false;
        for &slot in &record.inputs {
            let slot = slot as usize;
            let defined = state.values.get(slot).is_some_and(|v| !v.is_undefined());
            if flow.is_seq_input(slot) {
                has_seq_inputs = true;
                pulse |= defined;
            } else if !flow.is_optional_input(slot) && !defined {
                return false;
            }
        }
        !require_pulse || !has_seq_inputs || pulse
    }

    /// Enqueues the component if it is ready. Returns whether it was enqueued.
    pub(crate) fn ping_component(&mut self, instance: InstanceId, component: usize) -> bool {
        if self.stop_requested || !self.is_component_ready(instance, component) {
            return false;
        }
        let task = Task {
            instance,
            component,
            continuous: false,
        };
        match self.queue.push(task) {
            Ok(()) => true,
            Err(err) => {
                self.fatal_error(instance, component, &err.to_string());
                false
            }
        }
    }

    /// Clears every sequence input the component declares, notifying observers.
    pub(crate) fn reset_sequence_inputs(&mut self, instance: InstanceId, component: usize) {
        let definition = Arc::clone(&self.definition);
        let Some(state) = self.instances.get_mut(instance) else {
            return;
        };
        let flow = &definition.flows[state.flow_index];
        let Some(record) = flow.components.get(component) else {
            return;
        };
        for &slot in &record.inputs {
            let slot = slot as usize;
            if !flow.is_seq_input(slot) {
                continue;
            }
            if let Some(value) = state.values.get_mut(slot) {
                if !value.is_undefined() {
                    *value = Value::Undefined;
                    self.hooks
                        .on_value_changed(ValueLocation::Slot { instance, slot });
                }
            }
        }
    }

    /// Sends `value` along every connection leaving `output`.
    pub fn propagate_value(
        &mut self,
        instance: InstanceId,
        component: usize,
        output: usize,
        value: Value,
    ) -> Result<(), FlowError> {
        if self.stop_requested || self.stopped {
            return Ok(());
        }
        if self.executing == Some((instance, component)) {
            self.reset_sequence_inputs(instance, component);
        }

        let definition = Arc::clone(&self.definition);
        let flow_index = self
            .instances
            .get(instance)
            .ok_or(FlowError::InvalidInstance)?
            .flow_index;
        let record = component_record(&definition, flow_index, component)?;
        // An output the asset never declared has nothing wired to it.
        let Some(component_output) = record.outputs.get(output) else {
            return Ok(());
        };

        let value = resolve(&self.scope(), value)
            .map_err(|e| FlowError::evaluation("Failed to read propagated value", e))?;

        for connection in &component_output.connections {
            let slot = connection.target_input as usize;
            let Some(state) = self.instances.get_mut(instance) else {
                return Err(FlowError::InvalidInstance);
            };
            let Some(target) = state.values.get_mut(slot) else {
                log::warn!(
                    "Connection from component {} targets missing slot {}",
                    component,
                    slot
                );
                continue;
            };
            if *target != value {
                *target = value.clone();
                self.hooks
                    .on_value_changed(ValueLocation::Slot { instance, slot });
            }

            let enqueued = self.ping_component(instance, connection.target_component as usize);
            if enqueued && connection.seq_in {
                let reset = match self
                    .instances
                    .get_mut(instance)
                    .and_then(|state| state.values.get_mut(slot))
                {
                    Some(target) if !target.is_undefined() => {
                        *target = Value::Undefined;
                        true
                    }
                    _ => false,
                };
                if reset {
                    self.hooks
                        .on_value_changed(ValueLocation::Slot { instance, slot });
                }
            }
        }
        Ok(())
    }

    /// Pulses output 0 with null.
    pub fn propagate_value_through_seqout(
        &mut self,
        instance: InstanceId,
        component: usize,
    ) -> Result<(), FlowError> {
        self.propagate_value(instance, component, SEQOUT, Value::Null)
    }

    /// Writes `value` to a write target produced by assignable evaluation.
    pub fn assign_value(
        &mut self,
        instance: InstanceId,
        component: usize,
        destination: Value,
        value: Value,
    ) -> Result<(), FlowError> {
        let value = resolve(&self.scope(), value)
            .map_err(|e| FlowError::evaluation("Failed to read assigned value", e))?;

        match destination {
            Value::FlowOutput(output) => {
                self.propagate_value(instance, component, output as usize, value)
            }
            Value::NativeVariable(id) => self.hooks.set_native_variable(id, value),
            Value::ArrayElement { array, index } => {
                let prior = array
                    .borrow()
                    .elements
                    .get(index)
                    .cloned()
                    .ok_or(FlowError::AssignOutOfBounds)?;
                let coerced = coerce(&prior, value);
                if let Some(element) = array.borrow_mut().elements.get_mut(index) {
                    *element = coerced;
                }
                self.hooks
                    .on_value_changed(ValueLocation::ArrayElement { index });
                Ok(())
            }
            Value::Ref(SlotRef::Instance {
                instance: target,
                slot,
            }) => {
                let state = self
                    .instances
                    .get_mut(target)
                    .ok_or(FlowError::InvalidInstance)?;
                let stored = state
                    .values
                    .get_mut(slot)
                    .ok_or(FlowError::InvalidDestination("slot"))?;
                *stored = coerce(stored, value);
                self.hooks.on_value_changed(ValueLocation::Slot {
                    instance: target,
                    slot,
                });
                Ok(())
            }
            Value::Ref(SlotRef::Global(index)) => {
                let stored = self
                    .globals
                    .get_mut(index)
                    .ok_or(FlowError::InvalidDestination("global variable"))?;
                *stored = coerce(stored, value);
                self.hooks.on_value_changed(ValueLocation::Global(index));
                Ok(())
            }
            other => Err(FlowError::InvalidDestination(other.type_name())),
        }
    }

    /// Routes an error to the component's catch output, the nearest catch-error
    /// component, or stops the runtime.
    pub fn throw_error(&mut self, instance: InstanceId, component: usize, message: &str) {
        log::warn!("Error in component {}: {}", component, message);

        let definition = Arc::clone(&self.definition);
        let Some(state) = self.instances.get(instance) else {
            return;
        };
        let parent = state.parent;
        let Ok(record) = component_record(&definition, state.flow_index, component) else {
            self.fatal_error(instance, component, message);
            return;
        };

        if let Some(output) = record.error_catch_output {
            if let Err(err) =
                self.propagate_value(instance, component, output as usize, Value::string(message))
            {
                self.fatal_error(instance, component, &err.to_string());
            }
            return;
        }

        let search_from = if record.component_type == ComponentType::Error {
            parent.map(|(parent, _)| parent)
        } else {
            Some(instance)
        };
        let Some((catch_instance, catch_component)) =
            search_from.and_then(|from| self.find_catch_error(from))
        else {
            self.fatal_error(instance, component, message);
            return;
        };

        let mut current = Some(instance);
        while let Some(id) = current.filter(|id| *id != catch_instance) {
            let Some(state) = self.instances.get_mut(id) else {
                break;
            };
            state.error = true;
            current = state.parent.map(|(parent, _)| parent);
        }

        self.allocate_execution_state(
            catch_instance,
            catch_component,
            ExecutionState::CatchError {
                message: message.to_string(),
            },
        );
        let task = Task {
            instance: catch_instance,
            component: catch_component,
            continuous: false,
        };
        if let Err(err) = self.queue.push(task) {
            self.fatal_error(instance, component, &err.to_string());
        }
    }

    fn find_catch_error(&self, from: InstanceId) -> Option<(InstanceId, usize)> {
        let mut current = Some(from);
        while let Some(id) = current {
            let state = self.instances.get(id)?;
            let flow = &self.definition.flows[state.flow_index];
            if let Some(index) = flow
                .components
                .iter()
                .position(|c| c.component_type == ComponentType::CatchError)
            {
                return Some((id, index));
            }
            current = state.parent.map(|(parent, _)| parent);
        }
        None
    }

    /// Unrecoverable error: the instance is marked failed and the runtime stops.
    pub(crate) fn fatal_error(&mut self, instance: InstanceId, component: usize, message: &str) {
        log::error!("Fatal flow error in component {}: {}", component, message);
        if let Some(state) = self.instances.get_mut(instance) {
            state.error = true;
        }
        self.last_error = Some(message.to_string());
        self.hooks.on_flow_error(instance, component, message);
        self.hooks.stop_script();
        self.stop_requested = true;
    }
}

pub(crate) fn component_record(
    definition: &FlowDefinition,
    flow_index: usize,
    component: usize,
) -> Result<&crate::asset::Component, FlowError> {
    definition
        .flows
        .get(flow_index)
        .and_then(|flow| flow.components.get(component))
        .ok_or(FlowError::MalformedComponent {
            flow: flow_index,
            component,
            detail: "component does not exist".to_string(),
        })
}
