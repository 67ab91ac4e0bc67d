use super::InstanceId;
use crate::error::FlowError;
use crate::value::Value;

/// Storage location whose value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLocation {
    Slot { instance: InstanceId, slot: usize },
    Global(usize),
    ArrayElement { index: usize },
}

/// Messages the runtime emits towards the host's log or debugger console.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Info(String),
    ScpiCommand(String),
    ScpiQuery(String),
    ScpiQueryResult(String),
}

/// Callbacks into the surrounding application. Every method has a default.
pub trait RuntimeHooks {
    /// Consulted at the start of every tick; returning `false` skips the tick.
    fn is_flow_running(&self) -> bool {
        true
    }

    /// Turns a non-zero instrument status code into operator-facing text.
    fn translate_scpi_error(&self, code: i32) -> String {
        format!("Error {}", code)
    }

    fn get_native_variable(&self, _id: u32) -> Value {
        Value::Undefined
    }

    fn set_native_variable(&mut self, id: u32, _value: Value) -> Result<(), FlowError> {
        Err(FlowError::Raised(format!("Native variable {} is read-only", id)))
    }

    fn on_value_changed(&mut self, _location: ValueLocation) {}

    fn on_flow_state_created(&mut self, _instance: InstanceId, _flow_index: usize) {}

    fn on_flow_state_destroyed(&mut self, _instance: InstanceId) {}

    fn on_component_execution_state_changed(&mut self, _instance: InstanceId, _component: usize) {}

    fn on_component_async_state_changed(&mut self, _instance: InstanceId, _component: usize) {}

    fn on_flow_error(&mut self, _instance: InstanceId, component: usize, message: &str) {
        log::error!("Unhandled flow error in component {}: {}", component, message);
    }

    fn on_log(&mut self, _instance: InstanceId, component: usize, entry: LogEntry) {
        log::info!("[component {}] {:?}", component, entry);
    }

    /// Asks the host to stop the automation subsystem after a fatal error.
    fn stop_script(&mut self) {}

    /// Called once at the end of every tick.
    fn finish_to_debugger_message(&mut self) {}
}

/// Hooks that only forward to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RuntimeHooks for DefaultHooks {}
