use super::{
    Component, ComponentOutput, ComponentType, Connection, Flow, FlowDefinition, Property,
    INPUT_FLAG_OPTIONAL, INPUT_FLAG_SEQ,
};
use crate::value::Literal;

/// Assembles a `FlowDefinition` in code, keeping the reserved constants in place.
#[derive(Debug, Clone, Default)]
pub struct DefinitionBuilder {
    definition: FlowDefinition,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a constant and returns its index.
    pub fn constant(&mut self, literal: impl Into<Literal>) -> u16 {
        self.definition.constants.push(literal.into());
        (self.definition.constants.len() - 1) as u16
    }

    /// Appends a global variable and returns its index.
    pub fn global(&mut self, literal: impl Into<Literal>) -> u16 {
        self.definition.global_variables.push(literal.into());
        (self.definition.global_variables.len() - 1) as u16
    }

    /// Reserves a flow index so that call-action components can target it.
    pub fn next_flow_index(&self) -> usize {
        self.definition.flows.len()
    }

    pub fn flow(&mut self, flow: Flow) -> usize {
        self.definition.flows.push(flow);
        self.definition.flows.len() - 1
    }

    pub fn build(self) -> FlowDefinition {
        self.definition
    }
}

/// Assembles one `Flow`: slots, components and wiring.
#[derive(Debug, Clone, Default)]
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            flow: Flow {
                name: name.to_string(),
                ..Flow::default()
            },
        }
    }

    pub fn input(&mut self, flags: u8) -> u16 {
        self.flow.component_inputs.push(flags);
        (self.flow.component_inputs.len() - 1) as u16
    }

    pub fn seq_input(&mut self) -> u16 {
        self.input(INPUT_FLAG_SEQ)
    }

    pub fn data_input(&mut self) -> u16 {
        self.input(0)
    }

    pub fn optional_input(&mut self) -> u16 {
        self.input(INPUT_FLAG_OPTIONAL)
    }

    /// Declares a local variable and returns its operand for `Assembler::local`.
    pub fn local(&mut self, literal: impl Into<Literal>) -> u16 {
        self.flow.local_variables.push(literal.into());
        (self.flow.local_variables.len() - 1) as u16
    }

    pub fn component(&mut self, component: Component) -> usize {
        self.flow.components.push(component);
        self.flow.components.len() - 1
    }

    /// Wires `output` of component `from` into input `slot`, read by component `to`.
    pub fn connect(&mut self, from: usize, output: usize, to: usize, slot: u16) -> &mut Self {
        let seq_in = self.flow.is_seq_input(slot as usize);
        if let Some(component) = self.flow.components.get_mut(from) {
            if component.outputs.len() <= output {
                component
                    .outputs
                    .resize_with(output + 1, ComponentOutput::default);
            }
            component.outputs[output].connections.push(Connection {
                target_component: to as u16,
                target_input: slot,
                seq_in,
            });
        }
        self
    }

    pub fn build(self) -> Flow {
        self.flow
    }
}

impl Component {
    /// A component with a single sequence output and nothing else.
    pub fn new(component_type: ComponentType) -> Self {
        Self {
            component_type,
            breakpoint: false,
            inputs: Vec::new(),
            properties: Vec::new(),
            outputs: vec![ComponentOutput {
                is_seq_out: true,
                connections: Vec::new(),
            }],
            error_catch_output: None,
            payload: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, slots: &[u16]) -> Self {
        self.inputs.extend_from_slice(slots);
        self
    }

    pub fn with_property(mut self, instructions: Vec<u8>) -> Self {
        self.properties.push(Property { instructions });
        self
    }

    /// Ensures at least `count` outputs exist.
    pub fn with_outputs(mut self, count: usize) -> Self {
        if self.outputs.len() < count {
            self.outputs.resize_with(count, ComponentOutput::default);
        }
        self
    }

    pub fn with_error_catch_output(mut self, output: u16) -> Self {
        self = self.with_outputs(output as usize + 1);
        self.error_catch_output = Some(output);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Stores a call target or parent output index as the payload.
    pub fn with_target(self, index: u16) -> Self {
        self.with_payload(index.to_le_bytes().to_vec())
    }

    pub fn with_breakpoint(mut self) -> Self {
        self.breakpoint = true;
        self
    }
}
