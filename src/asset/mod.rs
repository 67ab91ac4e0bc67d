pub mod builder;

pub use builder::*;

use crate::bytecode;
use crate::error::AssetError;
use crate::value::Literal;
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Constant table index holding the undefined sentinel.
pub const UNDEFINED_VALUE_INDEX: u16 = 0;
/// Constant table index holding null.
pub const NULL_VALUE_INDEX: u16 = 1;

/// Input slot flag: the slot receives sequence pulses.
pub const INPUT_FLAG_SEQ: u8 = 1 << 0;
/// Input slot flag: the component may run while the slot is undefined.
pub const INPUT_FLAG_OPTIONAL: u8 = 1 << 1;

/// Output 0 of every component is its sequence output.
pub const SEQOUT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Start,
    End,
    Output,
    CallAction,
    EvalExpr,
    SetVariable,
    IsTrue,
    Constant,
    Log,
    Delay,
    Loop,
    Error,
    CatchError,
    Noop,
    Scpi,
    /// Executed by a handler registered on the runtime under this code.
    Host(u16),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub target_component: u16,
    pub target_input: u16,
    pub seq_in: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentOutput {
    pub is_seq_out: bool,
    pub connections: Vec<Connection>,
}

/// A compiled expression: little-endian instruction words ending with `End`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Property {
    pub instructions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub component_type: ComponentType,
    pub breakpoint: bool,
    /// Flow input slots this component reads.
    pub inputs: Vec<u16>,
    pub properties: Vec<Property>,
    pub outputs: Vec<ComponentOutput>,
    pub error_catch_output: Option<u16>,
    /// Type specific data, e.g. the SCPI part stream or a call target.
    pub payload: Vec<u8>,
}

impl Component {
    /// Reads the leading little-endian `u16` of the payload.
    pub fn payload_u16(&self) -> Option<u16> {
        match self.payload.as_slice() {
            [low, high, ..] => Some(u16::from_le_bytes([*low, *high])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub components: Vec<Component>,
    /// Flags of every input slot owned by the flow, indexed by slot.
    pub component_inputs: Vec<u8>,
    pub local_variables: Vec<Literal>,
}

impl Flow {
    pub fn input_count(&self) -> usize {
        self.component_inputs.len()
    }

    pub fn slot_count(&self) -> usize {
        self.component_inputs.len() + self.local_variables.len()
    }

    pub fn is_seq_input(&self, slot: usize) -> bool {
        self.component_inputs
            .get(slot)
            .is_some_and(|flags| flags & INPUT_FLAG_SEQ != 0)
    }

    pub fn is_optional_input(&self, slot: usize) -> bool {
        self.component_inputs
            .get(slot)
            .is_some_and(|flags| flags & INPUT_FLAG_OPTIONAL != 0)
    }
}

/// Root of a compiled program. Loaded once and shared read-only by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub flows: Vec<Flow>,
    pub constants: Vec<Literal>,
    pub global_variables: Vec<Literal>,
}

impl Default for FlowDefinition {
    fn default() -> Self {
        Self {
            flows: Vec::new(),
            constants: vec![Literal::Undefined, Literal::Null],
            global_variables: Vec::new(),
        }
    }
}

impl FlowDefinition {
    /// Checks the structural invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.constants.first() != Some(&Literal::Undefined) {
            return Err(AssetError::Invalid(format!(
                "constant {} must be undefined",
                UNDEFINED_VALUE_INDEX
            )));
        }
        if self.constants.get(NULL_VALUE_INDEX as usize) != Some(&Literal::Null) {
            return Err(AssetError::Invalid(format!(
                "constant {} must be null",
                NULL_VALUE_INDEX
            )));
        }

        for (flow_index, flow) in self.flows.iter().enumerate() {
            let slots = flow.input_count();
            for (component_index, component) in flow.components.iter().enumerate() {
                let invalid = |detail: String| {
                    AssetError::Invalid(format!(
                        "flow {} component {}: {}",
                        flow_index, component_index, detail
                    ))
                };

                if let Some(slot) = component.inputs.iter().find(|slot| **slot as usize >= slots) {
                    return Err(invalid(format!("input slot {} out of range", slot)));
                }
                if let Some(output) = component.error_catch_output {
                    if output as usize >= component.outputs.len() {
                        return Err(invalid(format!("error catch output {} out of range", output)));
                    }
                }
                for (property_index, property) in component.properties.iter().enumerate() {
                    if property.instructions.is_empty() {
                        continue;
                    }
                    bytecode::decode(&property.instructions).map_err(|e| {
                        invalid(format!("property {}: {}", property_index, e))
                    })?;
                }
                for connection in component.outputs.iter().flat_map(|o| &o.connections) {
                    if connection.target_component as usize >= flow.components.len() {
                        return Err(invalid(format!(
                            "connection to missing component {}",
                            connection.target_component
                        )));
                    }
                    if connection.target_input as usize >= slots {
                        return Err(invalid(format!(
                            "connection to missing input slot {}",
                            connection.target_input
                        )));
                    }
                }
                if component.component_type == ComponentType::CallAction {
                    let target = component.payload_u16().map(usize::from);
                    if !target.is_some_and(|index| index < self.flows.len()) {
                        return Err(invalid("call action target flow missing".to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serializes the definition using the bincode format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AssetError> {
        encode_to_vec(self, standard()).map_err(|e| AssetError::Encode(e.to_string()))
    }

    /// Deserializes and validates a definition from a bincode byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let (definition, _): (Self, usize) =
            decode_from_slice(bytes, standard()).map_err(|e| AssetError::Decode(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_json_str(json: &str) -> Result<Self, AssetError> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn to_json_string(&self) -> Result<String, AssetError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Saves the definition; `.json` paths are written as JSON, anything else as bincode.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let path = path.as_ref();
        let bytes = if is_json(path) {
            self.to_json_string()?.into_bytes()
        } else {
            self.to_bytes()?
        };
        fs::write(path, bytes).map_err(|source| AssetError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads a definition, choosing the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| AssetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if is_json(path) {
            let text = String::from_utf8(bytes)
                .map_err(|e| AssetError::Decode(format!("asset is not UTF-8: {}", e)))?;
            Self::from_json_str(&text)
        } else {
            Self::from_bytes(&bytes)
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
