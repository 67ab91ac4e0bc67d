//! Prelude module for convenient imports
//!
//! Re-exports the types needed to build a definition, run it and talk to an
//! instrument.
//!
//! ```rust
//! use benchflow::prelude::*;
//!
//! let program = Assembler::new().constant(NULL_VALUE_INDEX).finish();
//! assert_eq!(program.len(), 4);
//! ```

// Asset model and builders
pub use crate::asset::{
    Component, ComponentType, DefinitionBuilder, Flow, FlowBuilder, FlowDefinition,
    NULL_VALUE_INDEX, SEQOUT, UNDEFINED_VALUE_INDEX,
};
pub use crate::bytecode::Assembler;
pub use crate::bytecode::opcode::{Instruction, Operation};

// Runtime
pub use crate::components::{ExecutionState, HostComponent, ScpiProgram, Step};
pub use crate::config::RuntimeConfig;
pub use crate::runtime::hooks::{DefaultHooks, LogEntry, RuntimeHooks, ValueLocation};
pub use crate::runtime::{DebuggerState, InstanceId, Runtime, TickReport};
pub use crate::scpi::{ManualDispatch, ScpiRequestKind, ScpiResponse, ScpiWorker};

// Values
pub use crate::value::{Literal, Value};

// Error types
pub use crate::error::{AssetError, ConfigError, EvalError, FlowError};
