use thiserror::Error;

/// Errors raised while executing a property's instruction stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Evaluation stack overflow (capacity {0})")]
    StackOverflow(usize),

    #[error("Evaluation stack underflow")]
    StackUnderflow,

    #[error("Malformed expression: expected exactly one value on the stack, found {depth}")]
    MalformedStack { depth: usize },

    #[error("Instruction stream ended without an end instruction")]
    Unterminated,

    #[error("Constant index {0} out of range")]
    ConstantOutOfRange(u16),

    #[error("Input slot {0} out of range")]
    InputOutOfRange(u16),

    #[error("Local variable {0} out of range")]
    LocalOutOfRange(u16),

    #[error("Iterator {0} out of range")]
    IteratorOutOfRange(usize),

    #[error("Unknown operation {0}")]
    UnknownOperation(u16),

    #[error("Array value expected")]
    ArrayExpected,

    #[error("Integer value expected for array element index")]
    IntegerIndexExpected,

    #[error("Array element index {index} out of bounds (array size {size})")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("Assignable value expected, found {0}")]
    NotAssignable(&'static str),

    #[error("Reference into a destroyed flow instance")]
    DanglingReference,

    #[error("Operation '{operation}' failed: {detail}")]
    Operation {
        operation: &'static str,
        detail: String,
    },
}

/// Errors raised by components, the scheduler and the host surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("{context}: {source}")]
    Evaluation {
        context: String,
        #[source]
        source: EvalError,
    },

    #[error("Execution queue is full")]
    QueueFull,

    #[error("SCPI result not available")]
    ResultUnavailable,

    #[error("SCPI dispatch failed: {0}")]
    Dispatch(String),

    #[error("SCPI '{message}': {command}")]
    Instrument {
        code: i32,
        message: String,
        command: String,
    },

    #[error("Flow instance is no longer alive")]
    InvalidInstance,

    #[error("Flow index {0} out of range")]
    UnknownFlow(usize),

    #[error("Component {component} of flow {flow} is malformed: {detail}")]
    MalformedComponent {
        flow: usize,
        component: usize,
        detail: String,
    },

    #[error("No handler registered for host component type {0}")]
    UnknownComponent(u16),

    #[error("Can not assign, array element index out of bounds")]
    AssignOutOfBounds,

    #[error("Value of type {0} can not be used as an assignment destination")]
    InvalidDestination(&'static str),

    #[error("{0}")]
    Raised(String),
}

impl FlowError {
    pub fn evaluation(context: impl Into<String>, source: EvalError) -> Self {
        FlowError::Evaluation {
            context: context.into(),
            source,
        }
    }
}

/// Errors that can occur while loading, saving or validating a flow asset.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Could not access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Encode(String),

    #[error("Deserialization failed: {0}")]
    Decode(String),

    #[error("Failed to parse asset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid asset: {0}")]
    Invalid(String),
}

/// Errors that can occur while loading a runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}
