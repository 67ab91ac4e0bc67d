//! The SCPI component: builds command text from literal and expression parts,
//! then suspends across ticks while the instrument executes each verb.

use super::{ExecutionState, Step};
use crate::asset::Component;
use crate::error::FlowError;
use crate::runtime::hooks::LogEntry;
use crate::runtime::{InstanceId, Runtime};
use crate::scpi::{PendingTransaction, ScpiRequestKind, ScpiResponse};
use crate::value::Value;

pub const SCPI_PART_STRING: u8 = 1;
pub const SCPI_PART_EXPR: u8 = 2;
pub const SCPI_PART_QUERY_WITH_ASSIGNMENT: u8 = 3;
pub const SCPI_PART_QUERY: u8 = 4;
pub const SCPI_PART_COMMAND: u8 = 5;
pub const SCPI_PART_END: u8 = 6;

/// Builder for the part stream stored in a SCPI component's payload.
#[derive(Debug, Clone, Default)]
pub struct ScpiProgram {
    bytes: Vec<u8>,
}

impl ScpiProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.bytes.push(SCPI_PART_STRING);
        self.bytes
            .extend_from_slice(&(text.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    /// Appends an expression whose value is stringified into the command text.
    pub fn expr(mut self, instructions: Vec<u8>) -> Self {
        self.bytes.push(SCPI_PART_EXPR);
        self.bytes.extend(instructions);
        self
    }

    /// Sends the text as a query and assigns the answer to an assignable expression.
    pub fn query_assign(mut self, destination: Vec<u8>) -> Self {
        self.bytes.push(SCPI_PART_QUERY_WITH_ASSIGNMENT);
        self.bytes.extend(destination);
        self
    }

    pub fn query(mut self) -> Self {
        self.bytes.push(SCPI_PART_QUERY);
        self
    }

    pub fn command(mut self) -> Self {
        self.bytes.push(SCPI_PART_COMMAND);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.push(SCPI_PART_END);
        self.bytes
    }
}

/// Progress through the part stream.
#[derive(Debug, Default)]
pub struct ScpiState {
    cursor: usize,
    text: String,
    pending: Option<PendingTransaction>,
}

impl ScpiState {
    /// Byte offset of the part about to run.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_pending_transaction(&self) -> bool {
        self.pending.is_some()
    }
}

/// Classifies a raw query answer. A fully quoted answer whose inner quotes are
/// all doubled is a string; otherwise an integer, then a float, then raw text.
/// An empty answer reads as integer zero.
pub fn parse_scpi_result(raw: &str) -> Value {
    let text = raw.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Value::Int32(0);
    }

    if let Some(inner) = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        if only_doubled_quotes(inner) {
            return Value::string(inner.replace("\"\"", "\""));
        }
    }
    if let Ok(number) = text.parse::<i32>() {
        return Value::Int32(number);
    }
    if let Ok(number) = text.parse::<f32>() {
        return Value::Float(number);
    }
    Value::string(text)
}

fn only_doubled_quotes(inner: &str) -> bool {
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' && chars.next() != Some('"') {
            return false;
        }
    }
    true
}

pub(super) fn execute(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    component: &Component,
) -> Result<Step, FlowError> {
    let (was_allocated, mut state) = match runtime.take_execution_state(instance, index) {
        Some(ExecutionState::Scpi(state)) => (true, state),
        Some(_) => (true, ScpiState::default()),
        None => (false, ScpiState::default()),
    };

    match advance(runtime, instance, index, &component.payload, &mut state) {
        Ok(Step::Suspended) => {
            runtime.settle_execution_state(
                instance,
                index,
                was_allocated,
                Some(ExecutionState::Scpi(state)),
            );
            Ok(Step::Suspended)
        }
        Ok(Step::Completed) => {
            runtime.settle_execution_state(instance, index, was_allocated, None);
            runtime.propagate_value_through_seqout(instance, index)?;
            Ok(Step::Completed)
        }
        Err(err) => {
            runtime.settle_execution_state(instance, index, was_allocated, None);
            Err(err)
        }
    }
}

/// Runs parts until a verb has to wait or the END part is reached.
fn advance(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    payload: &[u8],
    state: &mut ScpiState,
) -> Result<Step, FlowError> {
    let flow = runtime.instance(instance).map_or(0, |s| s.flow_index());
    let malformed = move |detail: String| FlowError::MalformedComponent {
        flow,
        component: index,
        detail,
    };

    loop {
        let part = *payload
            .get(state.cursor)
            .ok_or_else(|| malformed(format!("SCPI part stream ends at {}", state.cursor)))?;
        let body = state.cursor + 1;

        match part {
            SCPI_PART_STRING => {
                let length = payload
                    .get(body..body + 2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
                    .ok_or_else(|| malformed("truncated SCPI string length".to_string()))?;
                let bytes = payload
                    .get(body + 2..body + 2 + length)
                    .ok_or_else(|| malformed("truncated SCPI string".to_string()))?;
                state.text.push_str(&String::from_utf8_lossy(bytes));
                state.cursor = body + 2 + length;
            }
            SCPI_PART_EXPR => {
                let (value, consumed) = runtime
                    .evaluate_instructions(instance, &payload[body..])
                    .map_err(|e| FlowError::evaluation("Failed to evaluate SCPI expression", e))?;
                state.text.push_str(&value.to_text());
                state.cursor = body + consumed;
            }
            SCPI_PART_QUERY_WITH_ASSIGNMENT | SCPI_PART_QUERY | SCPI_PART_COMMAND => {
                let kind = if part == SCPI_PART_COMMAND {
                    ScpiRequestKind::Command
                } else {
                    ScpiRequestKind::Query
                };
                let Some(response) = transact(runtime, instance, index, kind, state)? else {
                    return Ok(Step::Suspended);
                };

                if response.error != 0 {
                    return Err(FlowError::Instrument {
                        code: response.error,
                        message: runtime.hooks().translate_scpi_error(response.error),
                        command: state.text.clone(),
                    });
                }

                state.cursor = body;
                if kind == ScpiRequestKind::Query {
                    runtime.log(
                        instance,
                        index,
                        LogEntry::ScpiQueryResult(response.text.clone()),
                    );
                }
                if part == SCPI_PART_QUERY_WITH_ASSIGNMENT {
                    let (destination, consumed) = runtime
                        .evaluate_assignable_instructions(instance, &payload[body..])
                        .map_err(|e| {
                            FlowError::evaluation("Failed to evaluate SCPI assignment target", e)
                        })?;
                    runtime.assign_value(
                        instance,
                        index,
                        destination,
                        parse_scpi_result(&response.text),
                    )?;
                    state.cursor = body + consumed;
                }
                state.text.clear();
            }
            SCPI_PART_END => return Ok(Step::Completed),
            other => return Err(malformed(format!("unknown SCPI part {}", other))),
        }
    }
}

/// Sends the accumulated text once, then polls the same transaction until it answers.
fn transact(
    runtime: &mut Runtime,
    instance: InstanceId,
    index: usize,
    kind: ScpiRequestKind,
    state: &mut ScpiState,
) -> Result<Option<ScpiResponse>, FlowError> {
    match state.pending.take() {
        None => {
            let entry = match kind {
                ScpiRequestKind::Command => LogEntry::ScpiCommand(state.text.clone()),
                ScpiRequestKind::Query => LogEntry::ScpiQuery(state.text.clone()),
            };
            runtime.log(instance, index, entry);

            let (request, pending) = PendingTransaction::new(state.text.clone(), kind);
            runtime.dispatch_scpi(request)?;
            state.pending = Some(pending);
            Ok(None)
        }
        Some(pending) => match pending.poll()? {
            Some(response) => Ok(Some(response)),
            None => {
                state.pending = Some(pending);
                Ok(None)
            }
        },
    }
}
