mod operations;

pub(crate) use operations::arithmetic;

use crate::asset::FlowDefinition;
use crate::bytecode::opcode::{Instruction, Operation};
use crate::error::EvalError;
use crate::runtime::hooks::RuntimeHooks;
use crate::runtime::instance::{FlowState, InstanceArena};
use crate::runtime::InstanceId;
use crate::value::{SlotRef, Value};

/// Depth-bounded operand stack, owned by the runtime and lent to one evaluation at a time.
#[derive(Debug)]
pub struct EvalStack {
    values: Vec<Value>,
    capacity: usize,
}

impl EvalStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), EvalError> {
        if self.values.len() >= self.capacity {
            return Err(EvalError::StackOverflow(self.capacity));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, EvalError> {
        self.values.pop().ok_or(EvalError::StackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Read-only view of the storage an expression can address.
#[derive(Clone, Copy)]
pub struct EvalScope<'a> {
    pub definition: &'a FlowDefinition,
    pub instances: &'a InstanceArena,
    pub globals: &'a [Value],
    pub hooks: &'a dyn RuntimeHooks,
}

/// Executes property instruction streams against one (instance, component) context.
///
/// Every call resets the borrowed stack before running, so an `Evaluator` never
/// observes values left behind by a previous evaluation.
pub struct Evaluator<'a> {
    scope: EvalScope<'a>,
    stack: &'a mut EvalStack,
    instance: InstanceId,
    iterators: &'a [i32],
}

impl<'a> Evaluator<'a> {
    pub fn new(
        scope: EvalScope<'a>,
        stack: &'a mut EvalStack,
        instance: InstanceId,
        iterators: &'a [i32],
    ) -> Self {
        Self {
            scope,
            stack,
            instance,
            iterators,
        }
    }

    /// Evaluates to a plain value. Returns the value and the number of bytes consumed.
    pub fn evaluate(&mut self, instructions: &[u8]) -> Result<(Value, usize), EvalError> {
        let consumed = self.run(instructions)?;
        let value = self.single_result()?;
        Ok((self.deref(value)?, consumed))
    }

    /// Evaluates to a write target: a slot reference, flow output, native variable or array element.
    pub fn evaluate_assignable(&mut self, instructions: &[u8]) -> Result<(Value, usize), EvalError> {
        let consumed = self.run(instructions)?;
        let value = self.single_result()?;
        if !value.is_assignable() {
            return Err(EvalError::NotAssignable(value.type_name()));
        }
        Ok((value, consumed))
    }

    fn single_result(&mut self) -> Result<Value, EvalError> {
        let depth = self.stack.depth();
        if depth != 1 {
            return Err(EvalError::MalformedStack { depth });
        }
        self.stack.pop()
    }

    fn run(&mut self, instructions: &[u8]) -> Result<usize, EvalError> {
        self.stack.reset();
        let mut offset = 0;
        loop {
            let instruction =
                Instruction::read(instructions, offset).ok_or(EvalError::Unterminated)?;
            offset += 2;

            match instruction {
                Instruction::PushConstant(index) => {
                    let literal = self
                        .scope
                        .definition
                        .constants
                        .get(index as usize)
                        .ok_or(EvalError::ConstantOutOfRange(index))?;
                    self.stack.push(literal.to_value())?;
                }
                Instruction::PushInput(slot) => {
                    let state = self.state()?;
                    let value = state
                        .values
                        .get(slot as usize)
                        .filter(|_| (slot as usize) < state.input_count)
                        .cloned()
                        .ok_or(EvalError::InputOutOfRange(slot))?;
                    self.stack.push(value)?;
                }
                Instruction::PushLocal(index) => {
                    let state = self.state()?;
                    let slot = state.input_count + index as usize;
                    if slot >= state.values.len() {
                        return Err(EvalError::LocalOutOfRange(index));
                    }
                    self.stack.push(Value::Ref(SlotRef::Instance {
                        instance: self.instance,
                        slot,
                    }))?;
                }
                Instruction::PushGlobal(index) => {
                    let count = self.scope.globals.len();
                    let value = if (index as usize) < count {
                        Value::Ref(SlotRef::Global(index as usize))
                    } else {
                        Value::NativeVariable(index as u32 - count as u32 + 1)
                    };
                    self.stack.push(value)?;
                }
                Instruction::PushOutput(index) => {
                    self.stack.push(Value::FlowOutput(index))?;
                }
                Instruction::ArrayElement => {
                    let index_value = self.pop_value()?;
                    let array_value = self.pop_value()?;
                    let Value::Array(array) = array_value else {
                        return Err(EvalError::ArrayExpected);
                    };
                    let index = index_value
                        .as_index()
                        .ok_or(EvalError::IntegerIndexExpected)?;
                    let size = array.borrow().elements.len();
                    if index < 0 || index as usize >= size {
                        return Err(EvalError::IndexOutOfBounds { index, size });
                    }
                    self.stack.push(Value::ArrayElement {
                        array,
                        index: index as usize,
                    })?;
                }
                Instruction::Operation(index) => {
                    let operation =
                        Operation::from_index(index).ok_or(EvalError::UnknownOperation(index))?;
                    self.apply(operation)?;
                }
                Instruction::End => return Ok(offset),
            }
        }
    }

    fn state(&self) -> Result<&'a FlowState, EvalError> {
        self.scope
            .instances
            .get(self.instance)
            .ok_or(EvalError::DanglingReference)
    }

    fn pop_value(&mut self) -> Result<Value, EvalError> {
        let value = self.stack.pop()?;
        self.deref(value)
    }

    /// Resolves write targets to the value they currently hold.
    fn deref(&self, value: Value) -> Result<Value, EvalError> {
        resolve(&self.scope, value)
    }
}

/// Reads the value a write target points at; plain values pass through.
pub fn resolve(scope: &EvalScope<'_>, value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Ref(SlotRef::Instance { instance, slot }) => scope
            .instances
            .get(instance)
            .and_then(|state| state.values.get(slot))
            .cloned()
            .ok_or(EvalError::DanglingReference),
        Value::Ref(SlotRef::Global(index)) => scope
            .globals
            .get(index)
            .cloned()
            .ok_or(EvalError::DanglingReference),
        Value::ArrayElement { array, index } => {
            let array = array.borrow();
            let size = array.elements.len();
            array
                .elements
                .get(index)
                .cloned()
                .ok_or(EvalError::IndexOutOfBounds {
                    index: index as i64,
                    size,
                })
        }
        Value::NativeVariable(id) => Ok(scope.hooks.get_native_variable(id)),
        other => Ok(other),
    }
}
