pub mod opcode;
pub mod visualizer;

use crate::error::EvalError;
use opcode::{Instruction, Operation};

/// Encodes instructions as a little-endian byte stream, appending `End` if missing.
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((instructions.len() + 1) * 2);
    for instruction in instructions {
        bytes.extend_from_slice(&instruction.encode().to_le_bytes());
    }
    if instructions.last() != Some(&Instruction::End) {
        bytes.extend_from_slice(&Instruction::End.encode().to_le_bytes());
    }
    bytes
}

/// Decodes a stream up to and including its `End` instruction.
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, EvalError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    loop {
        let instruction = Instruction::read(bytes, offset).ok_or(EvalError::Unterminated)?;
        instructions.push(instruction);
        offset += 2;
        if instruction == Instruction::End {
            return Ok(instructions);
        }
    }
}

/// Fluent builder for property instruction streams.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    instructions: Vec<Instruction>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(mut self, index: u16) -> Self {
        self.instructions.push(Instruction::PushConstant(index));
        self
    }

    pub fn input(mut self, slot: u16) -> Self {
        self.instructions.push(Instruction::PushInput(slot));
        self
    }

    pub fn local(mut self, index: u16) -> Self {
        self.instructions.push(Instruction::PushLocal(index));
        self
    }

    pub fn global(mut self, index: u16) -> Self {
        self.instructions.push(Instruction::PushGlobal(index));
        self
    }

    pub fn output(mut self, index: u16) -> Self {
        self.instructions.push(Instruction::PushOutput(index));
        self
    }

    pub fn element(mut self) -> Self {
        self.instructions.push(Instruction::ArrayElement);
        self
    }

    pub fn op(mut self, operation: Operation) -> Self {
        self.instructions.push(Instruction::Operation(operation.index()));
        self
    }

    pub fn finish(self) -> Vec<u8> {
        encode(&self.instructions)
    }
}
