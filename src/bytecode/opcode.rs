/// Bits 15..13 of an instruction word select the opcode.
pub const OPCODE_SHIFT: u16 = 13;
/// Bits 12..0 of an instruction word carry the operand.
pub const OPERAND_MASK: u16 = 0x1FFF;

const PUSH_CONSTANT: u16 = 0;
const PUSH_INPUT: u16 = 1;
const PUSH_LOCAL: u16 = 2;
const PUSH_GLOBAL: u16 = 3;
const PUSH_OUTPUT: u16 = 4;
const ARRAY_ELEMENT: u16 = 5;
const OPERATION: u16 = 6;

/// One 16-bit instruction of a property's expression stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushConstant(u16),
    PushInput(u16),
    PushLocal(u16),
    PushGlobal(u16),
    PushOutput(u16),
    ArrayElement,
    Operation(u16),
    End,
}

impl Instruction {
    pub fn decode(word: u16) -> Self {
        let operand = word & OPERAND_MASK;
        match word >> OPCODE_SHIFT {
            PUSH_CONSTANT => Instruction::PushConstant(operand),
            PUSH_INPUT => Instruction::PushInput(operand),
            PUSH_LOCAL => Instruction::PushLocal(operand),
            PUSH_GLOBAL => Instruction::PushGlobal(operand),
            PUSH_OUTPUT => Instruction::PushOutput(operand),
            ARRAY_ELEMENT => Instruction::ArrayElement,
            OPERATION => Instruction::Operation(operand),
            _ => Instruction::End,
        }
    }

    pub fn encode(self) -> u16 {
        let (opcode, operand) = match self {
            Instruction::PushConstant(operand) => (PUSH_CONSTANT, operand),
            Instruction::PushInput(operand) => (PUSH_INPUT, operand),
            Instruction::PushLocal(operand) => (PUSH_LOCAL, operand),
            Instruction::PushGlobal(operand) => (PUSH_GLOBAL, operand),
            Instruction::PushOutput(operand) => (PUSH_OUTPUT, operand),
            Instruction::ArrayElement => (ARRAY_ELEMENT, 0),
            Instruction::Operation(operand) => (OPERATION, operand),
            Instruction::End => (7, 0),
        };
        (opcode << OPCODE_SHIFT) | (operand & OPERAND_MASK)
    }

    /// Reads the little-endian word at `offset`, if two bytes are available.
    pub fn read(bytes: &[u8], offset: usize) -> Option<Self> {
        let low = *bytes.get(offset)?;
        let high = *bytes.get(offset + 1)?;
        Some(Self::decode(u16::from_le_bytes([low, high])))
    }
}

/// Built-in operations, indexed by the operand of `Instruction::Operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LeftShift,
    RightShift,
    BinaryAnd,
    BinaryOr,
    BinaryXor,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    LogicalAnd,
    LogicalOr,
    UnaryPlus,
    UnaryMinus,
    BinaryOneComplement,
    Not,
    Conditional,
    FlowIterator,
    MathSin,
    MathCos,
    MathLog,
    StringFind,
}

impl Operation {
    pub const ALL: [Operation; 28] = [
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
        Operation::Mod,
        Operation::LeftShift,
        Operation::RightShift,
        Operation::BinaryAnd,
        Operation::BinaryOr,
        Operation::BinaryXor,
        Operation::Equal,
        Operation::NotEqual,
        Operation::Less,
        Operation::Greater,
        Operation::LessOrEqual,
        Operation::GreaterOrEqual,
        Operation::LogicalAnd,
        Operation::LogicalOr,
        Operation::UnaryPlus,
        Operation::UnaryMinus,
        Operation::BinaryOneComplement,
        Operation::Not,
        Operation::Conditional,
        Operation::FlowIterator,
        Operation::MathSin,
        Operation::MathCos,
        Operation::MathLog,
        Operation::StringFind,
    ];

    pub fn from_index(index: u16) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u16 {
        Self::ALL
            .iter()
            .position(|op| *op == self)
            .map_or(0, |position| position as u16)
    }

    /// Number of operands popped from the stack.
    pub fn arity(self) -> usize {
        match self {
            Operation::UnaryPlus
            | Operation::UnaryMinus
            | Operation::BinaryOneComplement
            | Operation::Not
            | Operation::FlowIterator
            | Operation::MathSin
            | Operation::MathCos
            | Operation::MathLog => 1,
            Operation::Conditional => 3,
            _ => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Sub => "sub",
            Operation::Mul => "mul",
            Operation::Div => "div",
            Operation::Mod => "mod",
            Operation::LeftShift => "left_shift",
            Operation::RightShift => "right_shift",
            Operation::BinaryAnd => "binary_and",
            Operation::BinaryOr => "binary_or",
            Operation::BinaryXor => "binary_xor",
            Operation::Equal => "equal",
            Operation::NotEqual => "not_equal",
            Operation::Less => "less",
            Operation::Greater => "greater",
            Operation::LessOrEqual => "less_or_equal",
            Operation::GreaterOrEqual => "greater_or_equal",
            Operation::LogicalAnd => "logical_and",
            Operation::LogicalOr => "logical_or",
            Operation::UnaryPlus => "unary_plus",
            Operation::UnaryMinus => "unary_minus",
            Operation::BinaryOneComplement => "binary_one_complement",
            Operation::Not => "not",
            Operation::Conditional => "conditional",
            Operation::FlowIterator => "flow_iterator",
            Operation::MathSin => "math_sin",
            Operation::MathCos => "math_cos",
            Operation::MathLog => "math_log",
            Operation::StringFind => "string_find",
        }
    }
}
