//! Instruction set for the Shark VM.
//!
//! Each instruction is one opcode byte followed by zero or more big-endian
//! operands. Operand widths depend only on the opcode, so a stream decodes
//! front to back without lookahead. The numbering below is the persisted wire
//! format and must not be reordered.

use std::fmt;

/// A flat instruction stream.
pub type Instructions = Vec<u8>;

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ============ Constants & Stack ============
    /// Load a constant from the pool: CONSTANT <index:u16>
    Constant = 0,
    /// a + b
    Add = 1,
    /// Pop and discard the top value
    Pop = 2,
    /// a - b
    Sub = 3,
    /// a * b
    Mul = 4,
    /// a / b
    Div = 5,
    /// Push true
    True = 6,
    /// Push false
    False = 7,

    // ============ Comparison & Unary ============
    /// a == b
    Equal = 8,
    /// a != b
    NotEqual = 9,
    /// a > b (the compiler swaps operands for <)
    GreaterThan = 10,
    /// -a
    Minus = 11,
    /// !a
    Bang = 12,

    // ============ Control Flow ============
    /// Pop the condition and jump if it is falsy: JUMP_NOT_TRUTHY <target:u16>
    JumpNotTruthy = 13,
    /// Unconditional jump: JUMP <target:u16>
    Jump = 14,
    /// Push null
    Null = 15,

    // ============ Variables & Collections ============
    /// Push a global: GET_GLOBAL <slot:u16>
    GetGlobal = 16,
    /// Pop into a global: SET_GLOBAL <slot:u16>
    SetGlobal = 17,
    /// Build an array from the top N values: ARRAY <count:u16>
    Array = 18,
    /// Build a hash from the top N values (key, value, ...): HASH <count:u16>
    Hash = 19,
    /// container[index]
    Index = 20,

    // ============ Functions ============
    /// Call the callee below N arguments: CALL <argc:u8>
    Call = 21,
    /// Return the top value from the current frame
    ReturnValue = 22,
    /// Return null from the current frame
    Return = 23,
    /// Push a local: GET_LOCAL <slot:u8>
    GetLocal = 24,
    /// Pop into a local: SET_LOCAL <slot:u8>
    SetLocal = 25,
    /// Push a builtin function: GET_BUILTIN <index:u8>
    GetBuiltin = 26,
    /// Build a closure over the top N values: CLOSURE <const:u16> <free:u8>
    Closure = 27,
    /// Push a captured value: GET_FREE <index:u8>
    GetFree = 28,
    /// Push the closure of the executing frame
    CurrentClosure = 29,

    // ============ Extended Operators ============
    /// a && b (both sides evaluated)
    And = 30,
    /// a || b (both sides evaluated)
    Or = 31,
    /// a ** b
    Power = 32,
    /// a >= b (the compiler swaps operands for <=)
    GreaterThanEqual = 33,
    /// Add one to a global in place: INCREMENT_GLOBAL <slot:u16>
    IncrementGlobal = 34,
    /// Add one to a local in place: INCREMENT_LOCAL <slot:u8>
    IncrementLocal = 35,
    /// Subtract one from a global in place: DECREMENT_GLOBAL <slot:u16>
    DecrementGlobal = 36,
    /// Subtract one from a local in place: DECREMENT_LOCAL <slot:u8>
    DecrementLocal = 37,
    /// Inclusive integer range a..b
    Range = 38,
    /// ...a over a string
    Spread = 39,
    /// container[index] = value
    IndexAssign = 40,
    /// Pop a default parameter value, storing it only if the slot is empty:
    /// SET_LOCAL_DEFAULT <slot:u8>
    SetLocalDefault = 41,
    /// Build a tuple from the top N values: TUPLE <count:u16>
    Tuple = 42,
}

impl OpCode {
    /// Every opcode, indexed by its byte value.
    pub const ALL: [OpCode; 43] = [
        OpCode::Constant,
        OpCode::Add,
        OpCode::Pop,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::True,
        OpCode::False,
        OpCode::Equal,
        OpCode::NotEqual,
        OpCode::GreaterThan,
        OpCode::Minus,
        OpCode::Bang,
        OpCode::JumpNotTruthy,
        OpCode::Jump,
        OpCode::Null,
        OpCode::GetGlobal,
        OpCode::SetGlobal,
        OpCode::Array,
        OpCode::Hash,
        OpCode::Index,
        OpCode::Call,
        OpCode::ReturnValue,
        OpCode::Return,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::GetBuiltin,
        OpCode::Closure,
        OpCode::GetFree,
        OpCode::CurrentClosure,
        OpCode::And,
        OpCode::Or,
        OpCode::Power,
        OpCode::GreaterThanEqual,
        OpCode::IncrementGlobal,
        OpCode::IncrementLocal,
        OpCode::DecrementGlobal,
        OpCode::DecrementLocal,
        OpCode::Range,
        OpCode::Spread,
        OpCode::IndexAssign,
        OpCode::SetLocalDefault,
        OpCode::Tuple,
    ];

    /// Width in bytes of each operand.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            OpCode::Constant
            | OpCode::JumpNotTruthy
            | OpCode::Jump
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::Array
            | OpCode::Hash
            | OpCode::IncrementGlobal
            | OpCode::DecrementGlobal
            | OpCode::Tuple => &[2],

            OpCode::Call
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetBuiltin
            | OpCode::GetFree
            | OpCode::IncrementLocal
            | OpCode::DecrementLocal
            | OpCode::SetLocalDefault => &[1],

            OpCode::Closure => &[2, 1],

            OpCode::Add
            | OpCode::Pop
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::True
            | OpCode::False
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::GreaterThan
            | OpCode::Minus
            | OpCode::Bang
            | OpCode::Null
            | OpCode::Index
            | OpCode::ReturnValue
            | OpCode::Return
            | OpCode::CurrentClosure
            | OpCode::And
            | OpCode::Or
            | OpCode::Power
            | OpCode::GreaterThanEqual
            | OpCode::Range
            | OpCode::Spread
            | OpCode::IndexAssign => &[],
        }
    }

    /// Total number of operand bytes following the opcode.
    pub fn operand_size(self) -> usize {
        self.operand_widths().iter().sum()
    }

    /// Convert from u8 to OpCode.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Display name used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "OpConstant",
            OpCode::Add => "OpAdd",
            OpCode::Pop => "OpPop",
            OpCode::Sub => "OpSub",
            OpCode::Mul => "OpMul",
            OpCode::Div => "OpDiv",
            OpCode::True => "OpTrue",
            OpCode::False => "OpFalse",
            OpCode::Equal => "OpEqual",
            OpCode::NotEqual => "OpNotEqual",
            OpCode::GreaterThan => "OpGreaterThan",
            OpCode::Minus => "OpMinus",
            OpCode::Bang => "OpBang",
            OpCode::JumpNotTruthy => "OpJumpNotTruthy",
            OpCode::Jump => "OpJump",
            OpCode::Null => "OpNull",
            OpCode::GetGlobal => "OpGetGlobal",
            OpCode::SetGlobal => "OpSetGlobal",
            OpCode::Array => "OpArray",
            OpCode::Hash => "OpHash",
            OpCode::Index => "OpIndex",
            OpCode::Call => "OpCall",
            OpCode::ReturnValue => "OpReturnValue",
            OpCode::Return => "OpReturn",
            OpCode::GetLocal => "OpGetLocal",
            OpCode::SetLocal => "OpSetLocal",
            OpCode::GetBuiltin => "OpGetBuiltin",
            OpCode::Closure => "OpClosure",
            OpCode::GetFree => "OpGetFree",
            OpCode::CurrentClosure => "OpCurrentClosure",
            OpCode::And => "OpAnd",
            OpCode::Or => "OpOr",
            OpCode::Power => "OpPower",
            OpCode::GreaterThanEqual => "OpGreaterThanEqual",
            OpCode::IncrementGlobal => "OpIncrementGlobal",
            OpCode::IncrementLocal => "OpIncrementLocal",
            OpCode::DecrementGlobal => "OpDecrementGlobal",
            OpCode::DecrementLocal => "OpDecrementLocal",
            OpCode::Range => "OpRange",
            OpCode::Spread => "OpSpread",
            OpCode::IndexAssign => "OpIndexAssign",
            OpCode::SetLocalDefault => "OpSetLocalDefault",
            OpCode::Tuple => "OpTuple",
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode one instruction. Missing operands encode as zero; each operand is
/// truncated to its declared width.
pub fn make(op: OpCode, operands: &[usize]) -> Instructions {
    let widths = op.operand_widths();
    let mut instruction = Vec::with_capacity(1 + op.operand_size());
    instruction.push(op as u8);

    for (i, width) in widths.iter().enumerate() {
        let operand = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => instruction.extend_from_slice(&(operand as u16).to_be_bytes()),
            1 => instruction.push(operand as u8),
            _ => {}
        }
    }

    instruction
}

/// Decode the operands of `op` from `ins`, which starts just past the opcode
/// byte. Returns the operands and the number of bytes read.
pub fn read_operands(op: OpCode, ins: &[u8]) -> (Vec<usize>, usize) {
    let widths = op.operand_widths();
    let mut operands = Vec::with_capacity(widths.len());
    let mut offset = 0;

    for width in widths {
        match width {
            2 => operands.push(read_u16(ins, offset) as usize),
            1 => operands.push(read_u8(ins, offset) as usize),
            _ => {}
        }
        offset += width;
    }

    (operands, offset)
}

/// Read a big-endian u16 at `offset`; bytes past the end read as zero.
#[inline]
pub fn read_u16(ins: &[u8], offset: usize) -> u16 {
    let hi = ins.get(offset).copied().unwrap_or(0);
    let lo = ins.get(offset + 1).copied().unwrap_or(0);
    u16::from_be_bytes([hi, lo])
}

#[inline]
pub fn read_u8(ins: &[u8], offset: usize) -> u8 {
    ins.get(offset).copied().unwrap_or(0)
}
