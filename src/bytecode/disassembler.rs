//! Bytecode disassembler for debugging.

use std::fmt::Write;

use crate::bytecode::chunk::{Bytecode, Constant};
use crate::bytecode::instruction::{read_operands, OpCode};

/// Render an instruction stream, one instruction per line:
/// `0000 OpConstant 1`.
pub fn disassemble(instructions: &[u8]) -> String {
    let mut output = String::new();
    let mut offset = 0;

    while offset < instructions.len() {
        offset = disassemble_instruction(instructions, offset, &mut output);
    }

    output
}

/// Render one instruction and return the offset of the next.
pub fn disassemble_instruction(instructions: &[u8], offset: usize, output: &mut String) -> usize {
    let byte = instructions[offset];
    let op = match OpCode::from_u8(byte) {
        Some(op) => op,
        None => {
            let _ = writeln!(output, "{:04} ERROR: unknown opcode {}", offset, byte);
            return offset + 1;
        }
    };

    let (operands, read) = read_operands(op, &instructions[offset + 1..]);
    let _ = write!(output, "{:04} {}", offset, op.name());
    for operand in &operands {
        let _ = write!(output, " {}", operand);
    }
    output.push('\n');

    offset + 1 + read
}

/// Render the main instructions, the constant pool and the body of every
/// function template in it.
pub fn disassemble_bytecode(bytecode: &Bytecode) -> String {
    let mut output = String::new();

    output.push_str("== main ==\n");
    output.push_str(&disassemble(&bytecode.instructions));

    if bytecode.constants.is_empty() {
        return output;
    }

    output.push_str("\n== constants ==\n");
    for (index, constant) in bytecode.constants.iter().enumerate() {
        let _ = writeln!(output, "{:04} {}", index, constant);
    }

    for (index, constant) in bytecode.constants.iter().enumerate() {
        if let Constant::Function(function) = constant {
            let _ = writeln!(
                output,
                "\n== fn {} (constant {}) ==",
                function.display_name(),
                index
            );
            output.push_str(&disassemble(&function.instructions));
        }
    }

    output
}

/// Print a disassembly of `bytecode` to stdout.
pub fn print_disassembly(bytecode: &Bytecode) {
    print!("{}", disassemble_bytecode(bytecode));
}
