//! Decoded instructions and the byte-stream decoder.
//!
//! Branch operands are resolved to absolute offsets while decoding so that
//! later stages never deal with displacements.

use super::metadata::Token;
use super::opcodes::{OpCode, OperandKind};
use crate::core::error::DecodeError;

/// Inline operand of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Int(i32),
    /// Local or argument index.
    Var(u16),
    /// Absolute branch target.
    Target(u32),
    Token(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(offset: u32, opcode: OpCode, operand: Operand) -> Self {
        Self { offset, opcode, operand }
    }

    pub fn size(&self) -> u32 {
        self.opcode.size()
    }

    pub fn next_offset(&self) -> u32 {
        self.offset + self.size()
    }

    pub fn branch_target(&self) -> Option<u32> {
        match self.operand {
            Operand::Target(target) => Some(target),
            _ => None,
        }
    }

    /// Append the encoding of this instruction to `out`.
    ///
    /// The instruction must already sit at `offset` in the final stream;
    /// branch displacements are computed from it. Returns `false` when a
    /// short branch cannot reach its target.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> bool {
        let code = self.opcode.code();
        if code > 0xFF {
            out.push((code >> 8) as u8);
        }
        out.push(code as u8);

        let next = self.next_offset() as i64;
        match (self.opcode.operand(), self.operand) {
            (OperandKind::None, _) => {}
            (OperandKind::ShortInt, Operand::Int(v)) => out.push(v as i8 as u8),
            (OperandKind::Int, Operand::Int(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (OperandKind::ShortVar, Operand::Var(v)) => out.push(v as u8),
            (OperandKind::Var, Operand::Var(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (OperandKind::ShortBranch, Operand::Target(t)) => {
                let disp = t as i64 - next;
                if disp < i8::MIN as i64 || disp > i8::MAX as i64 {
                    return false;
                }
                out.push(disp as i8 as u8);
            }
            (OperandKind::Branch, Operand::Target(t)) => {
                out.extend_from_slice(&((t as i64 - next) as i32).to_le_bytes());
            }
            (OperandKind::Token, Operand::Token(t)) => out.extend_from_slice(&t.0.to_le_bytes()),
            (kind, _) => {
                // Mismatched operand: keep the stream aligned with zeros.
                out.extend(std::iter::repeat(0).take(kind.size() as usize));
            }
        }
        true
    }
}

/// Decode a complete method body.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut pos = 0usize;
    while pos < code.len() {
        let offset = pos as u32;
        let first = code[pos];
        let opcode = if first == 0xFE {
            let second = *code
                .get(pos + 1)
                .ok_or(DecodeError::UnknownOpcode { offset, code: 0xFE })?;
            OpCode::from_prefixed(second).ok_or(DecodeError::UnknownOpcode {
                offset,
                code: 0xFE00 | second as u16,
            })?
        } else {
            OpCode::from_byte(first).ok_or(DecodeError::UnknownOpcode { offset, code: first as u16 })?
        };
        pos += opcode.opcode_size() as usize;

        let operand_size = opcode.operand().size() as usize;
        let raw = code
            .get(pos..pos + operand_size)
            .ok_or(DecodeError::TruncatedOperand { offset, opcode })?;
        pos += operand_size;
        let next = pos as i64;

        let operand = match opcode.operand() {
            OperandKind::None => Operand::None,
            OperandKind::ShortInt => Operand::Int(raw[0] as i8 as i32),
            OperandKind::Int => Operand::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            OperandKind::ShortVar => Operand::Var(raw[0] as u16),
            OperandKind::Var => Operand::Var(u16::from_le_bytes([raw[0], raw[1]])),
            OperandKind::ShortBranch => Operand::Target(absolute(offset, next + raw[0] as i8 as i64)?),
            OperandKind::Branch => {
                let disp = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
                Operand::Target(absolute(offset, next + disp)?)
            }
            OperandKind::Token => Operand::Token(Token(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))),
        };
        instructions.push(Instruction { offset, opcode, operand });
    }
    Ok(instructions)
}

fn absolute(offset: u32, target: i64) -> Result<u32, DecodeError> {
    u32::try_from(target).map_err(|_| DecodeError::BranchOutOfRange { offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hello_world_body() {
        // ldstr 0x70000001; call 0x0a000002; ret
        let code = [0x72, 0x01, 0, 0, 0x70, 0x28, 0x02, 0, 0, 0x0A, 0x2A];
        let instrs = decode_stream(&code).unwrap();
        assert_eq!(instrs.len(), 3);
        assert_eq!(instrs[0].opcode, OpCode::Ldstr);
        assert_eq!(instrs[0].operand, Operand::Token(Token(0x7000_0001)));
        assert_eq!(instrs[1].offset, 5);
        assert_eq!(instrs[2].offset, 10);
        assert_eq!(instrs[2].opcode, OpCode::Ret);
    }

    #[test]
    fn branch_targets_are_absolute() {
        // IL_0000: br.s IL_0003 ; IL_0002: nop ; IL_0003: br.s IL_0002 ; IL_0005: ret
        let code = [0x2B, 0x01, 0x00, 0x2B, 0xFD, 0x2A];
        let instrs = decode_stream(&code).unwrap();
        assert_eq!(instrs[0].branch_target(), Some(3));
        assert_eq!(instrs[2].branch_target(), Some(2));
    }

    #[test]
    fn two_byte_opcodes() {
        let code = [0xFE, 0x01, 0xFE, 0x0C, 0x05, 0x00];
        let instrs = decode_stream(&code).unwrap();
        assert_eq!(instrs[0].opcode, OpCode::Ceq);
        assert_eq!(instrs[1].opcode, OpCode::Ldloc);
        assert_eq!(instrs[1].operand, Operand::Var(5));
    }

    #[test]
    fn rejects_bad_streams() {
        assert_eq!(
            decode_stream(&[0x00, 0x01]),
            Err(DecodeError::UnknownOpcode { offset: 1, code: 0x01 })
        );
        assert_eq!(
            decode_stream(&[0x20, 0x01]),
            Err(DecodeError::TruncatedOperand { offset: 0, opcode: OpCode::LdcI4 })
        );
        assert_eq!(decode_stream(&[0x2B, 0x80]), Err(DecodeError::BranchOutOfRange { offset: 0 }));
    }

    #[test]
    fn encode_matches_decode() {
        let instr = Instruction::new(4, OpCode::BltS, Operand::Target(0));
        let mut out = Vec::new();
        assert!(instr.encode_into(&mut out));
        assert_eq!(out, vec![0x32, 0xFA]);
        let far = Instruction::new(0, OpCode::BrS, Operand::Target(400));
        assert!(!far.encode_into(&mut Vec::new()));
    }
}
