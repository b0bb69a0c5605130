//! CIL opcode table.
//!
//! Only the subset emitted by the bundled compilers is listed. Encodings are
//! the ECMA-335 ones so the instruction streams stay recognizable; two-byte
//! opcodes carry the `0xFE` prefix in the high byte of [`OpCode::code`].

use std::fmt;

/// How an opcode's inline operand is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`).
    ShortInt,
    /// Signed 32-bit immediate (`ldc.i4`).
    Int,
    /// Unsigned 8-bit local or argument index.
    ShortVar,
    /// Unsigned 16-bit local or argument index.
    Var,
    /// Signed 8-bit displacement from the next instruction.
    ShortBranch,
    /// Signed 32-bit displacement from the next instruction.
    Branch,
    /// 32-bit metadata token.
    Token,
}

impl OperandKind {
    pub const fn size(self) -> u32 {
        match self {
            OperandKind::None => 0,
            OperandKind::ShortInt | OperandKind::ShortVar | OperandKind::ShortBranch => 1,
            OperandKind::Var => 2,
            OperandKind::Int | OperandKind::Branch | OperandKind::Token => 4,
        }
    }
}

/// Effect of an instruction on control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Next,
    Call,
    Branch,
    CondBranch,
    Return,
    Throw,
}

macro_rules! opcodes {
    ($( $variant:ident = $code:literal, $name:literal, $operand:ident, $flow:ident; )*) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OpCode {
            $( $variant, )*
        }

        impl OpCode {
            pub const ALL: &'static [OpCode] = &[$( OpCode::$variant, )*];

            /// Encoded value; two-byte opcodes are `0xFExx`.
            pub const fn code(self) -> u16 {
                match self {
                    $( OpCode::$variant => $code, )*
                }
            }

            /// Assembler mnemonic.
            pub const fn name(self) -> &'static str {
                match self {
                    $( OpCode::$variant => $name, )*
                }
            }

            pub const fn operand(self) -> OperandKind {
                match self {
                    $( OpCode::$variant => OperandKind::$operand, )*
                }
            }

            pub const fn flow(self) -> FlowControl {
                match self {
                    $( OpCode::$variant => FlowControl::$flow, )*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None, Next;
    Ldarg0 = 0x02, "ldarg.0", None, Next;
    Ldarg1 = 0x03, "ldarg.1", None, Next;
    Ldarg2 = 0x04, "ldarg.2", None, Next;
    Ldarg3 = 0x05, "ldarg.3", None, Next;
    Ldloc0 = 0x06, "ldloc.0", None, Next;
    Ldloc1 = 0x07, "ldloc.1", None, Next;
    Ldloc2 = 0x08, "ldloc.2", None, Next;
    Ldloc3 = 0x09, "ldloc.3", None, Next;
    Stloc0 = 0x0A, "stloc.0", None, Next;
    Stloc1 = 0x0B, "stloc.1", None, Next;
    Stloc2 = 0x0C, "stloc.2", None, Next;
    Stloc3 = 0x0D, "stloc.3", None, Next;
    LdargS = 0x0E, "ldarg.s", ShortVar, Next;
    StargS = 0x10, "starg.s", ShortVar, Next;
    LdlocS = 0x11, "ldloc.s", ShortVar, Next;
    StlocS = 0x13, "stloc.s", ShortVar, Next;
    Ldnull = 0x14, "ldnull", None, Next;
    LdcI4M1 = 0x15, "ldc.i4.m1", None, Next;
    LdcI40 = 0x16, "ldc.i4.0", None, Next;
    LdcI41 = 0x17, "ldc.i4.1", None, Next;
    LdcI42 = 0x18, "ldc.i4.2", None, Next;
    LdcI43 = 0x19, "ldc.i4.3", None, Next;
    LdcI44 = 0x1A, "ldc.i4.4", None, Next;
    LdcI45 = 0x1B, "ldc.i4.5", None, Next;
    LdcI46 = 0x1C, "ldc.i4.6", None, Next;
    LdcI47 = 0x1D, "ldc.i4.7", None, Next;
    LdcI48 = 0x1E, "ldc.i4.8", None, Next;
    LdcI4S = 0x1F, "ldc.i4.s", ShortInt, Next;
    LdcI4 = 0x20, "ldc.i4", Int, Next;
    Dup = 0x25, "dup", None, Next;
    Pop = 0x26, "pop", None, Next;
    Call = 0x28, "call", Token, Call;
    Ret = 0x2A, "ret", None, Return;
    BrS = 0x2B, "br.s", ShortBranch, Branch;
    BrfalseS = 0x2C, "brfalse.s", ShortBranch, CondBranch;
    BrtrueS = 0x2D, "brtrue.s", ShortBranch, CondBranch;
    BeqS = 0x2E, "beq.s", ShortBranch, CondBranch;
    BgeS = 0x2F, "bge.s", ShortBranch, CondBranch;
    BgtS = 0x30, "bgt.s", ShortBranch, CondBranch;
    BleS = 0x31, "ble.s", ShortBranch, CondBranch;
    BltS = 0x32, "blt.s", ShortBranch, CondBranch;
    BneUnS = 0x33, "bne.un.s", ShortBranch, CondBranch;
    Br = 0x38, "br", Branch, Branch;
    Brfalse = 0x39, "brfalse", Branch, CondBranch;
    Brtrue = 0x3A, "brtrue", Branch, CondBranch;
    Beq = 0x3B, "beq", Branch, CondBranch;
    Bge = 0x3C, "bge", Branch, CondBranch;
    Bgt = 0x3D, "bgt", Branch, CondBranch;
    Ble = 0x3E, "ble", Branch, CondBranch;
    Blt = 0x3F, "blt", Branch, CondBranch;
    BneUn = 0x40, "bne.un", Branch, CondBranch;
    Add = 0x58, "add", None, Next;
    Sub = 0x59, "sub", None, Next;
    Mul = 0x5A, "mul", None, Next;
    Div = 0x5B, "div", None, Next;
    Rem = 0x5D, "rem", None, Next;
    And = 0x5F, "and", None, Next;
    Or = 0x60, "or", None, Next;
    Xor = 0x61, "xor", None, Next;
    Neg = 0x65, "neg", None, Next;
    Not = 0x66, "not", None, Next;
    ConvI4 = 0x69, "conv.i4", None, Next;
    Callvirt = 0x6F, "callvirt", Token, Call;
    Ldstr = 0x72, "ldstr", Token, Next;
    Newobj = 0x73, "newobj", Token, Call;
    Throw = 0x7A, "throw", None, Throw;
    Ldfld = 0x7B, "ldfld", Token, Next;
    Stfld = 0x7D, "stfld", Token, Next;
    Ldsfld = 0x7E, "ldsfld", Token, Next;
    Stsfld = 0x80, "stsfld", Token, Next;
    Box = 0x8C, "box", Token, Next;
    Ldlen = 0x8E, "ldlen", None, Next;
    LdelemRef = 0x9A, "ldelem.ref", None, Next;
    Endfinally = 0xDC, "endfinally", None, Return;
    Leave = 0xDD, "leave", Branch, Branch;
    LeaveS = 0xDE, "leave.s", ShortBranch, Branch;
    Ceq = 0xFE01, "ceq", None, Next;
    Cgt = 0xFE02, "cgt", None, Next;
    Clt = 0xFE04, "clt", None, Next;
    Ldarg = 0xFE09, "ldarg", Var, Next;
    Ldloc = 0xFE0C, "ldloc", Var, Next;
    Stloc = 0xFE0E, "stloc", Var, Next;
    Rethrow = 0xFE1A, "rethrow", None, Throw;
}

impl OpCode {
    /// Look up a one-byte opcode.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        if byte == 0xFE {
            return None;
        }
        Self::from_code(byte as u16)
    }

    /// Look up a two-byte opcode by its second byte.
    pub fn from_prefixed(byte: u8) -> Option<OpCode> {
        Self::from_code(0xFE00 | byte as u16)
    }

    fn from_code(code: u16) -> Option<OpCode> {
        OpCode::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Size of the opcode itself, without operand.
    pub const fn opcode_size(self) -> u32 {
        if self.code() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Total encoded size including the inline operand.
    pub const fn size(self) -> u32 {
        self.opcode_size() + self.operand().size()
    }

    pub fn is_branch(self) -> bool {
        matches!(self.operand(), OperandKind::Branch | OperandKind::ShortBranch)
    }

    pub fn is_leave(self) -> bool {
        matches!(self, OpCode::Leave | OpCode::LeaveS)
    }

    /// Whether control can fall through to the next instruction.
    pub fn falls_through(self) -> bool {
        !matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::Return | FlowControl::Throw
        )
    }

    /// Short form of a long branch, if one exists.
    pub fn short_form(self) -> Option<OpCode> {
        use OpCode::*;
        Some(match self {
            Br => BrS,
            Brfalse => BrfalseS,
            Brtrue => BrtrueS,
            Beq => BeqS,
            Bge => BgeS,
            Bgt => BgtS,
            Ble => BleS,
            Blt => BltS,
            BneUn => BneUnS,
            Leave => LeaveS,
            _ => return None,
        })
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        for (i, a) in OpCode::ALL.iter().enumerate() {
            for b in &OpCode::ALL[i + 1..] {
                assert_ne!(a.code(), b.code(), "{} and {} share an encoding", a, b);
            }
        }
    }

    #[test]
    fn lookup_by_byte() {
        assert_eq!(OpCode::from_byte(0x2A), Some(OpCode::Ret));
        assert_eq!(OpCode::from_byte(0x72), Some(OpCode::Ldstr));
        assert_eq!(OpCode::from_byte(0xFE), None);
        assert_eq!(OpCode::from_prefixed(0x01), Some(OpCode::Ceq));
        assert_eq!(OpCode::from_byte(0x01), None);
    }

    #[test]
    fn branch_forms() {
        assert_eq!(OpCode::Blt.short_form(), Some(OpCode::BltS));
        assert_eq!(OpCode::Leave.short_form(), Some(OpCode::LeaveS));
        assert_eq!(OpCode::Add.short_form(), None);
        assert_eq!(OpCode::BrS.size(), 2);
        assert_eq!(OpCode::Br.size(), 5);
        assert_eq!(OpCode::Ldloc.size(), 4);
        assert!(!OpCode::Ret.falls_through());
        assert!(OpCode::BrtrueS.falls_through());
    }
}
