// This module assembles the instruction stream of one method body. The code generator
// emits opcodes against symbolic labels; the builder tracks the evaluation stack depth
// (per label as well, so that code after an unconditional jump resumes at the depth the
// jump target expects), allocates local slots, records exception clauses and sequence
// points, and finally lays the body out. Branches start in their short form and are
// widened until every displacement fits, then the stream is encoded through the same
// Instruction type the loader decodes into.

//! Method body builder.

use crate::core::error::{BackendError, BackendResult};
use crate::frontend::ast::Pos;
use crate::il::instruction::{Instruction, Operand};
use crate::il::metadata::{ClauseKind, ExceptionClause, LocalVar, Token, TypeSig};
use crate::il::opcodes::{FlowControl, OpCode};

/// Symbolic branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum PendingOperand {
    None,
    Int(i32),
    Var(u16),
    Label(Label),
    Token(Token),
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    opcode: OpCode,
    operand: PendingOperand,
}

#[derive(Debug, Clone, Copy)]
struct PendingClause {
    kind: ClauseKind,
    try_start: Label,
    try_end: Label,
    handler_start: Label,
    handler_end: Label,
}

/// Protected region opened by [`MethodBuilder::begin_try`].
#[derive(Debug, Clone, Copy)]
pub struct TryRegion {
    start: Label,
}

/// A finished method body.
#[derive(Debug, Clone)]
pub struct EmittedBody {
    pub code: Vec<u8>,
    pub instruction_count: usize,
    pub max_stack: u16,
    pub locals: Vec<LocalVar>,
    pub clauses: Vec<ExceptionClause>,
    /// IL offset and source position of each statement.
    pub sequence_points: Vec<(u32, Pos)>,
}

/// Largest body that still fits a tiny method header.
const TINY_CODE_LIMIT: usize = 64;
/// `.maxstack` recorded for bodies with a tiny header.
const TINY_MAX_STACK: u16 = 8;

#[derive(Debug, Default)]
pub struct MethodBuilder {
    code: Vec<Pending>,
    /// Instruction index each label is bound to.
    labels: Vec<Option<usize>>,
    /// Stack depth expected at each label.
    label_depth: Vec<Option<u32>>,
    locals: Vec<LocalVar>,
    clauses: Vec<PendingClause>,
    sequence_points: Vec<(Label, Pos)>,
    depth: u32,
    max_depth: u32,
    unreachable: bool,
    /// First encoding limit exceeded; reported by `finish`.
    error: Option<BackendError>,
}

impl MethodBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        self.label_depth.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction. Code after an unconditional
    /// jump becomes reachable again only if some branch targets the label.
    pub fn mark(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
        match self.label_depth[label.0] {
            Some(depth) if self.unreachable => {
                self.depth = depth;
                self.unreachable = false;
            }
            Some(_) => {}
            None if self.unreachable => self.depth = 0,
            None => self.label_depth[label.0] = Some(self.depth),
        }
    }

    /// A fresh label bound here.
    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.mark(label);
        label
    }

    /// Whether the next instruction can be reached by falling through or
    /// by a jump recorded so far.
    pub fn is_reachable(&self) -> bool {
        !self.unreachable
    }

    pub fn declare_local(&mut self, sig: TypeSig, name: Option<String>) -> u16 {
        let slot = match u16::try_from(self.locals.len()) {
            Ok(slot) => slot,
            Err(_) => {
                self.defer(BackendError::codegen(format!("more than {} locals", u16::MAX)));
                u16::MAX
            }
        };
        self.locals.push(LocalVar { sig, name });
        slot
    }

    fn defer(&mut self, err: BackendError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Label bound to the next instruction without touching the stack
    /// or reachability state.
    fn bind_here(&mut self) -> Label {
        let label = self.new_label();
        self.labels[label.0] = Some(self.code.len());
        label
    }

    pub fn sequence_point(&mut self, pos: Pos) {
        let label = self.bind_here();
        self.sequence_points.push((label, pos));
    }

    fn push(&mut self, opcode: OpCode, operand: PendingOperand, pops: u32, pushes: u32) {
        self.depth = self.depth.saturating_sub(pops) + pushes;
        self.max_depth = self.max_depth.max(self.depth);
        self.code.push(Pending { opcode, operand });
        if !opcode.falls_through() {
            self.unreachable = true;
            self.depth = 0;
        }
    }

    /// Emit an instruction without inline operand.
    pub fn emit(&mut self, opcode: OpCode) {
        let (pops, pushes) = simple_stack_effect(opcode);
        self.push(opcode, PendingOperand::None, pops, pushes);
    }

    /// Emit an instruction with a token operand and no call semantics.
    pub fn emit_token(&mut self, opcode: OpCode, token: Token) {
        let (pops, pushes) = simple_stack_effect(opcode);
        self.push(opcode, PendingOperand::Token(token), pops, pushes);
    }

    /// Emit `call`, `callvirt` or `newobj` with its stack effect.
    pub fn emit_call(&mut self, opcode: OpCode, token: Token, pops: u32, pushes: u32) {
        self.push(opcode, PendingOperand::Token(token), pops, pushes);
    }

    pub fn ldc_i4(&mut self, value: i32) {
        let short = match value {
            -1 => Some(OpCode::LdcI4M1),
            0 => Some(OpCode::LdcI40),
            1 => Some(OpCode::LdcI41),
            2 => Some(OpCode::LdcI42),
            3 => Some(OpCode::LdcI43),
            4 => Some(OpCode::LdcI44),
            5 => Some(OpCode::LdcI45),
            6 => Some(OpCode::LdcI46),
            7 => Some(OpCode::LdcI47),
            8 => Some(OpCode::LdcI48),
            _ => None,
        };
        match short {
            Some(op) => self.emit(op),
            None if (i8::MIN as i32..=i8::MAX as i32).contains(&value) => {
                self.push(OpCode::LdcI4S, PendingOperand::Int(value), 0, 1)
            }
            None => self.push(OpCode::LdcI4, PendingOperand::Int(value), 0, 1),
        }
    }

    pub fn ldloc(&mut self, index: u16) {
        match index {
            0 => self.emit(OpCode::Ldloc0),
            1 => self.emit(OpCode::Ldloc1),
            2 => self.emit(OpCode::Ldloc2),
            3 => self.emit(OpCode::Ldloc3),
            0..=255 => self.push(OpCode::LdlocS, PendingOperand::Var(index), 0, 1),
            _ => self.push(OpCode::Ldloc, PendingOperand::Var(index), 0, 1),
        }
    }

    pub fn stloc(&mut self, index: u16) {
        match index {
            0 => self.emit(OpCode::Stloc0),
            1 => self.emit(OpCode::Stloc1),
            2 => self.emit(OpCode::Stloc2),
            3 => self.emit(OpCode::Stloc3),
            0..=255 => self.push(OpCode::StlocS, PendingOperand::Var(index), 1, 0),
            _ => self.push(OpCode::Stloc, PendingOperand::Var(index), 1, 0),
        }
    }

    pub fn ldarg(&mut self, index: u16) {
        match index {
            0 => self.emit(OpCode::Ldarg0),
            1 => self.emit(OpCode::Ldarg1),
            2 => self.emit(OpCode::Ldarg2),
            3 => self.emit(OpCode::Ldarg3),
            0..=255 => self.push(OpCode::LdargS, PendingOperand::Var(index), 0, 1),
            _ => self.push(OpCode::Ldarg, PendingOperand::Var(index), 0, 1),
        }
    }

    pub fn starg(&mut self, index: u16) {
        if index > 255 {
            self.defer(BackendError::codegen(format!("argument {} out of starg.s range", index)));
        }
        self.push(OpCode::StargS, PendingOperand::Var(index), 1, 0);
    }

    /// Emit a branch; `opcode` is the long form, shortened at layout time.
    pub fn branch(&mut self, opcode: OpCode, target: Label) {
        let pops = match opcode {
            OpCode::Br | OpCode::Leave => 0,
            OpCode::Brfalse | OpCode::Brtrue => 1,
            _ => 2,
        };
        let after = self.depth.saturating_sub(pops);
        let expected = if opcode == OpCode::Leave { 0 } else { after };
        if self.label_depth[target.0].is_none() {
            self.label_depth[target.0] = Some(expected);
        }
        if opcode == OpCode::Leave {
            self.depth = 0;
        }
        self.push(opcode, PendingOperand::Label(target), pops, 0);
    }

    /// Open a protected region.
    pub fn begin_try(&mut self) -> TryRegion {
        TryRegion { start: self.bind_here() }
    }

    /// Start the handler of `region`; the protected range ends here.
    /// Catch handlers start with the exception object on the stack.
    pub fn begin_handler(&mut self, region: TryRegion, kind: ClauseKind) -> HandlerStart {
        let try_end = self.bind_here();
        self.unreachable = false;
        self.depth = match kind {
            ClauseKind::Catch(_) => 1,
            ClauseKind::Finally => 0,
        };
        self.max_depth = self.max_depth.max(self.depth);
        HandlerStart { kind, try_start: region.start, try_end }
    }

    /// Close a handler and record its clause.
    pub fn end_handler(&mut self, handler: HandlerStart) {
        let handler_end = self.bind_here();
        self.clauses.push(PendingClause {
            kind: handler.kind,
            try_start: handler.try_start,
            try_end: handler.try_end,
            handler_start: handler.try_end,
            handler_end,
        });
    }

    /// Lay the body out and encode it.
    pub fn finish(self) -> BackendResult<EmittedBody> {
        let MethodBuilder { code, labels, locals, clauses, sequence_points, max_depth, error, .. } = self;
        if let Some(err) = error {
            return Err(err);
        }

        let mut short: Vec<bool> = code.iter().map(|p| p.opcode.short_form().is_some()).collect();
        let layout = loop {
            let offsets = layout_offsets(&code, &short);
            let mut widened = false;
            for (i, pending) in code.iter().enumerate() {
                if !short[i] {
                    continue;
                }
                if let PendingOperand::Label(label) = pending.operand {
                    let target = resolve(&labels, &offsets, label)? as i64;
                    let next = offsets[i + 1] as i64;
                    if !(i8::MIN as i64..=i8::MAX as i64).contains(&(target - next)) {
                        short[i] = false;
                        widened = true;
                    }
                }
            }
            if !widened {
                break offsets;
            }
        };

        let mut bytes = Vec::with_capacity(layout[code.len()] as usize);
        for (i, pending) in code.iter().enumerate() {
            let opcode = match pending.opcode.short_form() {
                Some(short_op) if short[i] => short_op,
                _ => pending.opcode,
            };
            let operand = match pending.operand {
                PendingOperand::None => Operand::None,
                PendingOperand::Int(v) => Operand::Int(v),
                PendingOperand::Var(v) => Operand::Var(v),
                PendingOperand::Token(t) => Operand::Token(t),
                PendingOperand::Label(label) => Operand::Target(resolve(&labels, &layout, label)?),
            };
            let instr = Instruction::new(layout[i], opcode, operand);
            if !instr.encode_into(&mut bytes) {
                return Err(BackendError::codegen(format!("branch at IL_{:04x} out of range", layout[i])));
            }
        }

        let clauses = clauses
            .iter()
            .map(|c| {
                let try_offset = resolve(&labels, &layout, c.try_start)?;
                let handler_offset = resolve(&labels, &layout, c.handler_start)?;
                Ok(ExceptionClause {
                    kind: c.kind,
                    try_offset,
                    try_length: resolve(&labels, &layout, c.try_end)? - try_offset,
                    handler_offset,
                    handler_length: resolve(&labels, &layout, c.handler_end)? - handler_offset,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let sequence_points = sequence_points
            .iter()
            .map(|(label, pos)| Ok((resolve(&labels, &layout, *label)?, *pos)))
            .collect::<BackendResult<Vec<_>>>()?;

        let tiny = bytes.len() < TINY_CODE_LIMIT && max_depth <= TINY_MAX_STACK as u32 && locals.is_empty() && clauses.is_empty();
        let max_stack = if tiny { TINY_MAX_STACK } else { max_depth as u16 };

        Ok(EmittedBody {
            code: bytes,
            instruction_count: code.len(),
            max_stack,
            locals,
            clauses,
            sequence_points,
        })
    }
}

/// Marks the start of a handler until [`MethodBuilder::end_handler`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerStart {
    kind: ClauseKind,
    try_start: Label,
    try_end: Label,
}

/// Offsets of every instruction plus the end of the body.
fn layout_offsets(code: &[Pending], short: &[bool]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut offset = 0u32;
    for (pending, &is_short) in code.iter().zip(short) {
        offsets.push(offset);
        let opcode = match pending.opcode.short_form() {
            Some(short_op) if is_short => short_op,
            _ => pending.opcode,
        };
        offset += opcode.size();
    }
    offsets.push(offset);
    offsets
}

fn resolve(labels: &[Option<usize>], offsets: &[u32], label: Label) -> BackendResult<u32> {
    labels[label.0]
        .and_then(|index| offsets.get(index).copied())
        .ok_or_else(|| BackendError::codegen(format!("label {} never bound", label.0)))
}

/// Stack effect of opcodes whose effect does not depend on a signature.
fn simple_stack_effect(opcode: OpCode) -> (u32, u32) {
    use OpCode::*;
    match opcode {
        Nop | Ret | Endfinally | Rethrow => (0, 0),
        Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 | Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 | Ldnull | LdcI4M1 | LdcI40
        | LdcI41 | LdcI42 | LdcI43 | LdcI44 | LdcI45 | LdcI46 | LdcI47 | LdcI48 | Ldstr | Ldsfld => (0, 1),
        Stloc0 | Stloc1 | Stloc2 | Stloc3 | Pop | Throw | Stsfld => (1, 0),
        Dup => (1, 2),
        Add | Sub | Mul | Div | Rem | And | Or | Xor | Ceq | Cgt | Clt | LdelemRef => (2, 1),
        Neg | Not | ConvI4 | Box | Ldlen | Ldfld => (1, 1),
        Stfld => (2, 0),
        _ if opcode.flow() == FlowControl::CondBranch => (1, 0),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::instruction::decode_stream;

    #[test]
    fn constants_and_locals_pick_short_forms() {
        let mut b = MethodBuilder::new();
        let slot = b.declare_local(TypeSig::Int32, None);
        b.ldc_i4(5);
        b.ldc_i4(100);
        b.ldc_i4(1000);
        b.emit(OpCode::Add);
        b.emit(OpCode::Add);
        b.stloc(slot);
        b.emit(OpCode::Ret);
        let body = b.finish().unwrap();
        let ops: Vec<_> = decode_stream(&body.code).unwrap().iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![OpCode::LdcI45, OpCode::LdcI4S, OpCode::LdcI4, OpCode::Add, OpCode::Add, OpCode::Stloc0, OpCode::Ret]);
        assert_eq!(body.max_stack, 3);
    }

    #[test]
    fn tiny_bodies_report_default_max_stack() {
        let mut b = MethodBuilder::new();
        b.emit(OpCode::Ret);
        assert_eq!(b.finish().unwrap().max_stack, 8);
    }

    #[test]
    fn loop_uses_short_backward_branch() {
        let mut b = MethodBuilder::new();
        let head = b.here();
        let exit = b.new_label();
        b.ldc_i4(1);
        b.branch(OpCode::Brfalse, exit);
        b.branch(OpCode::Br, head);
        b.mark(exit);
        b.emit(OpCode::Ret);
        let body = b.finish().unwrap();
        let instrs = decode_stream(&body.code).unwrap();
        assert_eq!(instrs[1].opcode, OpCode::BrfalseS);
        assert_eq!(instrs[1].branch_target(), Some(5));
        assert_eq!(instrs[2].opcode, OpCode::BrS);
        assert_eq!(instrs[2].branch_target(), Some(0));
    }

    #[test]
    fn far_branches_are_widened() {
        let mut b = MethodBuilder::new();
        let exit = b.new_label();
        b.branch(OpCode::Br, exit);
        for _ in 0..200 {
            b.emit(OpCode::Nop);
        }
        b.mark(exit);
        b.emit(OpCode::Ret);
        let body = b.finish().unwrap();
        let instrs = decode_stream(&body.code).unwrap();
        assert_eq!(instrs[0].opcode, OpCode::Br);
        assert_eq!(instrs[0].branch_target(), Some(205));
    }

    #[test]
    fn try_finally_clause_offsets() {
        let mut b = MethodBuilder::new();
        let end = b.new_label();
        let region = b.begin_try();
        b.emit(OpCode::Nop);
        b.branch(OpCode::Leave, end);
        let handler = b.begin_handler(region, ClauseKind::Finally);
        b.emit(OpCode::Endfinally);
        b.end_handler(handler);
        b.mark(end);
        b.emit(OpCode::Ret);
        let body = b.finish().unwrap();
        let clause = body.clauses[0];
        assert_eq!((clause.try_offset, clause.try_length), (0, 3));
        assert_eq!((clause.handler_offset, clause.handler_length), (3, 1));
        assert!(!body.code.is_empty());
    }

    #[test]
    fn encoding_limits_fail_the_body() {
        let mut b = MethodBuilder::new();
        b.ldarg(300);
        b.starg(300);
        b.emit(OpCode::Ret);
        assert!(b.finish().is_err());

        let mut b = MethodBuilder::new();
        for _ in 0..=u16::MAX as usize {
            b.declare_local(TypeSig::Int32, None);
        }
        assert_eq!(b.declare_local(TypeSig::Int32, None), u16::MAX);
        b.emit(OpCode::Ret);
        assert!(b.finish().is_err());
    }
}
