// This module builds the control-flow graph of one method body for the structured renderer.
// Blocks start at offset zero, at every branch target, after every branch, return or throw,
// and at every exception clause boundary. Handler entries are reached through an edge from the
// block that opens the protected range, which keeps the graph single-entry. Dominators use the
// iterative algorithm of Cooper, Harvey and Kennedy over reverse postorder; natural loops are
// grown backwards from every edge whose target dominates its source.

//! Control-flow graph, dominators and natural loops.

use crate::core::error::RenderError;
use crate::il::metadata::ExceptionClause;
use crate::il::Instruction;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Index of the first instruction.
    pub first: usize,
    /// One past the last instruction.
    pub end: usize,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

/// Loop found from back edges to one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: usize,
    /// Member blocks in ascending order, header included.
    pub body: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    offsets: Vec<u32>,
    block_of: Vec<usize>,
    code_end: u32,
}

impl ControlFlowGraph {
    /// Build the graph, checking that every branch target and clause
    /// boundary falls on an instruction.
    pub fn build(
        method: &str,
        instructions: &[Instruction],
        clauses: &[ExceptionClause],
    ) -> Result<Self, RenderError> {
        let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        let code_end = instructions.last().map_or(0, Instruction::next_offset);
        let mut cfg = Self { blocks: Vec::new(), offsets, block_of: Vec::new(), code_end };
        let n = instructions.len();
        if n == 0 {
            return Ok(cfg);
        }

        let mut leaders = vec![false; n];
        leaders[0] = true;
        for (i, instr) in instructions.iter().enumerate() {
            if let Some(target) = instr.branch_target() {
                let index = cfg.index_of(target).ok_or_else(|| RenderError::BadBranchTarget {
                    method: method.to_string(),
                    offset: instr.offset,
                    target,
                })?;
                leaders[index] = true;
            }
            if (instr.branch_target().is_some() || !instr.opcode.falls_through()) && i + 1 < n {
                leaders[i + 1] = true;
            }
        }
        for clause in clauses {
            for offset in [clause.try_offset, clause.try_end(), clause.handler_offset, clause.handler_end()] {
                if offset == code_end {
                    continue;
                }
                let index = cfg.index_of(offset).ok_or_else(|| RenderError::BadClause {
                    method: method.to_string(),
                    reason: format!("IL_{:04x} is not an instruction boundary", offset),
                })?;
                leaders[index] = true;
            }
            if clause.try_offset >= clause.try_end() || clause.handler_offset >= clause.handler_end() {
                return Err(RenderError::BadClause {
                    method: method.to_string(),
                    reason: "empty protected or handler range".to_string(),
                });
            }
        }

        let mut block_of = vec![0; n];
        for (i, &leader) in leaders.iter().enumerate() {
            if leader {
                if let Some(previous) = cfg.blocks.last_mut() {
                    previous.end = i;
                }
                cfg.blocks.push(BasicBlock { first: i, end: n, succs: Vec::new(), preds: Vec::new() });
            }
            block_of[i] = cfg.blocks.len() - 1;
        }
        cfg.block_of = block_of;

        for b in 0..cfg.blocks.len() {
            let last = &instructions[cfg.blocks[b].end - 1];
            let mut succs = Vec::new();
            if let Some(index) = last.branch_target().and_then(|t| cfg.index_of(t)) {
                succs.push(cfg.block_of[index]);
            }
            if last.opcode.falls_through() && cfg.blocks[b].end < n {
                succs.push(b + 1);
            }
            cfg.blocks[b].succs = succs;
        }
        for clause in clauses {
            if let (Some(from), Some(to)) = (cfg.block_at(clause.try_offset), cfg.block_at(clause.handler_offset)) {
                cfg.blocks[from].succs.push(to);
            }
        }
        for b in 0..cfg.blocks.len() {
            let mut succs = std::mem::take(&mut cfg.blocks[b].succs);
            succs.sort_unstable();
            succs.dedup();
            for &s in &succs {
                cfg.blocks[s].preds.push(b);
            }
            cfg.blocks[b].succs = succs;
        }
        Ok(cfg)
    }

    /// Instruction index at `offset`.
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Offset of the instruction at `index`, or the end of the code.
    pub fn offset_at(&self, index: usize) -> u32 {
        self.offsets.get(index).copied().unwrap_or(self.code_end)
    }

    /// Instruction index at `offset`, with the end of the code mapping to
    /// one past the last instruction.
    pub fn boundary(&self, offset: u32) -> Option<usize> {
        if offset == self.code_end {
            Some(self.offsets.len())
        } else {
            self.index_of(offset)
        }
    }

    pub fn block_at(&self, offset: u32) -> Option<usize> {
        self.index_of(offset).map(|i| self.block_of[i])
    }

    pub fn block_of(&self, index: usize) -> usize {
        self.block_of[index]
    }

    pub fn reverse_postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return order;
        }
        let mut visited = vec![false; self.blocks.len()];
        let mut stack = vec![(0usize, 0usize)];
        visited[0] = true;
        while let Some((block, next)) = stack.pop() {
            if let Some(&succ) = self.blocks[block].succs.get(next) {
                stack.push((block, next + 1));
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                order.push(block);
            }
        }
        order.reverse();
        order
    }

    /// Immediate dominator of every block; the entry is its own dominator
    /// and unreachable blocks have none.
    pub fn dominators(&self) -> Vec<Option<usize>> {
        let rpo = self.reverse_postorder();
        let mut idom = vec![None; self.blocks.len()];
        let Some(&entry) = rpo.first() else { return idom };
        let mut order = vec![usize::MAX; self.blocks.len()];
        for (position, &block) in rpo.iter().enumerate() {
            order[block] = position;
        }
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &pred in &self.blocks[block].preds {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order, pred, current),
                    });
                }
                if new_idom != idom[block] {
                    idom[block] = new_idom;
                    changed = true;
                }
            }
        }
        idom
    }

    pub fn natural_loops(&self) -> Vec<NaturalLoop> {
        let idom = self.dominators();
        let mut latches: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (block, data) in self.blocks.iter().enumerate() {
            if idom[block].is_none() {
                continue;
            }
            for &succ in &data.succs {
                if dominates(&idom, succ, block) {
                    latches.entry(succ).or_default().push(block);
                }
            }
        }

        latches
            .into_iter()
            .map(|(header, latches)| {
                let mut member = vec![false; self.blocks.len()];
                member[header] = true;
                let mut work = latches;
                while let Some(block) = work.pop() {
                    if member[block] {
                        continue;
                    }
                    member[block] = true;
                    work.extend(
                        self.blocks[block].preds.iter().copied().filter(|&p| !member[p] && idom[p].is_some()),
                    );
                }
                let body = (0..self.blocks.len()).filter(|&b| member[b]).collect();
                NaturalLoop { header, body }
            })
            .collect()
    }
}

fn intersect(idom: &[Option<usize>], order: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while order[a] > order[b] {
            match idom[a] {
                Some(up) if up != a => a = up,
                _ => return b,
            }
        }
        while order[b] > order[a] {
            match idom[b] {
                Some(up) if up != b => b = up,
                _ => return a,
            }
        }
    }
    a
}

/// Whether `a` dominates `b`.
pub fn dominates(idom: &[Option<usize>], a: usize, mut b: usize) -> bool {
    loop {
        if a == b {
            return true;
        }
        match idom[b] {
            Some(up) if up != b => b = up,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{OpCode, Operand};

    fn stream(ops: &[(OpCode, Operand)]) -> Vec<Instruction> {
        let mut offset = 0;
        ops.iter()
            .map(|&(opcode, operand)| {
                let instr = Instruction::new(offset, opcode, operand);
                offset = instr.next_offset();
                instr
            })
            .collect()
    }

    // IL_0000 ldc.i4.0; IL_0001 stloc.0; IL_0002 ldloc.0; IL_0003 ldc.i4.s 10;
    // IL_0005 bge.s IL_000e; IL_0007 ldloc.0; IL_0008 ldc.i4.1; IL_0009 add;
    // IL_000a stloc.0; IL_000b br.s IL_0002; IL_000d nop; IL_000e ret
    fn counting_loop() -> Vec<Instruction> {
        stream(&[
            (OpCode::LdcI40, Operand::None),
            (OpCode::Stloc0, Operand::None),
            (OpCode::Ldloc0, Operand::None),
            (OpCode::LdcI4S, Operand::Int(10)),
            (OpCode::BgeS, Operand::Target(0x0e)),
            (OpCode::Ldloc0, Operand::None),
            (OpCode::LdcI41, Operand::None),
            (OpCode::Add, Operand::None),
            (OpCode::Stloc0, Operand::None),
            (OpCode::BrS, Operand::Target(0x02)),
            (OpCode::Nop, Operand::None),
            (OpCode::Ret, Operand::None),
        ])
    }

    #[test]
    fn blocks_and_edges() {
        let code = counting_loop();
        let cfg = ControlFlowGraph::build("P::M", &code, &[]).unwrap();
        let starts: Vec<usize> = cfg.blocks.iter().map(|b| b.first).collect();
        assert_eq!(starts, vec![0, 2, 5, 10, 11]);
        assert_eq!(cfg.blocks[1].succs, vec![2, 4]);
        assert_eq!(cfg.blocks[2].succs, vec![1]);
        assert!(cfg.blocks[3].preds.is_empty());
    }

    #[test]
    fn dominators_and_loops() {
        let cfg = ControlFlowGraph::build("P::M", &counting_loop(), &[]).unwrap();
        let idom = cfg.dominators();
        assert_eq!(idom, vec![Some(0), Some(0), Some(1), None, Some(1)]);
        assert!(dominates(&idom, 1, 2));
        assert!(!dominates(&idom, 2, 4));
        assert_eq!(cfg.natural_loops(), vec![NaturalLoop { header: 1, body: vec![1, 2] }]);
    }

    #[test]
    fn bad_targets_are_errors() {
        let code = stream(&[(OpCode::BrS, Operand::Target(1)), (OpCode::Ret, Operand::None)]);
        let err = ControlFlowGraph::build("P::M", &code, &[]).unwrap_err();
        assert!(matches!(err, RenderError::BadBranchTarget { offset: 0, target: 1, .. }));
    }
}
