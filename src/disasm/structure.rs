// This module writes a method body with its control structures made visible. Candidate regions
// come from three sources: exception clauses give protected and handler blocks, natural loops
// of the control-flow graph give loops, and forward conditional branches give if/else shapes.
// Candidates are inserted into a region tree outermost first; a candidate that is not
// single-entry, that straddles a region already in the tree, or whose condition sits outside
// its parent is dropped and its instructions stay flat. Branches that leave a region through
// one of its edges are printed as `continue`, `break`, `else` or `endif`, taken from the
// innermost region the branch belongs to.

//! Structured body rendering.

use super::disassembler::MethodContext;
use super::flow::ControlFlowGraph;
use super::output::TextOutput;
use crate::core::error::RenderError;
use crate::il::metadata::{ClauseKind, ExceptionClause};
use crate::il::opcodes::FlowControl;
use crate::il::{Instruction, OpCode};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Try,
    Handler(ClauseKind),
    Loop,
    If { cond: usize, else_start: Option<usize> },
}

impl Kind {
    /// Order among regions with the same span, outermost first.
    fn rank(self) -> u8 {
        match self {
            Kind::Try | Kind::Handler(_) => 0,
            Kind::If { .. } => 1,
            Kind::Loop => 2,
        }
    }
}

/// Instruction range `[start, end)` with its nested regions.
#[derive(Debug, Clone)]
struct Region {
    kind: Kind,
    start: usize,
    end: usize,
    children: Vec<Region>,
}

impl Region {
    fn new(kind: Kind, start: usize, end: usize) -> Self {
        Self { kind, start, end, children: Vec::new() }
    }

    fn contains(&self, other: &Region) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    fn overlaps(&self, other: &Region) -> bool {
        other.start < self.end && self.start < other.end
    }
}

pub(crate) fn write_structured(
    out: &mut TextOutput,
    ctx: &MethodContext<'_>,
    instructions: &[Instruction],
    clauses: &[ExceptionClause],
    cfg: &ControlFlowGraph,
) -> Result<(), RenderError> {
    let regions = build_regions(instructions, clauses, cfg);
    let writer = Writer { ctx, instructions, cfg };
    let mut open = Vec::new();
    writer.write_range(out, &regions, 0, instructions.len(), &mut open)
}

fn build_regions(instructions: &[Instruction], clauses: &[ExceptionClause], cfg: &ControlFlowGraph) -> Vec<Region> {
    let mut candidates = Vec::new();
    for clause in clauses {
        let spans = [
            (Kind::Try, clause.try_offset, clause.try_end()),
            (Kind::Handler(clause.kind), clause.handler_offset, clause.handler_end()),
        ];
        for (kind, start, end) in spans {
            if let (Some(start), Some(end)) = (cfg.boundary(start), cfg.boundary(end)) {
                let region = Region::new(kind, start, end);
                let duplicate = candidates
                    .iter()
                    .any(|r: &Region| r.kind == Kind::Try && kind == Kind::Try && r.start == start && r.end == end);
                if !duplicate {
                    candidates.push(region);
                }
            }
        }
    }
    candidates.extend(loop_regions(cfg));
    candidates.extend(if_regions(instructions, cfg));
    candidates.sort_by_key(|r| (r.start, Reverse(r.end), r.kind.rank()));

    let mut tree = Vec::new();
    for candidate in candidates {
        let kind = candidate.kind;
        // A then-block ending in a jump out of the enclosing loop looks like an if/else
        // whose join is the loop exit; without the else part the jump reads as `break`.
        let without_else = match kind {
            Kind::If { cond, else_start: Some(split) } => {
                Some(Region::new(Kind::If { cond, else_start: None }, candidate.start, split))
            }
            _ => None,
        };
        if insert(&mut tree, candidate) {
            continue;
        }
        match without_else {
            Some(region) if insert(&mut tree, region.clone()) => {
                log::debug!("{:?} kept without its else part", kind);
            }
            _ => log::debug!("dropping {:?} region, it does not nest", kind),
        }
    }
    tree
}

fn loop_regions(cfg: &ControlFlowGraph) -> Vec<Region> {
    let mut regions = Vec::new();
    for natural in cfg.natural_loops() {
        let start = cfg.blocks[natural.header].first;
        let end = natural.body.iter().map(|&b| cfg.blocks[b].end).max().unwrap_or(start);
        if natural.body.iter().any(|&b| cfg.blocks[b].first < start) {
            log::debug!("loop at block {} is not laid out after its head", natural.header);
            continue;
        }
        // Nothing but the head may be entered from outside the span.
        let single_entry = cfg
            .blocks
            .iter()
            .filter(|b| b.first > start && b.first < end)
            .all(|b| b.preds.iter().all(|&p| (start..end).contains(&cfg.blocks[p].first)));
        if single_entry {
            regions.push(Region::new(Kind::Loop, start, end));
        }
    }
    regions
}

fn is_jump(instr: &Instruction) -> bool {
    matches!(instr.opcode, OpCode::Br | OpCode::BrS)
}

fn if_regions(instructions: &[Instruction], cfg: &ControlFlowGraph) -> Vec<Region> {
    let n = instructions.len();
    let targets: Vec<Option<usize>> = instructions
        .iter()
        .map(|i| i.branch_target().and_then(|t| cfg.index_of(t)))
        .collect();

    let mut regions = Vec::new();
    for (cond, instr) in instructions.iter().enumerate() {
        if instr.opcode.flow() != FlowControl::CondBranch {
            continue;
        }
        let Some(target) = targets[cond] else { continue };
        let then_start = cond + 1;
        if target <= then_start {
            continue;
        }
        let mut else_start = None;
        let mut end = target;
        if let Some(join) = targets[target - 1].filter(|_| is_jump(&instructions[target - 1])) {
            if join > target && join <= n {
                else_start = Some(target);
                end = join;
            }
        }

        // 0 outside, 1 then, 2 else
        let section = |i: usize| -> u8 {
            if i >= then_start && i < end {
                if else_start.is_some_and(|e| i >= e) {
                    2
                } else {
                    1
                }
            } else {
                0
            }
        };
        let closed = targets.iter().enumerate().all(|(from, to)| match *to {
            Some(to) if from != cond => section(to) == 0 || section(to) == section(from),
            _ => true,
        });
        if closed {
            regions.push(Region::new(Kind::If { cond, else_start }, then_start, end));
        }
    }
    regions
}

fn insert(siblings: &mut Vec<Region>, region: Region) -> bool {
    for sibling in siblings.iter_mut() {
        if sibling.contains(&region) {
            if let Kind::If { else_start: Some(split), .. } = sibling.kind {
                if region.start < split && region.end > split {
                    return false;
                }
            }
            if let Kind::If { cond, .. } = region.kind {
                // A test that jumps to the loop exit reads as `break`.
                if cond < sibling.start || (sibling.kind == Kind::Loop && sibling.end == region.end) {
                    return false;
                }
            }
            return insert(&mut sibling.children, region);
        }
        if sibling.overlaps(&region) {
            return false;
        }
    }
    let at = siblings.partition_point(|s| s.start < region.start);
    siblings.insert(at, region);
    true
}

struct Writer<'a, 'm> {
    ctx: &'a MethodContext<'m>,
    instructions: &'a [Instruction],
    cfg: &'a ControlFlowGraph,
}

impl<'a> Writer<'a, '_> {
    fn write_range(
        &self,
        out: &mut TextOutput,
        regions: &'a [Region],
        start: usize,
        end: usize,
        open: &mut Vec<&'a Region>,
    ) -> Result<(), RenderError> {
        let mut next = 0;
        let mut i = start;
        while i < end {
            if let Some(region) = regions.get(next).filter(|r| r.start == i) {
                self.write_region(out, region, open)?;
                i = region.end.max(i + 1);
                next += 1;
                continue;
            }
            let pending = regions
                .get(next)
                .filter(|r| matches!(r.kind, Kind::If { cond, .. } if cond == i));
            let instr = &self.instructions[i];
            let label = self.label(instr, pending, open);
            out.write_line(&self.ctx.instruction_line(instr, label)?);
            i += 1;
        }
        Ok(())
    }

    fn write_region(
        &self,
        out: &mut TextOutput,
        region: &'a Region,
        open: &mut Vec<&'a Region>,
    ) -> Result<(), RenderError> {
        open.push(region);
        match region.kind {
            Kind::Try => {
                out.write_line(".try");
                self.write_block(out, region, region.start, region.end, open)?;
                out.write_line("} // end .try");
            }
            Kind::Handler(kind) => {
                match kind {
                    ClauseKind::Catch(token) => {
                        out.write_line(&format!("catch {}", self.ctx.names.type_token(token)?));
                    }
                    ClauseKind::Finally => out.write_line("finally"),
                }
                self.write_block(out, region, region.start, region.end, open)?;
                out.write_line("} // end handler");
            }
            Kind::Loop => {
                out.write_line(&format!("while (true) // head: IL_{:04x}", self.cfg.offset_at(region.start)));
                self.write_block(out, region, region.start, region.end, open)?;
                out.write_line("} // end while");
            }
            Kind::If { cond, else_start } => {
                out.write_line(&format!("if (IL_{:04x})", self.cfg.offset_at(cond)));
                match else_start {
                    Some(split) => {
                        self.write_block(out, region, region.start, split, open)?;
                        out.write_line("}");
                        out.write_line("else");
                        self.write_block(out, region, split, region.end, open)?;
                    }
                    None => self.write_block(out, region, region.start, region.end, open)?,
                }
                out.write_line("} // end if");
            }
        }
        open.pop();
        Ok(())
    }

    /// `{`, the indented instructions of `[start, end)`, without the closing line.
    fn write_block(
        &self,
        out: &mut TextOutput,
        region: &'a Region,
        start: usize,
        end: usize,
        open: &mut Vec<&'a Region>,
    ) -> Result<(), RenderError> {
        let first = region.children.partition_point(|c| c.start < start);
        let last = region.children.partition_point(|c| c.start < end);
        out.write_line("{");
        out.indent();
        self.write_range(out, &region.children[first..last], start, end, open)?;
        out.unindent();
        Ok(())
    }

    fn label(&self, instr: &Instruction, pending: Option<&Region>, open: &[&Region]) -> Option<&'static str> {
        let target = instr.branch_target()?;
        let offset = |index: usize| self.cfg.offset_at(index);
        if let Some(region) = pending {
            if let Kind::If { else_start, .. } = region.kind {
                if else_start.is_some_and(|e| offset(e) == target) {
                    return Some("else");
                }
                if offset(region.end) == target {
                    return Some("endif");
                }
            }
        }
        for region in open.iter().rev() {
            match region.kind {
                Kind::Loop if offset(region.start) == target => return Some("continue"),
                Kind::Loop if offset(region.end) == target => return Some("break"),
                Kind::If { .. } if offset(region.end) == target => return Some("endif"),
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::Operand;

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

    fn kinds(regions: &[Region]) -> Vec<(Kind, usize, usize)> {
        regions.iter().map(|r| (r.kind, r.start, r.end)).collect()
    }

    #[test]
    fn if_else_is_found() {
        // IL_0000 ldarg.0; IL_0001 brfalse.s IL_0006; IL_0003 ldc.i4.1; IL_0004 br.s IL_0007;
        // IL_0006 ldc.i4.2; IL_0007 ret
        let code = stream(&[
            (OpCode::Ldarg0, Operand::None),
            (OpCode::BrfalseS, Operand::Target(0x06)),
            (OpCode::LdcI41, Operand::None),
            (OpCode::BrS, Operand::Target(0x07)),
            (OpCode::LdcI42, Operand::None),
            (OpCode::Ret, Operand::None),
        ]);
        let cfg = ControlFlowGraph::build("P::M", &code, &[]).unwrap();
        let regions = build_regions(&code, &[], &cfg);
        assert_eq!(kinds(&regions), vec![(Kind::If { cond: 1, else_start: Some(4) }, 2, 5)]);
    }

    #[test]
    fn branch_into_then_block_stays_flat() {
        // IL_0000 br.s IL_0004; IL_0002 brfalse.s IL_0005; IL_0004 nop; IL_0005 ret
        let code = stream(&[
            (OpCode::BrS, Operand::Target(0x04)),
            (OpCode::BrfalseS, Operand::Target(0x05)),
            (OpCode::Nop, Operand::None),
            (OpCode::Ret, Operand::None),
        ]);
        let cfg = ControlFlowGraph::build("P::M", &code, &[]).unwrap();
        assert!(build_regions(&code, &[], &cfg).is_empty());
    }

    #[test]
    fn try_and_handler_are_siblings() {
        // IL_0000 nop; IL_0001 leave.s IL_0006; IL_0003 pop; IL_0004 leave.s IL_0006; IL_0006 ret
        let code = stream(&[
            (OpCode::Nop, Operand::None),
            (OpCode::LeaveS, Operand::Target(0x06)),
            (OpCode::Pop, Operand::None),
            (OpCode::LeaveS, Operand::Target(0x06)),
            (OpCode::Ret, Operand::None),
        ]);
        let clause = ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 3,
        };
        let cfg = ControlFlowGraph::build("P::M", &code, &[clause]).unwrap();
        let regions = build_regions(&code, &[clause], &cfg);
        assert_eq!(
            kinds(&regions),
            vec![(Kind::Try, 0, 2), (Kind::Handler(ClauseKind::Finally), 2, 4)]
        );
    }

    #[test]
    fn conditional_break_keeps_its_if_block() {
        // while (arg > 0) { if (arg == 3) break; arg--; }
        let code = stream(&[
            (OpCode::Ldarg0, Operand::None),
            (OpCode::LdcI40, Operand::None),
            (OpCode::BleS, Operand::Target(0x11)),
            (OpCode::Ldarg0, Operand::None),
            (OpCode::LdcI43, Operand::None),
            (OpCode::BneUnS, Operand::Target(0x0a)),
            (OpCode::BrS, Operand::Target(0x11)),
            (OpCode::Ldarg0, Operand::None),
            (OpCode::LdcI41, Operand::None),
            (OpCode::Sub, Operand::None),
            (OpCode::StargS, Operand::Var(0)),
            (OpCode::BrS, Operand::Target(0x00)),
            (OpCode::Ret, Operand::None),
        ]);
        let cfg = ControlFlowGraph::build("P::M", &code, &[]).unwrap();
        let regions = build_regions(&code, &[], &cfg);
        assert_eq!(kinds(&regions), vec![(Kind::Loop, 0, 12)]);
        assert_eq!(kinds(&regions[0].children), vec![(Kind::If { cond: 5, else_start: None }, 6, 7)]);
    }
}
