//! A small mock machine function implementing [`HostFunc`], enough IR for
//! the conversion scenarios: blocks hold instruction lists, terminators
//! encode the CFG, conditions are a register with a negation flag.

use singlepath::{AnalyzedBranch, HostFunc, InstKind, LoopInfo};
use smallvec::SmallVec;
use std::fmt::Write;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Bb(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Vreg(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InstRef(u32);

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MockCond {
    pub reg: Vreg,
    pub negated: bool,
}

#[derive(Clone, Debug)]
pub enum Op {
    /// Generic predicable body instruction.
    Def,
    Call,
    Ret,
    Bundle,
    LoopBound(u32),
    Br(Bb),
    CondBr { cond: MockCond, t: Bb, f: Bb },
    /// Two targets the branch analysis refuses to look at.
    OpaqueBr { t: Bb, f: Bb },
    Phi { args: Vec<(Vreg, Bb)> },
    ClearPred,
    MovePred { cond: MockCond },
    SelectPred { keep: Vreg, cond: MockCond },
    BlockEnd { live: Vreg },
}

#[derive(Clone, Debug)]
pub struct Inst {
    pub id: InstRef,
    pub op: Op,
    /// Register defined by this instruction, if any.
    pub def: Option<Vreg>,
    /// Predicate operand pair: `(guard, invert)` with invert pinned to 0.
    pub guard: Option<Vreg>,
}

impl Inst {
    fn is_terminator(&self) -> bool {
        matches!(self.op, Op::Br(_) | Op::CondBr { .. } | Op::OpaqueBr { .. } | Op::Ret)
    }
}

pub struct MockFunc {
    name: String,
    blocks: Vec<Vec<Inst>>,
    loops: Vec<LoopInfo<Bb>>,
    next_vreg: u32,
    next_inst: u32,
    /// Guards the core reported at call sites.
    pub call_guards: Vec<(InstRef, Vreg)>,
}

impl MockFunc {
    pub fn new(name: &str) -> Self {
        MockFunc {
            name: name.to_string(),
            blocks: Vec::new(),
            loops: Vec::new(),
            next_vreg: 0,
            next_inst: 0,
            call_guards: Vec::new(),
        }
    }

    pub fn add_block(&mut self) -> Bb {
        self.blocks.push(Vec::new());
        Bb(self.blocks.len() as u32 - 1)
    }

    pub fn vreg(&mut self) -> Vreg {
        self.next_vreg += 1;
        Vreg(self.next_vreg - 1)
    }

    fn push(&mut self, b: Bb, op: Op, def: Option<Vreg>) -> InstRef {
        let id = InstRef(self.next_inst);
        self.next_inst += 1;
        self.blocks[b.0 as usize].push(Inst { id, op, def, guard: None });
        id
    }

    pub fn body(&mut self, b: Bb) -> InstRef {
        self.push(b, Op::Def, None)
    }

    pub fn call(&mut self, b: Bb) -> InstRef {
        self.push(b, Op::Call, None)
    }

    pub fn bundle(&mut self, b: Bb) -> InstRef {
        self.push(b, Op::Bundle, None)
    }

    pub fn loop_bound(&mut self, b: Bb, max_backedges: u32) -> InstRef {
        self.push(b, Op::LoopBound(max_backedges), None)
    }

    pub fn br(&mut self, b: Bb, target: Bb) -> InstRef {
        self.push(b, Op::Br(target), None)
    }

    pub fn cond_br(&mut self, b: Bb, cond: Vreg, t: Bb, f: Bb) -> InstRef {
        self.push(b, Op::CondBr { cond: MockCond { reg: cond, negated: false }, t, f }, None)
    }

    pub fn opaque_br(&mut self, b: Bb, t: Bb, f: Bb) -> InstRef {
        self.push(b, Op::OpaqueBr { t, f }, None)
    }

    pub fn ret(&mut self, b: Bb) -> InstRef {
        self.push(b, Op::Ret, None)
    }

    pub fn set_loops(&mut self, loops: Vec<LoopInfo<Bb>>) {
        self.loops = loops;
    }

    // --- inspection for assertions ---

    pub fn insts_of(&self, b: Bb) -> &[Inst] {
        &self.blocks[b.0 as usize]
    }

    pub fn find_inst(&self, id: InstRef) -> &Inst {
        self.blocks
            .iter()
            .flatten()
            .find(|i| i.id == id)
            .expect("instruction was erased")
    }

    pub fn count_op(&self, b: Bb, pred: impl Fn(&Op) -> bool) -> usize {
        self.insts_of(b).iter().filter(|i| pred(&i.op)).count()
    }

    /// Full textual rendition, for whole-function comparisons.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, insts) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "b{i}:");
            for inst in insts {
                let _ = match inst.guard {
                    Some(g) => writeln!(out, "  ({g:?}) {:?} def={:?}", inst.op, inst.def),
                    None => writeln!(out, "  {:?} def={:?}", inst.op, inst.def),
                };
            }
        }
        out
    }

    fn position(&self, id: InstRef) -> (usize, usize) {
        for (bi, insts) in self.blocks.iter().enumerate() {
            if let Some(pos) = insts.iter().position(|i| i.id == id) {
                return (bi, pos);
            }
        }
        panic!("instruction was erased");
    }

    fn first_terminator_pos(&self, b: Bb) -> usize {
        let insts = &self.blocks[b.0 as usize];
        insts.iter().position(Inst::is_terminator).unwrap_or(insts.len())
    }

    fn insert_before_terminators(&mut self, b: Bb, op: Op, def: Option<Vreg>) -> InstRef {
        let pos = self.first_terminator_pos(b);
        let id = InstRef(self.next_inst);
        self.next_inst += 1;
        self.blocks[b.0 as usize].insert(pos, Inst { id, op, def, guard: None });
        id
    }
}

impl HostFunc for MockFunc {
    type Block = Bb;
    type Inst = InstRef;
    type Reg = Vreg;
    type Cond = MockCond;

    fn name(&self) -> &str {
        &self.name
    }

    fn entry_block(&self) -> Bb {
        Bb(0)
    }

    fn blocks(&self) -> Vec<Bb> {
        (0..self.blocks.len() as u32).map(Bb).collect()
    }

    fn block_id(&self, block: Bb) -> u32 {
        block.0
    }

    fn successors(&self, block: Bb) -> SmallVec<[Bb; 2]> {
        let mut succs = SmallVec::new();
        for inst in self.insts_of(block) {
            match inst.op {
                Op::Br(t) => {
                    if !succs.contains(&t) {
                        succs.push(t);
                    }
                }
                Op::CondBr { t, f, .. } | Op::OpaqueBr { t, f } => {
                    for s in [t, f] {
                        if !succs.contains(&s) {
                            succs.push(s);
                        }
                    }
                }
                _ => {}
            }
        }
        succs
    }

    fn predecessors(&self, block: Bb) -> SmallVec<[Bb; 2]> {
        (0..self.blocks.len() as u32)
            .map(Bb)
            .filter(|&p| self.successors(p).contains(&block))
            .collect()
    }

    fn loops(&self) -> Vec<LoopInfo<Bb>> {
        self.loops.clone()
    }

    fn insts(&self, block: Bb) -> Vec<InstRef> {
        self.insts_of(block).iter().map(|i| i.id).collect()
    }

    fn first_non_phi(&self, block: Bb) -> usize {
        let insts = self.insts_of(block);
        insts.iter().position(|i| !matches!(i.op, Op::Phi { .. })).unwrap_or(insts.len())
    }

    fn first_terminator(&self, block: Bb) -> usize {
        self.first_terminator_pos(block)
    }

    fn inst_kind(&self, inst: InstRef) -> InstKind {
        match self.find_inst(inst).op {
            Op::Call => InstKind::Call,
            Op::Ret => InstKind::Return,
            Op::Bundle => InstKind::Bundle,
            _ => InstKind::Other,
        }
    }

    fn is_predicable(&self, inst: InstRef) -> bool {
        matches!(
            self.find_inst(inst).op,
            Op::Def | Op::ClearPred | Op::MovePred { .. } | Op::SelectPred { .. }
        )
    }

    fn is_predicated(&self, inst: InstRef) -> bool {
        self.find_inst(inst).guard.is_some()
    }

    fn loop_bound_pseudo(&self, inst: InstRef) -> Option<u32> {
        match self.find_inst(inst).op {
            Op::LoopBound(n) => Some(n),
            _ => None,
        }
    }

    fn analyze_branch(&self, block: Bb) -> Option<AnalyzedBranch<Bb, MockCond>> {
        let insts = self.insts_of(block);
        for inst in &insts[self.first_terminator_pos(block)..] {
            if let Op::CondBr { ref cond, t, f } = inst.op {
                return Some(AnalyzedBranch {
                    true_target: t,
                    false_target: Some(f),
                    cond: cond.clone(),
                });
            }
        }
        None
    }

    fn negate_condition(&self, cond: MockCond) -> MockCond {
        MockCond { reg: cond.reg, negated: !cond.negated }
    }

    fn clear_kill_flags(&mut self, _cond: &MockCond) {}

    fn alloc_pred_reg(&mut self) -> Vreg {
        self.vreg()
    }

    fn emit_clear_pred(&mut self, block: Bb, def: Vreg) {
        let id = InstRef(self.next_inst);
        self.next_inst += 1;
        self.blocks[block.0 as usize]
            .insert(0, Inst { id, op: Op::ClearPred, def: Some(def), guard: None });
    }

    fn emit_move_pred(&mut self, block: Bb, def: Vreg, cond: &MockCond) {
        self.insert_before_terminators(block, Op::MovePred { cond: cond.clone() }, Some(def));
    }

    fn emit_select_pred(&mut self, block: Bb, def: Vreg, keep: Vreg, cond: &MockCond) {
        self.insert_before_terminators(
            block,
            Op::SelectPred { keep, cond: cond.clone() },
            Some(def),
        );
    }

    fn emit_block_end_pred(&mut self, block: Bb, guard: Vreg) {
        self.insert_before_terminators(block, Op::BlockEnd { live: guard }, None);
    }

    fn emit_phi(&mut self, block: Bb) -> (InstRef, Vreg) {
        let reg = self.vreg();
        let id = InstRef(self.next_inst);
        self.next_inst += 1;
        self.blocks[block.0 as usize]
            .insert(0, Inst { id, op: Op::Phi { args: Vec::new() }, def: Some(reg), guard: None });
        (id, reg)
    }

    fn set_phi_operands(&mut self, phi: InstRef, operands: &[(Vreg, Bb)]) {
        let (bi, pos) = self.position(phi);
        match &mut self.blocks[bi][pos].op {
            Op::Phi { args } => *args = operands.to_vec(),
            _ => panic!("not a phi"),
        }
    }

    fn replace_reg_uses(&mut self, from: Vreg, to: Vreg) {
        for insts in &mut self.blocks {
            for inst in insts {
                match &mut inst.op {
                    Op::CondBr { cond, .. }
                    | Op::MovePred { cond }
                    | Op::SelectPred { cond, .. } => {
                        if cond.reg == from {
                            cond.reg = to;
                        }
                    }
                    Op::Phi { args } => {
                        for (r, _) in args {
                            if *r == from {
                                *r = to;
                            }
                        }
                    }
                    Op::BlockEnd { live } => {
                        if *live == from {
                            *live = to;
                        }
                    }
                    _ => {}
                }
                if let Op::SelectPred { keep, .. } = &mut inst.op {
                    if *keep == from {
                        *keep = to;
                    }
                }
                if inst.guard == Some(from) {
                    inst.guard = Some(to);
                }
            }
        }
    }

    fn erase_inst(&mut self, block: Bb, inst: InstRef) {
        let insts = &mut self.blocks[block.0 as usize];
        let pos = insts.iter().position(|i| i.id == inst).expect("erasing unknown instruction");
        insts.remove(pos);
    }

    fn set_predicate(&mut self, inst: InstRef, guard: Vreg) {
        let (bi, pos) = self.position(inst);
        self.blocks[bi][pos].guard = Some(guard);
    }

    fn predicate_call(&mut self, inst: InstRef, guard: Vreg) {
        self.call_guards.push((inst, guard));
    }
}
