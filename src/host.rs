//! The host capability bundle.
//!
//! The core never owns a machine IR. Everything it needs from the surrounding
//! code generator (CFG queries, branch analysis, virtual register allocation,
//! instruction emission, predication primitives) is expressed as one trait,
//! [`HostFunc`], implemented per target for the function currently being
//! converted. The core holds the implementation only for the duration of a
//! single pass invocation.

use smallvec::SmallVec;
use std::fmt;
use std::hash::Hash;

/// Conditional-branch shape recovered from a block's terminators.
///
/// The condition always refers to the `true_target` edge; the two usual
/// encodings (conditional branch plus fall-through, conditional plus
/// unconditional) both normalize to this.
#[derive(Clone)]
pub struct AnalyzedBranch<B, C> {
    pub true_target: B,
    /// `None` when the false side is a fall-through the host does not name.
    pub false_target: Option<B>,
    pub cond: C,
}

/// Coarse classification of a body instruction, as much as the predicator
/// needs to know.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
    /// Calls are forwarded unpredicated; the host is told the live guard
    /// through [`HostFunc::predicate_call`] and applies its ABI rules.
    Call,
    /// Return instructions are never predicated.
    Return,
    /// A bundle boundary. Running into one means the pass ordering is wrong
    /// and conversion aborts.
    Bundle,
    Other,
}

/// One natural loop of the host's loop-nest forest.
///
/// `blocks` contains every block of the loop including those of nested loops,
/// the way machine loop info reports it. `children` are the directly nested
/// loops.
#[derive(Clone)]
pub struct LoopInfo<B> {
    pub header: B,
    pub blocks: Vec<B>,
    pub latches: Vec<B>,
    /// Edges `(src, dst)` with `src` inside the loop and `dst` outside.
    pub exit_edges: Vec<(B, B)>,
    pub children: Vec<LoopInfo<B>>,
}

/// Capabilities the host lends to the core for one function.
///
/// Determinism note: `blocks`, `successors` and `predecessors` must report in
/// a stable order (layout order, terminator operand order) since every
/// iteration order downstream, and with it predicate numbering and register
/// numbering, derives from them.
pub trait HostFunc {
    /// Basic block handle. `block_id` provides the stable number used in
    /// diagnostics.
    type Block: Copy + Eq + Hash + fmt::Debug;
    /// Instruction handle.
    type Inst: Copy + Eq;
    /// Virtual register handle.
    type Reg: Copy + Eq + Hash + fmt::Debug;
    /// Opaque branch-condition payload (usually an operand list).
    type Cond: Clone;

    fn name(&self) -> &str;

    // --- CFG queries ---

    fn entry_block(&self) -> Self::Block;
    /// All blocks in layout order.
    fn blocks(&self) -> Vec<Self::Block>;
    fn block_id(&self, block: Self::Block) -> u32;
    fn successors(&self, block: Self::Block) -> SmallVec<[Self::Block; 2]>;
    fn predecessors(&self, block: Self::Block) -> SmallVec<[Self::Block; 2]>;

    /// The loop-nest forest of the function, outermost loops first.
    fn loops(&self) -> Vec<LoopInfo<Self::Block>>;

    // --- instruction queries ---

    /// Instructions of a block in order.
    fn insts(&self, block: Self::Block) -> Vec<Self::Inst>;
    /// Index of the first non-phi instruction in `insts(block)`.
    fn first_non_phi(&self, block: Self::Block) -> usize;
    /// Index of the first terminator in `insts(block)`; the suffix from here
    /// on is all terminators.
    fn first_terminator(&self, block: Self::Block) -> usize;

    fn inst_kind(&self, inst: Self::Inst) -> InstKind;
    fn is_predicable(&self, inst: Self::Inst) -> bool;
    fn is_predicated(&self, inst: Self::Inst) -> bool;
    /// If `inst` is the loop-bound pseudo-op, its argument: the maximum number
    /// of taken back-edges.
    fn loop_bound_pseudo(&self, inst: Self::Inst) -> Option<u32>;

    // --- branch analysis ---

    /// Recover the conditional-branch shape of `block`'s terminators, or
    /// `None` when the terminators cannot be fully analyzed.
    fn analyze_branch(&self, block: Self::Block) -> Option<AnalyzedBranch<Self::Block, Self::Cond>>;
    /// Semantic negation of a branch condition (not a mere operand flip).
    fn negate_condition(&self, cond: Self::Cond) -> Self::Cond;
    /// Drop kill flags on the registers a condition reads. Several predicate
    /// defines may read the same condition registers.
    fn clear_kill_flags(&mut self, cond: &Self::Cond);

    // --- registers and emission ---

    /// Fresh virtual register in the predicate register class.
    fn alloc_pred_reg(&mut self) -> Self::Reg;

    /// `def <- false`, inserted at the start of `block` (used at function
    /// entry only).
    fn emit_clear_pred(&mut self, block: Self::Block, def: Self::Reg);
    /// `def <- cond`, inserted before the first terminator of `block`.
    fn emit_move_pred(&mut self, block: Self::Block, def: Self::Reg, cond: &Self::Cond);
    /// `def <- cond ? true : keep`, inserted before the first terminator of
    /// `block`. The register allocator is expected to tie `def` to `keep`.
    fn emit_select_pred(
        &mut self,
        block: Self::Block,
        def: Self::Reg,
        keep: Self::Reg,
        cond: &Self::Cond,
    );
    /// Sentinel carrying the block's live guard, inserted after the last
    /// non-terminator. Later pipeline stages that synthesize instructions
    /// inside the block read it to find their guard; the host expands it away
    /// after register allocation.
    fn emit_block_end_pred(&mut self, block: Self::Block, guard: Self::Reg);

    /// Create an empty phi at the start of `block` defining a fresh predicate
    /// register; operands are filled in with [`HostFunc::set_phi_operands`].
    fn emit_phi(&mut self, block: Self::Block) -> (Self::Inst, Self::Reg);
    fn set_phi_operands(
        &mut self,
        phi: Self::Inst,
        operands: &[(Self::Reg, Self::Block)],
    );
    /// Replace every use of `from` with `to` (phi simplification support).
    fn replace_reg_uses(&mut self, from: Self::Reg, to: Self::Reg);
    fn erase_inst(&mut self, block: Self::Block, inst: Self::Inst);

    // --- predication ---

    /// Overwrite the instruction's predicate operand pair with
    /// `(guard, not-inverted)`.
    fn set_predicate(&mut self, inst: Self::Inst, guard: Self::Reg);
    /// Tell the host which guard is live at a call site; the instruction
    /// itself is forwarded unchanged.
    fn predicate_call(&mut self, inst: Self::Inst, guard: Self::Reg);
}
