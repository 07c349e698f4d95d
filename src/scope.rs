//! The scope tree: the loop-nest forest of a function, extended with the
//! whole function as root.
//!
//! Each scope owns the blocks whose innermost containing loop it is (the root
//! owns everything outside any loop), knows its header, latches, exit edges
//! and loop bound, and carries the predicate tables once analysis has run.
//! Headers of nested scopes additionally appear in their parent's block list,
//! standing in for the whole collapsed loop there.

use crate::ctrldep::PredInfo;
use crate::host::{HostFunc, LoopInfo};
use crate::{Error, FxIndexMap, FxIndexSet};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::Hash;

/// Index of a scope in its function's [`ScopeTree`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScopeRef(u32);

impl ScopeRef {
    pub const ROOT: ScopeRef = ScopeRef(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

struct ScopeData<B> {
    parent: Option<ScopeRef>,
    depth: u32,
    /// Header first; replaced by FCFG reverse post-order during analysis.
    blocks: Vec<B>,
    /// Nested scopes by their header, in loop-forest order.
    sub_scopes: FxIndexMap<B, ScopeRef>,
    latches: FxIndexSet<B>,
    exit_edges: Vec<(B, B)>,
    /// Maximum number of header visits, or `None` for the root (and for
    /// loops that carry no bound pseudo-op).
    loop_bound: Option<u32>,
    pred_info: Option<PredInfo<B>>,
}

/// Visitor over the final single-path layout, depth-first through the scope
/// tree: nested scopes are entered in place of their header.
pub trait ScopeWalker<B> {
    fn enter_scope(&mut self, _tree: &ScopeTree<B>, _scope: ScopeRef) {}
    fn next_block(&mut self, block: B);
    fn exit_scope(&mut self, _tree: &ScopeTree<B>, _scope: ScopeRef) {}
}

pub struct ScopeTree<B> {
    scopes: Vec<ScopeData<B>>,
    /// Innermost owner of each block; sub-headers map to their own scope.
    owner: FxHashMap<B, ScopeRef>,
}

impl<B: Copy + Eq + Hash + fmt::Debug> ScopeTree<B> {
    /// Build the scope tree of a function from its loop-nest forest, validate
    /// the structural preconditions, and assign every block to its innermost
    /// scope.
    pub fn build<H: HostFunc<Block = B>>(host: &H) -> Result<Self, Error> {
        let blocks = host.blocks();

        // Single-path conversion needs a unique function exit.
        let exits = blocks.iter().filter(|&&b| host.successors(b).is_empty()).count();
        if exits != 1 {
            return Err(Error::MultipleExits(exits));
        }
        // Branches must be binary throughout.
        for &b in &blocks {
            if host.successors(b).len() > 2 {
                return Err(Error::TooManySuccessors(host.block_id(b)));
            }
        }

        let mut tree = ScopeTree {
            scopes: vec![ScopeData {
                parent: None,
                depth: 0,
                blocks: vec![host.entry_block()],
                sub_scopes: FxIndexMap::default(),
                latches: FxIndexSet::default(),
                exit_edges: Vec::new(),
                loop_bound: None,
                pred_info: None,
            }],
            owner: FxHashMap::default(),
        };

        for l in host.loops() {
            tree.add_loop(host, ScopeRef::ROOT, &l)?;
        }

        // Distribute the remaining blocks, in layout order: each block goes
        // to its innermost scope, sub-headers also join their parent's list.
        for &b in &blocks {
            let owner = tree.owner.get(&b).copied().unwrap_or(ScopeRef::ROOT);
            let is_sub_header = tree.scopes[owner.index()].blocks.first() == Some(&b)
                && owner != ScopeRef::ROOT;
            if is_sub_header {
                // The parent list may already lead with this block, when a
                // loop header doubles as the parent's own header.
                let parent = tree.scopes[owner.index()].parent.unwrap();
                if tree.scopes[parent.index()].blocks.first() != Some(&b) {
                    tree.scopes[parent.index()].blocks.push(b);
                }
            } else if tree.scopes[owner.index()].blocks.first() != Some(&b) {
                tree.scopes[owner.index()].blocks.push(b);
            }
        }

        debug!(
            "scope tree of `{}`: {} scope(s) over {} block(s)",
            host.name(),
            tree.scopes.len(),
            blocks.len()
        );
        Ok(tree)
    }

    fn add_loop<H: HostFunc<Block = B>>(
        &mut self,
        host: &H,
        parent: ScopeRef,
        l: &LoopInfo<B>,
    ) -> Result<(), Error> {
        let header = l.header;
        let members: FxIndexSet<B> = l.blocks.iter().copied().collect();

        // Reducibility: the header is the loop's only entry point, and every
        // latch actually re-enters it.
        for &b in &l.blocks {
            if b == header {
                continue;
            }
            for p in host.predecessors(b) {
                if !members.contains(&p) {
                    return Err(Error::IrreducibleLoop {
                        block: host.block_id(b),
                        header: host.block_id(header),
                    });
                }
            }
        }
        for &latch in &l.latches {
            if !members.contains(&latch) || !host.successors(latch).contains(&header) {
                return Err(Error::IrreducibleLoop {
                    block: host.block_id(latch),
                    header: host.block_id(header),
                });
            }
        }

        // The loop-bound pseudo carries the maximum number of taken
        // back-edges; the bound counts header visits.
        let mut loop_bound = None;
        for inst in host.insts(header) {
            if let Some(n) = host.loop_bound_pseudo(inst) {
                loop_bound = Some(n + 1);
                break;
            }
        }
        if loop_bound.is_none() {
            warn!(
                "loop headed by b{} has no bound, downstream timing analysis will complain",
                host.block_id(header)
            );
        }

        let depth = self.scopes[parent.index()].depth + 1;
        let scope = ScopeRef(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            parent: Some(parent),
            depth,
            blocks: vec![header],
            sub_scopes: FxIndexMap::default(),
            latches: l.latches.iter().copied().collect(),
            exit_edges: l.exit_edges.clone(),
            loop_bound,
            pred_info: None,
        });
        self.scopes[parent.index()].sub_scopes.insert(header, scope);

        // Innermost ownership: claim all loop blocks, nested loops re-claim
        // theirs afterwards.
        for &b in &l.blocks {
            self.owner.insert(b, scope);
        }
        for child in &l.children {
            self.add_loop(host, scope, child)?;
        }
        Ok(())
    }

    // --- queries ---

    pub fn root(&self) -> ScopeRef {
        ScopeRef::ROOT
    }

    pub fn num_scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn header(&self, s: ScopeRef) -> B {
        self.scopes[s.index()].blocks[0]
    }

    pub fn blocks(&self, s: ScopeRef) -> &[B] {
        &self.scopes[s.index()].blocks
    }

    pub fn parent(&self, s: ScopeRef) -> Option<ScopeRef> {
        self.scopes[s.index()].parent
    }

    pub fn depth(&self, s: ScopeRef) -> u32 {
        self.scopes[s.index()].depth
    }

    pub fn loop_bound(&self, s: ScopeRef) -> Option<u32> {
        self.scopes[s.index()].loop_bound
    }

    pub fn latches(&self, s: ScopeRef) -> impl Iterator<Item = B> + '_ {
        self.scopes[s.index()].latches.iter().copied()
    }

    pub fn exit_edges(&self, s: ScopeRef) -> &[(B, B)] {
        &self.scopes[s.index()].exit_edges
    }

    /// Destinations of the scope's exit edges, the blocks control continues
    /// at once the scope is done.
    pub fn succ_blocks(&self, s: ScopeRef) -> impl Iterator<Item = B> + '_ {
        self.scopes[s.index()].exit_edges.iter().map(|&(_, dst)| dst)
    }

    pub fn is_header(&self, s: ScopeRef, b: B) -> bool {
        self.header(s) == b
    }

    pub fn is_member(&self, s: ScopeRef, b: B) -> bool {
        self.scopes[s.index()].blocks.contains(&b)
    }

    /// Is `b` the header of a scope directly nested in `s`?
    pub fn is_sub_header(&self, s: ScopeRef, b: B) -> bool {
        self.scopes[s.index()].sub_scopes.contains_key(&b)
    }

    pub fn sub_scope(&self, s: ScopeRef, header: B) -> Option<ScopeRef> {
        self.scopes[s.index()].sub_scopes.get(&header).copied()
    }

    pub fn sub_scopes(&self, s: ScopeRef) -> impl Iterator<Item = ScopeRef> + '_ {
        self.scopes[s.index()].sub_scopes.values().copied()
    }

    pub fn pred_info(&self, s: ScopeRef) -> &PredInfo<B> {
        self.scopes[s.index()].pred_info.as_ref().expect("scope not analyzed yet")
    }

    pub(crate) fn set_pred_info(&mut self, s: ScopeRef, info: PredInfo<B>) {
        self.scopes[s.index()].pred_info = Some(info);
    }

    /// Replace the block order with the FCFG reverse post-order; the header
    /// must stay at index 0.
    pub(crate) fn set_rpo(&mut self, s: ScopeRef, rpo: Vec<B>) {
        debug_assert_eq!(rpo.first(), Some(&self.header(s)));
        self.scopes[s.index()].blocks = rpo;
    }

    /// Scopes with children before parents; the order conversion processes
    /// them in, so a collapsed nested loop is already predicated when its
    /// parent looks at it.
    pub fn post_order(&self) -> Vec<ScopeRef> {
        let mut out = Vec::with_capacity(self.scopes.len());
        self.post_order_from(ScopeRef::ROOT, &mut out);
        out
    }

    fn post_order_from(&self, s: ScopeRef, out: &mut Vec<ScopeRef>) {
        let children: Vec<ScopeRef> = self.sub_scopes(s).collect();
        for c in children {
            self.post_order_from(c, out);
        }
        out.push(s);
    }

    // --- layout ---

    /// Drive a [`ScopeWalker`] over the final single-path layout.
    pub fn walk(&self, walker: &mut impl ScopeWalker<B>) {
        self.walk_scope(ScopeRef::ROOT, walker);
    }

    fn walk_scope(&self, s: ScopeRef, walker: &mut impl ScopeWalker<B>) {
        walker.enter_scope(self, s);
        for &b in self.blocks(s) {
            match self.sub_scope(s, b) {
                Some(child) => self.walk_scope(child, walker),
                None => walker.next_block(b),
            }
        }
        walker.exit_scope(self, s);
    }

    /// The stitched block sequence of the whole function.
    pub fn layout_order(&self) -> Vec<B> {
        struct Collect<B>(Vec<B>);
        impl<B: Copy + Eq + Hash + fmt::Debug> ScopeWalker<B> for Collect<B> {
            fn next_block(&mut self, block: B) {
                self.0.push(block);
            }
        }
        let mut c = Collect(Vec::new());
        self.walk(&mut c);
        c.0
    }
}
