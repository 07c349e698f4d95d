//! Control dependence over a scope's FCFG, and its decomposition into the
//! predicate tables `K` and `R`.
//!
//! A block is control-dependent on an edge `(n, e)` iff it post-dominates the
//! edge's destination but not `n`. On the reduced acyclic graph this is a
//! short walk up the post-dominator chain per branch edge. Two additions on
//! top of the textbook walk:
//!
//! * the synthetic entry node branches to both the header (tagged with the
//!   pseudo-edge) and the exit, so the header's post-dominator spine becomes
//!   control-dependent on "the scope was entered";
//! * for every tagged exit edge, the *dual* edge (the other side of the same
//!   branch) is charged along the header's spine as well, encoding "we stay
//!   in the loop iff the branch did not exit".

use crate::dataflow::BitSet;
use crate::fcfg::{Fcfg, NodeIx};
use crate::host::HostFunc;
use crate::{Edge, Error, FxIndexMap, FxIndexSet, Pred};
use itertools::Itertools;
use log::trace;
use smallvec::SmallVec;

/// Control-dependence sets, per block. Blocks never charged (equivalently:
/// charged with the empty set) do not appear.
pub type CdMap<B> = FxIndexMap<B, FxIndexSet<Edge<B>>>;

/// Walk the post-dominator chain from `from` up to but not including
/// `stop_at`, charging `edge` to every block visited.
fn walk_pdom_chain<B: Copy + Eq + std::hash::Hash>(
    fcfg: &Fcfg<B>,
    from: NodeIx,
    stop_at: NodeIx,
    edge: Edge<B>,
    cd: &mut CdMap<B>,
) {
    let mut t = from;
    while t != stop_at {
        // Synthetic nodes bound the chain, they are never charged.
        let block = fcfg[t].block.expect("post-dominator chain escaped the scope");
        cd.entry(block).or_default().insert(edge);
        t = fcfg[t].ipdom.expect("walked past the exit node");
    }
}

/// Derive the control-dependence sets of one scope. `header` is the scope's
/// header block; the host is consulted only for the dual of exit edges.
pub fn control_dependence<H: HostFunc>(
    host: &H,
    fcfg: &Fcfg<H::Block>,
    header: H::Block,
) -> Result<CdMap<H::Block>, Error> {
    let mut cd = CdMap::default();

    for n in fcfg.depth_first() {
        if fcfg[n].num_succs() < 2 {
            continue;
        }
        let ipdom_n = fcfg[n].ipdom.expect("post-dominators not computed");
        for &(s, tag) in fcfg[n].out_edges() {
            // Untagged successors are cut back-edges, no dependence.
            if let Some(edge) = tag {
                walk_pdom_chain(fcfg, s, ipdom_n, edge, &mut cd);
            }
        }
    }

    // Exit edges keep the scope alive on their dual: charge the dual edge
    // along the header's spine, bounded by the entry node's post-dominator.
    let header_node = fcfg.node_of(header);
    let stop_at = fcfg[NodeIx::ENTRY].ipdom.expect("post-dominators not computed");
    let exit_preds: SmallVec<[NodeIx; 4]> = fcfg[NodeIx::EXIT].preds().into();
    for p in exit_preds {
        for &(s, tag) in fcfg[p].out_edges() {
            if s != NodeIx::EXIT {
                continue;
            }
            let Some(edge) = tag else { continue };
            let dual = dual_edge(host, edge)?;
            walk_pdom_chain(fcfg, header_node, stop_at, dual, &mut cd);
        }
    }

    if log::log_enabled!(log::Level::Trace) {
        trace!("control dependence:");
        for (b, deps) in &cd {
            trace!("  b{}: {{{:?}}}", host.block_id(*b), deps.iter().format(", "));
        }
    }
    Ok(cd)
}

/// The other outgoing edge of the branch `edge` leaves from. Every branch is
/// assumed binary; anything else was already rejected.
fn dual_edge<H: HostFunc>(host: &H, edge: Edge<H::Block>) -> Result<Edge<H::Block>, Error> {
    let src = edge.src.expect("exit edges have a real source");
    let succs = host.successors(src);
    if succs.len() != 2 {
        return Err(Error::UnanalyzableBranch(host.block_id(src)));
    }
    let other = succs.into_iter().find(|&s| s != edge.dst);
    other.map(|dst| Edge::new(src, dst)).ok_or(Error::UnanalyzableBranch(host.block_id(src)))
}

/// The decomposed predicate tables of one scope.
pub struct PredInfo<B> {
    /// `K`: one control-dependence set per predicate, in canonical numbering
    /// (first encounter in RPO). `K[i]` may contain pseudo-edges; those do
    /// not produce defines.
    k: Vec<FxIndexSet<Edge<B>>>,
    /// `R`: the predicates each block of the scope uses.
    uses: FxIndexMap<B, SmallVec<[Pred; 1]>>,
    /// Predicates upward-exposed at function entry, i.e. those that must be
    /// cleared to false before the function body runs. Restricted to
    /// predicates that have real defining edges; the rest have nothing to
    /// initialize against.
    init: BitSet,
}

impl<B: Copy + Eq + std::hash::Hash> PredInfo<B> {
    pub fn pred_count(&self) -> usize {
        self.k.len()
    }

    /// The predicates block `b` uses; empty only for blocks outside the
    /// scope.
    pub fn uses(&self, b: B) -> &[Pred] {
        self.uses.get(&b).map_or(&[][..], |v| &v[..])
    }

    pub fn blocks_and_uses(&self) -> impl Iterator<Item = (B, &[Pred])> + '_ {
        self.uses.iter().map(|(&b, v)| (b, &v[..]))
    }

    pub fn cd_set(&self, p: Pred) -> &FxIndexSet<Edge<B>> {
        &self.k[p.index()]
    }

    /// Real defining edges of `p`, in insertion order; pseudo-edges are
    /// filtered out here.
    pub fn def_edges(&self, p: Pred) -> impl Iterator<Item = (B, B)> + '_ {
        self.k[p.index()].iter().filter_map(|e| e.src.map(|src| (src, e.dst)))
    }

    pub fn has_defs(&self, p: Pred) -> bool {
        self.def_edges(p).next().is_some()
    }

    /// Blocks that define `p` (sources of its real defining edges).
    pub fn def_blocks(&self, p: Pred) -> impl Iterator<Item = B> + '_ {
        self.def_edges(p).map(|(src, _)| src)
    }

    pub fn needs_init(&self, p: Pred) -> bool {
        self.init.contains(p.index())
    }

    pub fn init_set(&self) -> &BitSet {
        &self.init
    }

    pub(crate) fn set_init(&mut self, init: BitSet) {
        self.init = init;
    }
}

/// Compress the control-dependence sets by equality, iterating the scope's
/// blocks in RPO. The index a set first appears at is the canonical predicate
/// number; the linear search is deliberate, `K` stays small in practice.
pub fn decompose<B: Copy + Eq + std::hash::Hash + std::fmt::Debug>(
    blocks: &[B],
    cd: &CdMap<B>,
) -> PredInfo<B> {
    let empty = FxIndexSet::default();
    let mut k: Vec<FxIndexSet<Edge<B>>> = Vec::new();
    let mut uses = FxIndexMap::default();

    for &b in blocks {
        let t = cd.get(&b).unwrap_or(&empty);
        let p = match k.iter().position(|s| s == t) {
            Some(q) => Pred(q as u32),
            None => {
                k.push(t.clone());
                Pred(k.len() as u32 - 1)
            }
        };
        let prev = uses.insert(b, SmallVec::from_iter([p]));
        debug_assert!(prev.is_none(), "block {b:?} decomposed twice");
    }

    if log::log_enabled!(log::Level::Trace) {
        trace!("decomposed control dependence, |K| = {}:", k.len());
        for (b, ps) in &uses {
            trace!("  R({b:?}) = {{{}}}", ps.iter().format(", "));
        }
        for (i, s) in k.iter().enumerate() {
            trace!("  K(p{i}) = {{{:?}}}", s.iter().format(", "));
        }
    }

    PredInfo { k, uses, init: BitSet::new(0) }
}
