//! Upwards-exposed predicate uses.
//!
//! A backward dataflow problem on the original host CFG: a predicate use is
//! upward-exposed at function entry when some path from the entry reaches the
//! use without passing a block that defines the predicate. Such predicates
//! must be cleared to false before the function body runs, everything else is
//! guaranteed a definition on every path.

use crate::ctrldep::PredInfo;
use crate::host::HostFunc;
use crate::{FxIndexMap, Pred};
use itertools::Itertools;
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use std::collections::VecDeque;

/// Dense bit set over predicate indices. Predicate counts are small, one
/// inline word nearly always suffices.
#[derive(Clone, PartialEq, Eq)]
pub struct BitSet {
    words: SmallVec<[u64; 1]>,
    len: usize,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        BitSet { words: smallvec![0; len.div_ceil(64)], len }
    }

    pub fn insert(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] |= 1 << (i % 64);
    }

    pub fn contains(&self, i: usize) -> bool {
        i < self.len && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] &= !(1 << (i % 64));
    }

    pub fn set_all(&mut self) {
        for (w, word) in self.words.iter_mut().enumerate() {
            let bits = self.len - w * 64;
            *word = if bits >= 64 { !0 } else { (1u64 << bits) - 1 };
        }
    }

    pub fn union_with(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    pub fn subtract(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !o;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.contains(i))
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.iter().map(|i| format!("p{i}")).format(", "))
    }
}

/// Solve the upwards-exposed-uses equations for one scope's predicates over
/// the whole function CFG and return the initialization set: the predicates
/// live into the entry block, restricted to those that have defining edges.
///
/// `gen[B]` is `R[B]`, `kill[B]` the predicates `B` defines; the backward
/// equation is `in[B] = (U in[succs]) \ kill[B] U gen[B]`. The worklist is
/// seeded in depth-first post-order so the function exit comes first; its
/// in-set is forced to all-ones (the out-set of the exit is top) and the
/// block discarded.
pub fn upwards_exposed_uses<H: HostFunc>(host: &H, info: &PredInfo<H::Block>) -> BitSet {
    let n = info.pred_count();

    let mut gen: FxHashMap<H::Block, BitSet> = FxHashMap::default();
    let mut kill: FxHashMap<H::Block, BitSet> = FxHashMap::default();
    for (b, uses) in info.blocks_and_uses() {
        let set = gen.entry(b).or_insert_with(|| BitSet::new(n));
        for p in uses {
            set.insert(p.index());
        }
    }
    for i in 0..n {
        for src in info.def_blocks(Pred(i as u32)) {
            kill.entry(src).or_insert_with(|| BitSet::new(n)).insert(i);
        }
    }

    // Seed the worklist with the blocks in depth-first post-order. The
    // function exit (the unique block without successors) has its in-set
    // forced to top and keeps it; its out-set has nothing to say.
    let entry = host.entry_block();
    let po = cfg_post_order(host, entry);
    let exit = po
        .iter()
        .copied()
        .find(|&b| host.successors(b).is_empty())
        .expect("single-exit was validated before analysis");
    let mut live_in: FxIndexMap<H::Block, BitSet> = po
        .iter()
        .map(|&b| (b, gen.get(&b).cloned().unwrap_or_else(|| BitSet::new(n))))
        .collect();
    live_in[&exit].set_all();
    let mut worklist: VecDeque<H::Block> = po.into_iter().collect();

    while let Some(b) = worklist.pop_front() {
        if b == exit {
            continue;
        }
        let mut out = BitSet::new(n);
        for s in host.successors(b) {
            if let Some(i) = live_in.get(&s) {
                out.union_with(i);
            }
        }
        if let Some(k) = kill.get(&b) {
            out.subtract(k);
        }
        if let Some(g) = gen.get(&b) {
            out.union_with(g);
        }
        if out != live_in[&b] {
            trace!("  update in(b{}) = {out:?}", host.block_id(b));
            live_in[&b] = out;
            for p in host.predecessors(b) {
                worklist.push_back(p);
            }
        }
    }

    let mut init = live_in.swap_remove(&entry).unwrap_or_else(|| BitSet::new(n));
    // Predicates without real defining edges (the header predicate, and any
    // set consisting solely of the entry pseudo-edge) have no definition to
    // initialize against; they are implicitly true for the scope.
    for i in 0..n {
        if !info.has_defs(Pred(i as u32)) {
            init.remove(i);
        }
    }
    trace!("initialization set: {init:?}");
    init
}

fn cfg_post_order<H: HostFunc>(host: &H, entry: H::Block) -> Vec<H::Block> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    seen.insert(entry);
    cfg_post_order_from(host, entry, &mut seen, &mut out);
    out
}

fn cfg_post_order_from<H: HostFunc>(
    host: &H,
    b: H::Block,
    seen: &mut FxHashSet<H::Block>,
    out: &mut Vec<H::Block>,
) {
    for s in host.successors(b) {
        if seen.insert(s) {
            cfg_post_order_from(host, s, seen, out);
        }
    }
    out.push(b);
}
