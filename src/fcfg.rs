//! Per-scope reduced flow graph (FCFG) and its post-dominators.
//!
//! The FCFG contains one node per block of the scope plus two synthetic
//! nodes, entry and exit. Back-edges of the scope are cut (re-routed to the
//! exit node untagged), exits from the scope are re-routed to the exit node
//! tagged with the leaving edge, and nested loops are collapsed into their
//! header node with the nested exit edges as outgoing edges. The result is a
//! DAG on which post-dominance is well defined, which is all the control
//! dependence analysis needs.
//!
//! Nodes live in a per-scope arena and are addressed by [`NodeIx`]; adjacency
//! is index vectors.

use crate::Edge;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::fmt;
use std::hash::Hash;
use std::ops::Index;

/// Index of a node in its scope's [`Fcfg`] arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeIx(u32);

impl NodeIx {
    /// The synthetic entry node, `nentry`.
    pub const ENTRY: NodeIx = NodeIx(0);
    /// The synthetic exit node, `nexit`. Every exit edge and every cut
    /// back-edge of the scope points here.
    pub const EXIT: NodeIx = NodeIx(1);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_synthetic(self) -> bool {
        self == Self::ENTRY || self == Self::EXIT
    }
}

impl fmt::Debug for NodeIx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NodeIx::ENTRY => write!(f, "_S"),
            NodeIx::EXIT => write!(f, "_T"),
            NodeIx(i) => write!(f, "n{i}"),
        }
    }
}

const PO_UNVISITED: u32 = !0;

pub struct Node<B> {
    /// The host block, or `None` for the two synthetic nodes.
    pub block: Option<B>,
    /// Outgoing edges with their tag. Untagged successors are cut back-edges
    /// (or the terminating pseudo-successor); they carry no control
    /// dependence.
    succs: SmallVec<[(NodeIx, Option<Edge<B>>); 2]>,
    preds: SmallVec<[NodeIx; 2]>,
    /// Post-order number of the *reversed* graph, assigned by
    /// [`Fcfg::postdominators`].
    pub po: u32,
    /// Immediate post-dominator; the exit node post-dominates itself.
    pub ipdom: Option<NodeIx>,
}

impl<B: Copy> Node<B> {
    pub fn out_edges(&self) -> &[(NodeIx, Option<Edge<B>>)] {
        &self.succs
    }

    pub fn preds(&self) -> &[NodeIx] {
        &self.preds
    }

    pub fn num_succs(&self) -> usize {
        self.succs.len()
    }
}

pub struct Fcfg<B> {
    nodes: Vec<Node<B>>,
    node_of: FxHashMap<B, NodeIx>,
}

impl<B> Index<NodeIx> for Fcfg<B> {
    type Output = Node<B>;

    fn index(&self, ix: NodeIx) -> &Node<B> {
        &self.nodes[ix.index()]
    }
}

impl<B: Copy + Eq + Hash + fmt::Debug> Fcfg<B> {
    /// Build the reduced graph for a scope.
    ///
    /// `blocks` is the scope's block list with the header first;
    /// `scope_out_edges` yields the outgoing edges of a member block, which
    /// for a nested-scope header are the nested scope's exit edges (the
    /// collapse) and plain host successor edges otherwise.
    pub fn build(
        header: B,
        blocks: &[B],
        mut scope_out_edges: impl FnMut(B) -> SmallVec<[(B, B); 2]>,
    ) -> Self {
        let mut g = Fcfg {
            nodes: Vec::with_capacity(blocks.len() + 2),
            node_of: FxHashMap::default(),
        };
        g.alloc(None); // ENTRY
        g.alloc(None); // EXIT

        let header_node = g.node_for(header);
        g.connect(NodeIx::ENTRY, header_node, Some(Edge::pseudo(header)));
        // The entry also reaches the exit directly, so that the header's
        // immediate post-dominator chain, not the header itself, bounds the
        // walks rooted at the entry node.
        g.connect(NodeIx::ENTRY, NodeIx::EXIT, None);

        let body: FxHashSet<B> = blocks[1..].iter().copied().collect();
        for &b in blocks {
            let n = g.node_for(b);
            let out = scope_out_edges(b);
            if out.is_empty() {
                // A terminating node with neither exits nor back-edges.
                g.connect(n, NodeIx::EXIT, None);
                continue;
            }
            for (src, dst) in out {
                if body.contains(&dst) {
                    let t = g.node_for(dst);
                    g.connect(n, t, Some(Edge::new(src, dst)));
                } else if dst == header {
                    // Back-edge; cut, and not worth a tag.
                    g.connect(n, NodeIx::EXIT, None);
                } else {
                    g.connect(n, NodeIx::EXIT, Some(Edge::new(src, dst)));
                }
            }
        }
        g
    }

    fn alloc(&mut self, block: Option<B>) -> NodeIx {
        let ix = NodeIx(self.nodes.len() as u32);
        self.nodes.push(Node {
            block,
            succs: SmallVec::new(),
            preds: SmallVec::new(),
            po: PO_UNVISITED,
            ipdom: None,
        });
        ix
    }

    fn node_for(&mut self, block: B) -> NodeIx {
        if let Some(&n) = self.node_of.get(&block) {
            return n;
        }
        let n = self.alloc(Some(block));
        self.node_of.insert(block, n);
        n
    }

    fn connect(&mut self, from: NodeIx, to: NodeIx, tag: Option<Edge<B>>) {
        self.nodes[from.index()].succs.push((to, tag));
        self.nodes[to.index()].preds.push(from);
    }

    pub fn node_of(&self, block: B) -> NodeIx {
        self.node_of[&block]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ixs(&self) -> impl Iterator<Item = NodeIx> {
        (0..self.nodes.len() as u32).map(NodeIx)
    }

    /// Scope blocks in reverse post-order of the FCFG; the header comes out
    /// first by construction (the entry's only block successor).
    pub fn rpo_blocks(&self) -> Vec<B> {
        let mut seen = vec![false; self.nodes.len()];
        let mut post = Vec::with_capacity(self.nodes.len());
        self.post_order(NodeIx::ENTRY, &mut seen, &mut post);
        post.iter().rev().filter_map(|&n| self[n].block).collect()
    }

    fn post_order(&self, n: NodeIx, seen: &mut [bool], out: &mut Vec<NodeIx>) {
        seen[n.index()] = true;
        // Successors are visited in reverse so that the final reversal keeps
        // them in their original order where nothing forces otherwise.
        for &(s, _) in self[n].out_edges().iter().rev() {
            if !seen[s.index()] {
                self.post_order(s, seen, out);
            }
        }
        out.push(n);
    }

    /// Nodes in depth-first pre-order from the entry; the order the control
    /// dependence walk charges edges in.
    pub fn depth_first(&self) -> Vec<NodeIx> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.nodes.len());
        self.pre_order(NodeIx::ENTRY, &mut seen, &mut out);
        out
    }

    fn pre_order(&self, n: NodeIx, seen: &mut [bool], out: &mut Vec<NodeIx>) {
        seen[n.index()] = true;
        out.push(n);
        for &(s, _) in self[n].out_edges() {
            if !seen[s.index()] {
                self.pre_order(s, seen, out);
            }
        }
    }

    /// Compute immediate post-dominators with the single-pass
    /// Cooper/Harvey/Kennedy scheme: generate a post-order numbering of the
    /// reversed graph, then intersect over successors in one sweep (the graph
    /// is acyclic, so one pass suffices).
    pub fn postdominators(&mut self) {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        self.rdfs(NodeIx::EXIT, &mut seen, &mut order);
        debug_assert!(
            self.nodes.iter().all(|n| n.po != PO_UNVISITED),
            "every FCFG node must reach the exit"
        );

        self.nodes[NodeIx::EXIT.index()].ipdom = Some(NodeIx::EXIT);

        for &n in order.iter().rev().skip(1) {
            let succs: SmallVec<[NodeIx; 2]> =
                self[n].out_edges().iter().map(|&(s, _)| s).collect();
            let mut new_ipdom = None;
            for s in succs {
                new_ipdom = self.intersect(new_ipdom, s);
            }
            self.nodes[n.index()].ipdom = new_ipdom;
        }
    }

    /// Depth-first search of the reversed graph, numbering nodes in
    /// post-order.
    fn rdfs(&mut self, n: NodeIx, seen: &mut [bool], order: &mut Vec<NodeIx>) {
        seen[n.index()] = true;
        let preds: SmallVec<[NodeIx; 2]> = self[n].preds.clone();
        for p in preds {
            if !seen[p.index()] {
                self.rdfs(p, seen, order);
            }
        }
        self.nodes[n.index()].po = order.len() as u32;
        order.push(n);
    }

    fn intersect(&self, a: Option<NodeIx>, b: NodeIx) -> Option<NodeIx> {
        if self[b].ipdom.is_none() {
            return a;
        }
        let mut f1 = match a {
            Some(a) => a,
            None => return Some(b),
        };
        let mut f2 = b;
        while self[f1].po != self[f2].po {
            while self[f1].po < self[f2].po {
                f1 = self[f1].ipdom.unwrap();
            }
            while self[f2].po < self[f1].po {
                f2 = self[f2].ipdom.unwrap();
            }
        }
        Some(f1)
    }
}
