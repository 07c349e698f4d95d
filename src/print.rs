//! Human-readable dump of the analyzed scope tree, for debug logs and tests.
//!
//! One line per block with its use and define sets, nested scopes indented
//! under their header together with exit targets, latches and the loop bound.

use crate::host::HostFunc;
use crate::scope::{ScopeRef, ScopeTree};
use crate::Pred;
use itertools::Itertools;
use std::fmt::Write;

pub fn dump_scopes<H: HostFunc>(host: &H, tree: &ScopeTree<H::Block>) -> String {
    let mut out = String::new();
    dump_scope(host, tree, tree.root(), &mut out);
    out
}

fn dump_scope<H: HostFunc>(
    host: &H,
    tree: &ScopeTree<H::Block>,
    s: ScopeRef,
    out: &mut String,
) {
    let depth = tree.depth(s) as usize;
    let header = tree.header(s);

    let _ = write!(out, "{:indent$}[b{}]", "", host.block_id(header), indent = 2 * depth);
    if tree.parent(s).is_none() {
        let _ = write!(out, " (top)");
    }
    let exits: Vec<u32> = tree.succ_blocks(s).map(|b| host.block_id(b)).collect();
    if !exits.is_empty() {
        let _ = write!(out, " -> {{ {} }}", exits.iter().format(" "));
    }
    let latches: Vec<u32> = tree.latches(s).map(|b| host.block_id(b)).collect();
    if !latches.is_empty() {
        let _ = write!(out, " L {{ {} }}", latches.iter().format(" "));
    }
    if let Some(bound) = tree.loop_bound(s) {
        let _ = write!(out, " bound={bound}");
    }
    let info = tree.pred_info(s);
    let _ = write!(out, " |P|={}", info.pred_count());
    dump_use_defs(host, tree, s, header, out);

    for &b in &tree.blocks(s)[1..] {
        if let Some(child) = tree.sub_scope(s, b) {
            dump_scope(host, tree, child, out);
        } else {
            let _ = write!(out, "{:indent$}b{}", "", host.block_id(b), indent = 2 * (depth + 1));
            dump_use_defs(host, tree, s, b, out);
        }
    }
}

fn dump_use_defs<H: HostFunc>(
    host: &H,
    tree: &ScopeTree<H::Block>,
    s: ScopeRef,
    b: H::Block,
    out: &mut String,
) {
    let info = tree.pred_info(s);
    let _ = write!(out, "  u={{{}}}", info.uses(b).iter().format(", "));
    let defs: Vec<Pred> = (0..info.pred_count() as u32)
        .map(Pred)
        .filter(|&p| info.def_blocks(p).any(|src| src == b))
        .collect();
    if !defs.is_empty() {
        let _ = write!(out, " d={}", defs.iter().format(","));
    }
    let _ = writeln!(out);
}
