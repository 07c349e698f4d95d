//! Application of the computed guards to the instructions of a scope.
//!
//! Every block with a recorded use register gets its body instructions (first
//! non-phi up to the first terminator) predicated, and a block-end sentinel
//! carrying the live guard so that instructions synthesized by later pipeline
//! stages can find theirs. Returns are skipped, calls are forwarded to the
//! host with the guard, bundles mean the pass ran too late and abort.

use crate::host::{HostFunc, InstKind};
use crate::scope::{ScopeRef, ScopeTree};
use crate::{Error, FxIndexMap};
use log::{debug, trace};

pub fn apply_predicates<H: HostFunc>(
    host: &mut H,
    tree: &ScopeTree<H::Block>,
    scope: ScopeRef,
    use_regs: &FxIndexMap<H::Block, H::Reg>,
) -> Result<(), Error> {
    debug!("apply predicates in scope headed by b{}", host.block_id(tree.header(scope)));

    for &b in tree.blocks(scope) {
        // Sub-headers are predicated in their own scope.
        if tree.is_sub_header(scope, b) {
            continue;
        }
        let Some(&guard) = use_regs.get(&b) else {
            trace!("  skip b{}: no guard", host.block_id(b));
            continue;
        };
        trace!("  guarding b{} with {guard:?}", host.block_id(b));

        let insts = host.insts(b);
        for &inst in &insts[host.first_non_phi(b)..host.first_terminator(b)] {
            match host.inst_kind(inst) {
                InstKind::Bundle => return Err(Error::BundledInst(host.block_id(b))),
                InstKind::Return => {
                    trace!("    skip return");
                }
                InstKind::Call => {
                    // The host decides what the ABI needs around a guarded
                    // call; the instruction itself stays untouched.
                    host.predicate_call(inst, guard);
                }
                InstKind::Other => {
                    if !host.is_predicable(inst) {
                        continue;
                    }
                    if host.is_predicated(inst) {
                        // Fusing an existing predicate is the caller's
                        // business.
                        trace!("    already predicated, left alone");
                        continue;
                    }
                    host.set_predicate(inst, guard);
                }
            }
        }

        host.emit_block_end_pred(b, guard);
    }
    Ok(())
}
