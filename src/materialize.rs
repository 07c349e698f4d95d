//! Materialization of predicate definitions.
//!
//! For every predicate with real defining edges, insert a predicate move at
//! each defining branch (before the source block's terminators), carrying the
//! branch condition or its negation depending on which edge defines. The
//! first define of an upward-exposed predicate instead becomes a conditional
//! select against a register cleared at function entry. SSA form across the
//! fresh virtual registers is kept by the incremental updater; the guard each
//! block ends up with is recorded in the use-register table.

use crate::ctrldep::PredInfo;
use crate::host::HostFunc;
use crate::ssa::SsaUpdater;
use crate::{Error, FxIndexMap, Pred};
use log::{debug, trace};

/// Insert the defines for one scope and record the guard register for every
/// block that uses one of its predicates. `use_regs` is function-wide, blocks
/// belong to exactly one scope each.
pub fn insert_pred_definitions<H: HostFunc>(
    host: &mut H,
    info: &PredInfo<H::Block>,
    use_regs: &mut FxIndexMap<H::Block, H::Reg>,
) -> Result<(), Error> {
    debug!("insert predicate definitions");
    let entry = host.entry_block();

    for i in 0..info.pred_count() {
        let p = Pred(i as u32);
        if !info.has_defs(p) {
            trace!("  skip {p}: no defining edges");
            continue;
        }

        let mut ssa = SsaUpdater::<H>::new();
        let mut init_reg = None;

        for (k, (src, dst)) in info.def_edges(p).enumerate() {
            // On the first real define: set up the updater, and emit the
            // entry clear when the predicate's value can reach a use without
            // passing any define.
            if k == 0 && info.needs_init(p) {
                let r_f = host.alloc_pred_reg();
                host.emit_clear_pred(entry, r_f);
                ssa.add_available_value(entry, r_f);
                init_reg = Some(r_f);
                trace!("  {p} is upward-exposed, cleared in {r_f:?} at entry");
            }

            // The branch condition refers to the true-target edge; defines
            // along the other edge take the semantic negation.
            let branch = host
                .analyze_branch(src)
                .ok_or_else(|| Error::UnanalyzableBranch(host.block_id(src)))?;
            let mut cond = branch.cond;
            if dst != branch.true_target {
                cond = host.negate_condition(cond);
            }

            let r_cmp = host.alloc_pred_reg();
            match init_reg {
                Some(r_f) if k == 0 => host.emit_select_pred(src, r_cmp, r_f, &cond),
                _ => host.emit_move_pred(src, r_cmp, &cond),
            }
            // Other predicates may still read the same condition registers.
            host.clear_kill_flags(&cond);

            trace!("  define {p} in b{}: {r_cmp:?}", host.block_id(src));
            ssa.add_available_value(src, r_cmp);
        }

        // Every block using p gets the value live at its end, with the
        // updater materializing join phis as needed.
        for (b, uses) in info.blocks_and_uses() {
            if uses.contains(&p) {
                let r = ssa.get_value_at_end_of_block(host, b);
                use_regs.insert(b, r);
            }
        }
    }
    Ok(())
}
