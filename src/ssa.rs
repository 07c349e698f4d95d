//! Incremental SSA maintenance for a single predicate register.
//!
//! The materializer emits several definitions of the "same" predicate (one
//! per defining edge, each into a fresh virtual register) and then needs the
//! value live at the end of arbitrary blocks. This updater reconstructs that
//! value on demand, placing phis at joins as it walks predecessors, after the
//! on-demand construction of Braun et al.; trivial phis are removed again
//! before anyone sees them. The observable contract: one defining value per
//! block at block end.
//!
//! One updater instance serves one predicate; the materializer creates a
//! fresh one per predicate, mirroring how an `SSAUpdater` is re-initialized
//! per variable.

use crate::host::HostFunc;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

struct PhiRecord<H: HostFunc> {
    block: H::Block,
    inst: H::Inst,
    operands: SmallVec<[(H::Reg, H::Block); 2]>,
}

pub struct SsaUpdater<H: HostFunc> {
    /// Value known to be live at the end of a block.
    avail: FxHashMap<H::Block, H::Reg>,
    phis: FxHashMap<H::Reg, PhiRecord<H>>,
}

impl<H: HostFunc> SsaUpdater<H> {
    pub fn new() -> Self {
        SsaUpdater { avail: FxHashMap::default(), phis: FxHashMap::default() }
    }

    /// Record `reg` as the value this predicate has at the end of `block`.
    pub fn add_available_value(&mut self, block: H::Block, reg: H::Reg) {
        self.avail.insert(block, reg);
    }

    /// The value live at the end of `block`, materializing phis at joins on
    /// the way. Every queried block must be reachable from a block with an
    /// available value; the initialization analysis guarantees that for every
    /// predicate that gets here.
    pub fn get_value_at_end_of_block(&mut self, host: &mut H, block: H::Block) -> H::Reg {
        if let Some(&r) = self.avail.get(&block) {
            return r;
        }
        self.read_through_preds(host, block)
    }

    fn read_through_preds(&mut self, host: &mut H, block: H::Block) -> H::Reg {
        let preds = host.predecessors(block);
        let value = match preds.len() {
            0 => unreachable!(
                "predicate queried at {block:?} but undefined at function entry; \
                 the initialization analysis should have cleared it"
            ),
            1 => self.get_value_at_end_of_block(host, preds[0]),
            _ => {
                // Break cycles through loops by publishing the phi before
                // filling its operands.
                let (inst, reg) = host.emit_phi(block);
                self.avail.insert(block, reg);
                let operands: SmallVec<[(H::Reg, H::Block); 2]> = preds
                    .into_iter()
                    .map(|p| (self.get_value_at_end_of_block(host, p), p))
                    .collect();
                host.set_phi_operands(inst, &operands);
                self.phis.insert(reg, PhiRecord { block, inst, operands });
                self.try_remove_trivial_phi(host, reg)
            }
        };
        self.avail.insert(block, value);
        value
    }

    /// A phi whose operands are all the same value (or itself) is replaced by
    /// that value; the replacement can make other phis trivial in turn.
    fn try_remove_trivial_phi(&mut self, host: &mut H, phi_reg: H::Reg) -> H::Reg {
        let mut same = None;
        for &(r, _) in &self.phis[&phi_reg].operands {
            if r == phi_reg || Some(r) == same {
                continue;
            }
            if same.is_some() {
                return phi_reg; // merges at least two values
            }
            same = Some(r);
        }
        let same = same.expect("phi references only itself");

        let record = self.phis.remove(&phi_reg).unwrap();
        host.replace_reg_uses(phi_reg, same);
        host.erase_inst(record.block, record.inst);

        for v in self.avail.values_mut() {
            if *v == phi_reg {
                *v = same;
            }
        }

        // Rewrite the remaining phi records and revisit any that used the
        // removed phi.
        let users: Vec<H::Reg> = self
            .phis
            .iter_mut()
            .filter_map(|(&r, rec)| {
                let mut used = false;
                for op in &mut rec.operands {
                    if op.0 == phi_reg {
                        op.0 = same;
                        used = true;
                    }
                }
                used.then_some(r)
            })
            .collect();
        for user in users {
            if self.phis.contains_key(&user) {
                self.try_remove_trivial_phi(host, user);
            }
        }

        same
    }
}

impl<H: HostFunc> Default for SsaUpdater<H> {
    fn default() -> Self {
        Self::new()
    }
}
