//! The per-function driver: single-path conversion of one machine function.
//!
//! Processing is scope-by-scope, children before parents, so an outer scope
//! always sees its nested loops as already-predicated collapsed regions. Per
//! scope the pipeline is: reduced flow graph and post-dominators, control
//! dependence, decomposition into predicate tables, initialization analysis,
//! define materialization, predication.

use crate::apply::apply_predicates;
use crate::ctrldep::{control_dependence, decompose};
use crate::dataflow::upwards_exposed_uses;
use crate::fcfg::Fcfg;
use crate::host::HostFunc;
use crate::materialize::insert_pred_definitions;
use crate::print::dump_scopes;
use crate::scope::ScopeTree;
use crate::{Config, Error, FxIndexMap};
use log::debug;
use smallvec::SmallVec;

/// Everything the conversion leaves behind for the host pipeline: the
/// analyzed scope tree, the guard register of every predicated block, and the
/// stitched single-path block layout.
pub struct Conversion<B, R> {
    pub scopes: ScopeTree<B>,
    pub use_regs: FxIndexMap<B, R>,
    pub layout: Vec<B>,
}

/// Convert `host`'s function if it is in the configured set; `Ok(None)` means
/// it was not selected and stays untouched.
pub fn convert_if_selected<H: HostFunc>(
    host: &mut H,
    config: &Config,
) -> Result<Option<Conversion<H::Block, H::Reg>>, Error> {
    if !config.should_convert(host.name()) {
        return Ok(None);
    }
    convert_function(host).map(Some)
}

/// Convert one function to single-path form, unconditionally.
pub fn convert_function<H: HostFunc>(
    host: &mut H,
) -> Result<Conversion<H::Block, H::Reg>, Error> {
    debug!("[single-path] converting `{}`", host.name());

    let mut scopes = ScopeTree::build(host)?;
    let mut use_regs = FxIndexMap::default();

    for s in scopes.post_order() {
        let header = scopes.header(s);
        debug!("[single-path] scope headed by b{}", host.block_id(header));

        // Reduced flow graph: nested scopes collapse into their header,
        // carrying the nested exit edges.
        let blocks: Vec<H::Block> = scopes.blocks(s).to_vec();
        let mut fcfg = Fcfg::build(header, &blocks, |b| match scopes.sub_scope(s, b) {
            Some(child) => scopes.exit_edges(child).iter().copied().collect(),
            None => host.successors(b).into_iter().map(|succ| (b, succ)).collect::<SmallVec<_>>(),
        });
        scopes.set_rpo(s, fcfg.rpo_blocks());
        fcfg.postdominators();

        let cd = control_dependence(host, &fcfg, header)?;
        let mut info = decompose(scopes.blocks(s), &cd);
        info.set_init(upwards_exposed_uses(host, &info));

        insert_pred_definitions(host, &info, &mut use_regs)?;
        scopes.set_pred_info(s, info);
        apply_predicates(host, &scopes, s, &use_regs)?;
    }

    if log::log_enabled!(log::Level::Debug) {
        debug!("[single-path] result:\n{}", dump_scopes(host, &scopes));
    }

    let layout = scopes.layout_order();
    Ok(Conversion { scopes, use_regs, layout })
}
