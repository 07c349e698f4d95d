//! **`singlepath`** is a compiler back-end core that converts the reducible
//! control-flow of a machine function into *single-path code*: a straight-line
//! schedule in which every basic block executes unconditionally, with each
//! instruction predicated by a boolean guard so that only the instructions on
//! the semantically-taken path have visible effect.
//!
//! The crate owns the predicate synthesis engine only. It consumes a
//! machine-level CFG through the [`HostFunc`] capability bundle, computes the
//! minimal set of predicates representing the function's control dependence,
//! materializes predicate-defining instructions (keeping the predicate
//! registers in SSA form), and rewrites every predicable instruction to carry
//! its block's guard. Instruction selection, register allocation and emission
//! stay with the host.
//!
//! The engine works scope-by-scope over a loop-nest tree extended with the
//! whole function as root (see [`scope::ScopeTree`]); per scope it builds a
//! reduced acyclic flow graph ([`fcfg::Fcfg`]), computes post-dominators and
//! control dependence on it, and derives predicate uses and defines from the
//! decomposed dependence sets. Entry point: [`passes::convert`].

use rustc_hash::FxHasher;
use std::fmt;
use std::hash::BuildHasherDefault;

pub mod apply;
pub mod ctrldep;
pub mod dataflow;
pub mod fcfg;
pub mod host;
pub mod materialize;
pub mod print;
pub mod scope;
pub mod ssa;
pub mod passes {
    // NOTE: inline `mod` to avoid adding APIs here, it's just namespacing.

    pub mod convert;
}

pub use host::{AnalyzedBranch, HostFunc, InstKind, LoopInfo};
pub use passes::convert::{convert_function, convert_if_selected, Conversion};
pub use scope::{ScopeRef, ScopeTree, ScopeWalker};

/// `IndexMap`/`IndexSet` with the faster `FxHasher`: insertion-ordered, so
/// iterating them is deterministic, while `==` stays order-insensitive
/// (both properties are load-bearing for reproducible predicate numbering).
pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Scope-local predicate id.
///
/// Each scope owns predicates `p0..pN`, numbered by first encounter in the
/// reverse-post-order walk of the scope's blocks. `p0` always belongs to the
/// scope header.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pred(pub u32);

impl Pred {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A CFG edge `(src, dst)` as seen by a scope's flow graph.
///
/// `src` of `None` encodes the synthetic pseudo-edge from the scope's flow
/// graph entry into the header; it stands for "the scope was entered" and
/// never produces a predicate define.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Edge<B> {
    pub src: Option<B>,
    pub dst: B,
}

impl<B> Edge<B> {
    pub fn new(src: B, dst: B) -> Self {
        Edge { src: Some(src), dst }
    }

    pub fn pseudo(dst: B) -> Self {
        Edge { src: None, dst }
    }
}

impl<B: fmt::Debug> fmt::Debug for Edge<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.src {
            Some(src) => write!(f, "({src:?}->{:?})", self.dst),
            None => write!(f, "(entry->{:?})", self.dst),
        }
    }
}

/// Fatal conditions that abort the conversion of one function.
///
/// None of these are recovered locally, and partial mutations of the host
/// function are not rolled back; a caller seeing an error must treat the
/// function as invalid.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("function has {0} exit blocks, single-path conversion requires exactly one")]
    MultipleExits(usize),

    #[error("block b{0} has more than two successors (indirect jump or switch)")]
    TooManySuccessors(u32),

    #[error("irreducible control flow: block b{block} is entered from outside the loop headed by b{header}")]
    IrreducibleLoop { block: u32, header: u32 },

    #[error("cannot analyze the terminator of branching block b{0}")]
    UnanalyzableBranch(u32),

    #[error("bundled instruction encountered while predicating block b{0}")]
    BundledInst(u32),
}

/// The set of functions selected for conversion.
///
/// This is the only configuration the core itself recognizes; which functions
/// end up in the set (attributes, flags, config files) is host policy.
#[derive(Clone, Default)]
pub struct Config {
    funcs: FxIndexSet<String>,
}

impl Config {
    pub fn new(funcs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Config { funcs: funcs.into_iter().map(Into::into).collect() }
    }

    /// Parse a comma-separated list of function names, the shape the option
    /// usually arrives in from a command line.
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    /// Whether any function is selected at all.
    pub fn enabled(&self) -> bool {
        !self.funcs.is_empty()
    }

    pub fn should_convert(&self, func: &str) -> bool {
        self.funcs.contains(func)
    }
}
