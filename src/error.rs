//! Error types of the network core.
//!
//! Application code (configuration, engine, manager) works with `anyhow`;
//! these typed errors are what the core hands up the chain.

use thiserror::Error;

/// Load-time configuration error.
///
/// Raised while a network (or a network patch) is being built. Construction
/// is all-or-nothing, so the block being built is discarded.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: duplicate index {index} in {block}")]
    DuplicateIndex {
        line: usize,
        block: &'static str,
        index: usize,
    },

    #[error("line {line}: duplicate name {name:?} in {block}")]
    DuplicateName {
        line: usize,
        block: &'static str,
        name: String,
    },

    #[error("{block} indices must be contiguous, but index {index} is missing")]
    IndexGap { block: &'static str, index: usize },

    #[error("line {line}: undefined parameter {name:?}")]
    UndefinedParameter { line: usize, name: String },

    #[error("line {line}: undefined species {name:?}")]
    UndefinedSpecies { line: usize, name: String },

    #[error("line {line}: species index {index} out of range")]
    SpeciesOutOfRange { line: usize, index: usize },

    #[error("line {line}: undefined rate law type {name:?}")]
    UndefinedRateLaw { line: usize, name: String },

    #[error("line {line}: incorrect number of rate constants ({count}) for {kind} rate law")]
    ParameterCount {
        line: usize,
        kind: &'static str,
        count: usize,
    },

    #[error("line {line}: {kind} rate law needs at least {min} reactants")]
    ReactantCount {
        line: usize,
        kind: &'static str,
        min: usize,
    },

    #[error("line {line}: function {name:?} refers to undefined variable {var:?}")]
    UndefinedVariable {
        line: usize,
        name: String,
        var: String,
    },

    #[error("line {line}: invalid expression for function {name:?}")]
    Formula {
        line: usize,
        name: String,
        #[source]
        source: meval::Error,
    },

    #[error("end of input reached before {block} block was terminated")]
    Unterminated { block: String },
}

/// Runtime error raised while propagating a network.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("non-finite rate of change for species {species} at t={time}")]
    NonFinite { species: usize, time: f64 },

    #[error("non-finite propensity for reaction {reaction}")]
    NonFinitePropensity { reaction: usize },

    #[error("state has {found} values but the network has {expected} species")]
    StateLength { expected: usize, found: usize },

    #[error("total propensity kept drifting after {attempts} resynchronization attempts")]
    PropensityDrift { attempts: usize },

    #[error("failed to evaluate function {name:?}")]
    Formula {
        name: String,
        #[source]
        source: meval::Error,
    },
}
