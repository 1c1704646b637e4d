//! Simulation of chemical reaction networks.
//!
//! A [`network::Network`] is read from a block-structured definition file and
//! propagated either stochastically with the Gillespie direct method
//! ([`ssa::Gillespie`]) or deterministically ([`ode`]). The stochastic engine
//! can grow the network while it runs through an
//! [`expansion::ExpansionOracle`].

pub mod analysis;
pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod expansion;
pub mod formula;
pub mod graph;
pub mod manager;
pub mod network;
pub mod ode;
pub mod rate_law;
pub mod reader;
pub mod ssa;
pub mod stats;
