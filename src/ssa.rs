//! Gillespie direct method with incremental propensity updates.

use crate::error::SimError;
use crate::expansion::{Expansion, ExpansionOracle};
use crate::graph::DependencyGraph;
use crate::network::Network;
use crate::rate_law::Mode;
use rand::Rng;
use rand_distr::Exp1;
use serde::{Deserialize, Serialize};

/// Populations at or below this force an immediate propensity update.
pub const THRESHOLD_OCCUPANCY: f64 = 10.0;

/// Times the total propensity may be resynchronized during one selection.
pub const MAX_RESYNC_ATTEMPTS: usize = 8;

/// Why [`Gillespie::advance`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The requested interval elapsed.
    Reached,
    /// No reaction can fire any more.
    Exhausted,
}

/// State of the stochastic engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gillespie {
    populations: Vec<f64>,
    ever_populated: Vec<bool>,
    propensities: Vec<f64>,
    a_tot: f64,
    n_steps: u64,
    /// Reaction positions in selection order.
    order: Vec<usize>,
    /// Fired reactions whose dependents are not updated yet.
    pending: Vec<usize>,
    update_interval: u64,
    recalc_interval: u64,
}

impl Gillespie {
    /// Round species values to molecule counts and compute every propensity.
    pub fn new(
        net: &mut Network,
        update_interval: u64,
        recalc_interval: u64,
    ) -> Result<Self, SimError> {
        let populations: Vec<f64> = net.species.iter().map(|s| s.value.round()).collect();
        net.set_species_values(&populations);
        net.refresh_observables(&populations);
        net.refresh_functions()?;

        let propensities: Vec<f64> = net
            .reactions
            .iter()
            .map(|rxn| rxn.rate(&populations, &net.parameters, Mode::Discrete))
            .collect();
        let a_tot = propensities.iter().sum();

        Ok(Self {
            ever_populated: populations.iter().map(|&pop| pop > 0.0).collect(),
            order: (0..propensities.len()).collect(),
            populations,
            propensities,
            a_tot,
            n_steps: 0,
            pending: Vec::new(),
            update_interval: update_interval.max(1),
            recalc_interval: recalc_interval.max(1),
        })
    }

    /// Fire reactions until `delta_t` has elapsed or nothing can fire.
    ///
    /// Final populations are written back to the network.
    pub fn advance<R, O>(
        &mut self,
        net: &mut Network,
        graph: &mut DependencyGraph,
        delta_t: f64,
        rng: &mut R,
        oracle: &mut O,
    ) -> Result<Outcome, SimError>
    where
        R: Rng + ?Sized,
        O: ExpansionOracle + ?Sized,
    {
        let mut remaining = delta_t;
        let outcome = loop {
            if !self.a_tot.is_finite() {
                return Err(self.non_finite(net));
            }
            if self.a_tot <= 0.0 {
                self.flush(net, graph)?;
                if self.a_tot <= 0.0 {
                    break Outcome::Exhausted;
                }
            }

            let dt = rng.sample::<f64, _>(Exp1) / self.a_tot;
            remaining -= dt;
            if remaining < 0.0 {
                break Outcome::Reached;
            }

            let Some(i_rxn) = self.select_next(net, rng)? else {
                if self.pending.is_empty() {
                    break Outcome::Exhausted;
                }
                // Stale propensities may hide reactions that can still fire.
                // The waiting time is drawn again from the updated total.
                remaining += dt;
                self.flush(net, graph)?;
                continue;
            };
            let (force_update, newly_populated) = self.fire(net, graph, i_rxn);
            if !newly_populated.is_empty() {
                self.grow(net, graph, oracle, &newly_populated)?;
            }

            self.pending.push(i_rxn);
            if force_update || self.n_steps % self.update_interval == 0 {
                self.flush(net, graph)?;
            }
            self.n_steps += 1;
        };

        self.flush(net, graph)?;
        net.set_species_values(&self.populations);
        net.refresh_observables(&self.populations);
        Ok(outcome)
    }

    /// Pick the next reaction with probability proportional to its propensity.
    ///
    /// Walking the selection order also bubbles larger propensities towards
    /// the front. If the walk overruns, the total is resynchronized to the
    /// realised sum and the draw repeated. Returns `None` when every
    /// propensity is zero.
    pub fn select_next<R: Rng + ?Sized>(
        &mut self,
        net: &Network,
        rng: &mut R,
    ) -> Result<Option<usize>, SimError> {
        let mut attempts = 0;
        loop {
            if !self.a_tot.is_finite() {
                return Err(self.non_finite(net));
            }
            let f = loop {
                let f = rng.random::<f64>() * self.a_tot;
                if f > 0.0 {
                    break f;
                }
            };

            let mut sum = 0.0;
            for k in 0..self.order.len() {
                let i_rxn = self.order[k];
                let a = self.propensities[i_rxn];
                sum += a;
                if k > 0 && a > self.propensities[self.order[k - 1]] {
                    self.order.swap(k - 1, k);
                }
                if sum >= f {
                    return Ok(Some(i_rxn));
                }
            }

            if sum <= 0.0 {
                self.a_tot = 0.0;
                return Ok(None);
            }
            attempts += 1;
            if attempts > MAX_RESYNC_ATTEMPTS {
                return Err(SimError::PropensityDrift {
                    attempts: MAX_RESYNC_ATTEMPTS,
                });
            }
            log::debug!("resynchronized total propensity from {} to {sum}", self.a_tot);
            self.a_tot = sum;
        }
    }

    /// Apply the stoichiometry of a reaction.
    ///
    /// Returns whether an immediate update is required and the species
    /// populated for the first time that no reaction consumes.
    pub fn fire(
        &mut self,
        net: &Network,
        graph: &DependencyGraph,
        i_rxn: usize,
    ) -> (bool, Vec<usize>) {
        let rxn = net.reactions.at(i_rxn);
        let mut force_update = false;
        let mut newly_populated = Vec::new();

        for &pos in &rxn.reactants {
            if net.species.at(pos).fixed {
                continue;
            }
            let pop = &mut self.populations[pos];
            *pop = (*pop - 1.0).max(0.0);
            force_update |= *pop <= THRESHOLD_OCCUPANCY;
        }
        for &pos in &rxn.products {
            if net.species.at(pos).fixed {
                continue;
            }
            let pop = &mut self.populations[pos];
            *pop += 1.0;
            force_update |= *pop <= THRESHOLD_OCCUPANCY;
            if !self.ever_populated[pos] {
                self.ever_populated[pos] = true;
                if graph.as_reactant[pos].is_empty() && !newly_populated.contains(&pos) {
                    newly_populated.push(pos);
                }
            }
        }

        (force_update, newly_populated)
    }

    /// Bring every propensity depending on a pending reaction up to date.
    pub fn flush(&mut self, net: &mut Network, graph: &DependencyGraph) -> Result<(), SimError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let recalc = self.n_steps % self.recalc_interval == 0;

        let mut pending = std::mem::take(&mut self.pending);
        for &i_rxn in &pending {
            if net.has_functions() {
                for &i_obs in &graph.reaction_observables[i_rxn] {
                    net.refresh_observable(i_obs, &self.populations);
                }
                for &i_fn in &graph.update_functions[i_rxn] {
                    net.refresh_function(i_fn)?;
                }
            }
            for &j_rxn in &graph.update_reactions[i_rxn] {
                let a = net.reactions.at(j_rxn).rate(
                    &self.populations,
                    &net.parameters,
                    Mode::Discrete,
                );
                self.a_tot += a - self.propensities[j_rxn];
                self.propensities[j_rxn] = a;
            }
        }
        pending.clear();
        self.pending = pending;

        if recalc {
            self.a_tot = self.propensities.iter().sum();
        }
        Ok(())
    }

    /// Ask the oracle to expand the network around newly populated species.
    ///
    /// Oracle failures and invalid patches leave the network unchanged.
    pub fn grow<O: ExpansionOracle + ?Sized>(
        &mut self,
        net: &mut Network,
        graph: &mut DependencyGraph,
        oracle: &mut O,
        newly_populated: &[usize],
    ) -> Result<(), SimError> {
        let names: Vec<String> = newly_populated
            .iter()
            .map(|&pos| net.species.at(pos).name.clone())
            .collect();

        let patch = match oracle.expand(&names) {
            Ok(Expansion::Grow(patch)) => patch,
            Ok(Expansion::Declined) => {
                log::debug!("population of {names:?} did not produce new reactions or species");
                return Ok(());
            }
            Err(error) => {
                log::warn!("expansion of {names:?} failed: {error:#}");
                return Ok(());
            }
        };

        net.set_species_values(&self.populations);
        let growth = match net.merge(patch) {
            Ok(growth) => growth,
            Err(error) => {
                log::warn!("rejected expansion of {names:?}: {error}");
                return Ok(());
            }
        };
        graph.extend(net, &growth);

        for pos in growth.species.clone() {
            let pop = net.species.at(pos).value.round();
            self.populations.push(pop);
            self.ever_populated.push(pop > 0.0);
        }
        self.order.extend(growth.reactions.clone());
        self.propensities.resize(net.reactions.len(), 0.0);

        net.refresh_observables(&self.populations);
        net.refresh_functions()?;
        self.recompute_all(net);

        log::info!(
            "at step {} added {} species, {} reactions",
            self.n_steps,
            growth.species.len(),
            growth.reactions.len()
        );
        Ok(())
    }

    /// Name the reaction responsible for a non-finite total.
    ///
    /// When every propensity is finite the sum overflowed, and the largest
    /// term is blamed.
    fn non_finite(&self, net: &Network) -> SimError {
        let pos = self
            .propensities
            .iter()
            .position(|a| !a.is_finite())
            .or_else(|| {
                self.propensities
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map(|(pos, _)| pos)
            })
            .unwrap_or_default();
        SimError::NonFinitePropensity {
            reaction: net.reactions.at(pos).index,
        }
    }

    fn recompute_all(&mut self, net: &Network) {
        for (a, rxn) in self.propensities.iter_mut().zip(&net.reactions) {
            *a = rxn.rate(&self.populations, &net.parameters, Mode::Discrete);
        }
        self.a_tot = self.propensities.iter().sum();
    }

    pub fn populations(&self) -> &[f64] {
        &self.populations
    }

    pub fn propensities(&self) -> &[f64] {
        &self.propensities
    }

    pub fn a_tot(&self) -> f64 {
        self.a_tot
    }

    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    pub fn frac_species_active(&self) -> f64 {
        let n_act = self.populations.iter().filter(|&&pop| pop > 0.0).count();
        n_act as f64 / self.populations.len() as f64
    }

    pub fn frac_reactions_active(&self) -> f64 {
        let n_act = self.propensities.iter().filter(|&&a| a > 0.0).count();
        n_act as f64 / self.propensities.len() as f64
    }

    pub fn n_species_ever_populated(&self) -> usize {
        self.ever_populated.iter().filter(|&&ever| ever).count()
    }
}
