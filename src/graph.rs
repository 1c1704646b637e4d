//! Dependency graph between species, observables, parameters and reactions.
//!
//! After a reaction fires, the graph answers two questions: which functions
//! must be re-evaluated (`update_functions`) and which propensities must be
//! recomputed (`update_reactions`). All lists hold zero-based positions.

use crate::network::{Growth, Network, Reaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Reactions consuming each species.
    pub as_reactant: Vec<Vec<usize>>,
    /// Reactions producing each species.
    pub as_product: Vec<Vec<usize>>,
    /// Reactions sharing at least one species with each reaction.
    pub reaction_reactions: Vec<Vec<usize>>,

    pub species_observables: Vec<Vec<usize>>,
    pub reaction_observables: Vec<Vec<usize>>,
    pub observable_functions: Vec<Vec<usize>>,
    pub function_param: Vec<usize>,
    pub param_functions: Vec<Vec<usize>>,
    pub param_reactions: Vec<Vec<usize>>,

    pub update_functions: Vec<Vec<usize>>,
    pub update_reactions: Vec<Vec<usize>>,

    /// Number of terms of each observable already linked.
    observable_terms: Vec<usize>,
}

fn push_unique(list: &mut Vec<usize>, val: usize) {
    if !list.contains(&val) {
        list.push(val);
    }
}

fn sort_unique(list: &mut Vec<usize>) {
    list.sort_unstable();
    list.dedup();
}

impl DependencyGraph {
    pub fn build(net: &Network) -> Self {
        let n_species = net.species.len();
        let n_params = net.parameters.len();

        let mut graph = Self {
            as_reactant: vec![Vec::new(); n_species],
            as_product: vec![Vec::new(); n_species],
            species_observables: vec![Vec::new(); n_species],
            observable_functions: vec![Vec::new(); net.observables.len()],
            param_functions: vec![Vec::new(); n_params],
            param_reactions: vec![Vec::new(); n_params],
            observable_terms: vec![0; net.observables.len()],
            ..Self::default()
        };

        for (i_rxn, rxn) in net.reactions.iter().enumerate() {
            graph.link_reaction(i_rxn, rxn);
        }
        let mut scratch = vec![0; net.reactions.len()];
        for rxn in &net.reactions {
            let row = graph.overlapping(rxn, &mut scratch);
            graph.reaction_reactions.push(row);
        }

        graph.link_observable_terms(net);

        for (i_fn, func) in net.functions.iter().enumerate() {
            graph.function_param.push(func.param);
            for i_obs in func.observables() {
                push_unique(&mut graph.observable_functions[i_obs], i_fn);
            }
            for i_par in func.parameters() {
                push_unique(&mut graph.param_functions[i_par], i_fn);
            }
        }

        graph.derive(net);
        log::debug!(
            "built dependency graph for {} species, {} reactions, {} functions",
            n_species,
            net.reactions.len(),
            net.functions.len()
        );
        graph
    }

    /// Extend the graph after `net` grew by `growth`.
    ///
    /// Existing rows are only appended to.
    pub fn extend(&mut self, net: &Network, growth: &Growth) {
        let n_species = net.species.len();
        self.as_reactant.resize_with(n_species, Vec::new);
        self.as_product.resize_with(n_species, Vec::new);
        self.species_observables.resize_with(n_species, Vec::new);
        self.observable_functions
            .resize_with(net.observables.len(), Vec::new);
        self.observable_terms.resize(net.observables.len(), 0);

        for i_rxn in growth.reactions.clone() {
            self.link_reaction(i_rxn, net.reactions.at(i_rxn));
        }

        let mut scratch = vec![0; net.reactions.len()];
        for i_rxn in growth.reactions.clone() {
            let row = self.overlapping(net.reactions.at(i_rxn), &mut scratch);
            for &j_rxn in &row {
                if j_rxn < growth.reactions.start {
                    self.reaction_reactions[j_rxn].push(i_rxn);
                }
            }
            self.reaction_reactions.push(row);
        }

        self.link_observable_terms(net);
        self.derive(net);
        log::debug!(
            "extended dependency graph to {} species, {} reactions",
            n_species,
            net.reactions.len()
        );
    }

    fn link_reaction(&mut self, i_rxn: usize, rxn: &Reaction) {
        for &pos in &rxn.reactants {
            if self.as_reactant[pos].last() != Some(&i_rxn) {
                self.as_reactant[pos].push(i_rxn);
            }
        }
        for &pos in &rxn.products {
            if self.as_product[pos].last() != Some(&i_rxn) {
                self.as_product[pos].push(i_rxn);
            }
        }
        for i_par in rxn.rate_law.parameters() {
            push_unique(&mut self.param_reactions[i_par], i_rxn);
        }
    }

    /// Reactions sharing a species with `rxn`, in any role.
    ///
    /// `scratch` holds one counter per reaction and is left zeroed.
    fn overlapping(&self, rxn: &Reaction, scratch: &mut [usize]) -> Vec<usize> {
        let mut touched = Vec::new();
        for pos in rxn.species() {
            for &j_rxn in self.as_reactant[pos].iter().chain(&self.as_product[pos]) {
                if scratch[j_rxn] == 0 {
                    touched.push(j_rxn);
                }
                scratch[j_rxn] += 1;
            }
        }
        for &j_rxn in &touched {
            scratch[j_rxn] = 0;
        }
        touched.sort_unstable();
        touched
    }

    fn link_observable_terms(&mut self, net: &Network) {
        for (i_obs, obs) in net.observables.iter().enumerate() {
            for &(pos, _) in &obs.terms[self.observable_terms[i_obs]..] {
                push_unique(&mut self.species_observables[pos], i_obs);
            }
            self.observable_terms[i_obs] = obs.terms.len();
        }
    }

    /// Recompute the lists derived from the primary adjacency.
    fn derive(&mut self, net: &Network) {
        self.reaction_observables = net
            .reactions
            .iter()
            .map(|rxn| {
                let mut list: Vec<usize> = rxn
                    .species()
                    .flat_map(|pos| self.species_observables[pos].iter().copied())
                    .collect();
                sort_unique(&mut list);
                list
            })
            .collect();

        // Functions and reactions reachable from each observable.
        let n_fns = self.function_param.len();
        let mut included = vec![false; n_fns];
        let mut stack = Vec::new();
        let mut closures = Vec::with_capacity(self.observable_functions.len());
        for obs_fns in &self.observable_functions {
            included.fill(false);
            let mut fns = Vec::new();
            let mut rxns = Vec::new();
            for &i_fn in obs_fns {
                if !included[i_fn] {
                    included[i_fn] = true;
                    stack.push(i_fn);
                }
            }
            while let Some(i_fn) = stack.pop() {
                fns.push(i_fn);
                let i_par = self.function_param[i_fn];
                rxns.extend_from_slice(&self.param_reactions[i_par]);
                for &j_fn in &self.param_functions[i_par] {
                    if !included[j_fn] {
                        included[j_fn] = true;
                        stack.push(j_fn);
                    }
                }
            }
            sort_unique(&mut fns);
            sort_unique(&mut rxns);
            closures.push((fns, rxns));
        }

        self.update_functions.clear();
        self.update_reactions.clear();
        for (i_rxn, observables) in self.reaction_observables.iter().enumerate() {
            let mut fns = Vec::new();
            let mut rxns = self.reaction_reactions[i_rxn].clone();
            for &i_obs in observables {
                let (obs_fns, obs_rxns) = &closures[i_obs];
                fns.extend_from_slice(obs_fns);
                rxns.extend_from_slice(obs_rxns);
            }
            sort_unique(&mut fns);
            sort_unique(&mut rxns);
            self.update_functions.push(fns);
            self.update_reactions.push(rxns);
        }
    }

    pub fn n_species(&self) -> usize {
        self.as_reactant.len()
    }

    pub fn n_reactions(&self) -> usize {
        self.reaction_reactions.len()
    }
}
