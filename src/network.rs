//! In-memory reaction network.
//!
//! Entities reference each other by zero-based position in their collection.
//! Collections only ever grow, so a position stays valid for the lifetime of
//! the network.

use crate::collection::{Element, ElementArray, Entry, IndexedArray};
use crate::error::{NetworkError, SimError};
use crate::formula::Formula;
use crate::reader::{
    ElementDef, FunctionDef, GroupDef, NetworkDef, ReactionDef, SpeciesRef, ValueDef,
};
use meval::ContextProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

/// Weighted sum over species populations (a "group").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    pub name: String,
    pub index: usize,
    /// `(species position, weight)` pairs.
    pub terms: Vec<(usize, f64)>,
    /// Cached value of the weighted sum.
    pub total: f64,
}

impl Observable {
    pub fn recompute(&mut self, x: &[f64]) {
        self.total = self.terms.iter().map(|&(pos, w)| w * x[pos]).sum();
    }
}

impl Entry for Observable {
    fn index(&self) -> usize {
        self.index
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// What a free variable of a rate function refers to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Binding {
    Parameter(usize),
    Observable(usize),
}

/// A parameter whose value is computed from other parameters and observables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateFunction {
    pub name: String,
    /// Position of the parameter this function defines.
    pub param: usize,
    pub formula: Formula,
    pub bindings: Vec<(String, Binding)>,
}

struct Scope<'a> {
    bindings: &'a [(String, Binding)],
    parameters: &'a ElementArray,
    observables: &'a IndexedArray<Observable>,
}

impl ContextProvider for Scope<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        let (_, binding) = self.bindings.iter().find(|(var, _)| var == name)?;
        Some(match *binding {
            Binding::Parameter(pos) => self.parameters.value(pos),
            Binding::Observable(pos) => self.observables.at(pos).total,
        })
    }
}

impl RateFunction {
    pub fn evaluate(
        &self,
        parameters: &ElementArray,
        observables: &IndexedArray<Observable>,
    ) -> Result<f64, meval::Error> {
        self.formula.eval(Scope {
            bindings: &self.bindings,
            parameters,
            observables,
        })
    }

    /// Positions of the observables this function reads.
    pub fn observables(&self) -> impl Iterator<Item = usize> + '_ {
        self.bindings.iter().filter_map(|(_, b)| match *b {
            Binding::Observable(pos) => Some(pos),
            Binding::Parameter(_) => None,
        })
    }

    /// Positions of the parameters this function reads.
    pub fn parameters(&self) -> impl Iterator<Item = usize> + '_ {
        self.bindings.iter().filter_map(|(_, b)| match *b {
            Binding::Parameter(pos) => Some(pos),
            Binding::Observable(_) => None,
        })
    }
}

/// Rate law of a reaction, holding the parameter positions it reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateLaw {
    Elementary { k: usize },
    MichaelisMenten { kcat: usize, km: usize },
    Saturation { k: usize, denominators: Vec<usize> },
    Hill { k: usize, half: usize, exponent: usize },
    Function { param: usize },
}

impl RateLaw {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Elementary { .. } => "Ele",
            Self::MichaelisMenten { .. } => "MM",
            Self::Saturation { .. } => "Sat",
            Self::Hill { .. } => "Hill",
            Self::Function { .. } => "Function",
        }
    }

    /// Positions of every parameter the law reads, in definition order.
    pub fn parameters(&self) -> Vec<usize> {
        match self {
            Self::Elementary { k } => vec![*k],
            Self::MichaelisMenten { kcat, km } => vec![*kcat, *km],
            Self::Saturation { k, denominators } => {
                std::iter::once(*k).chain(denominators.iter().copied()).collect()
            }
            Self::Hill { k, half, exponent } => vec![*k, *half, *exponent],
            Self::Function { param } => vec![*param],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub index: usize,
    /// Reactant species positions. Repeats are meaningful.
    pub reactants: Vec<usize>,
    pub products: Vec<usize>,
    pub rate_law: RateLaw,
    pub stat_factor: f64,
}

impl Entry for Reaction {
    fn index(&self) -> usize {
        self.index
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
    }
}

impl Reaction {
    /// Every species position touched by the reaction, in any role.
    pub fn species(&self) -> impl Iterator<Item = usize> + '_ {
        self.reactants.iter().chain(self.products.iter()).copied()
    }
}

/// Positions added to a network by [`Network::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Growth {
    pub species: Range<usize>,
    pub reactions: Range<usize>,
    /// Whether any observable gained terms (or was created).
    pub observables: bool,
}

impl Growth {
    pub fn is_empty(&self) -> bool {
        self.species.is_empty() && self.reactions.is_empty() && !self.observables
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub species: ElementArray,
    pub parameters: ElementArray,
    pub observables: IndexedArray<Observable>,
    pub reactions: IndexedArray<Reaction>,
    pub functions: Vec<RateFunction>,
}

impl std::str::FromStr for Network {
    type Err = NetworkError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::from_def(text.parse()?)
    }
}

impl Network {
    /// Build and validate a network from its definition records.
    ///
    /// Blocks are resolved in dependency order: parameters, species, groups,
    /// functions, reactions.
    pub fn from_def(def: NetworkDef) -> Result<Self, NetworkError> {
        let parameters = build_parameters(&def.parameters)?;
        let species = build_species(&def.species, &parameters)?;

        let mut observables = IndexedArray::new();
        add_groups(&mut observables, &def.groups, &species)?;
        let x = species.values();
        observables.iter_mut().for_each(|obs| obs.recompute(&x));

        let mut network = Self {
            species,
            parameters,
            observables,
            reactions: IndexedArray::new(),
            functions: Vec::new(),
        };
        for fdef in &def.functions {
            network.add_function(fdef)?;
        }

        let mut reactions = Vec::with_capacity(def.reactions.len());
        let mut lines = Vec::with_capacity(def.reactions.len());
        for rdef in &def.reactions {
            reactions.push(network.build_reaction(rdef, &network.species)?);
            lines.push(rdef.line);
        }
        network.reactions = IndexedArray::from_entries("reactions", reactions, &lines)?;

        log::debug!(
            "built network with {} species, {} parameters, {} groups, {} functions, {} reactions",
            network.species.len(),
            network.parameters.len(),
            network.observables.len(),
            network.functions.len(),
            network.reactions.len()
        );
        Ok(network)
    }

    /// Validate a patch of species, reactions and groups and append it.
    ///
    /// Either the whole patch is merged or the network is left untouched.
    /// New species and reactions are renumbered after the current last index.
    /// Reactions and groups are resolved against the merged species.
    pub fn merge(&mut self, patch: NetworkDef) -> Result<Growth, NetworkError> {
        if let Some(line) = patch
            .parameters
            .first()
            .map(|p| p.line)
            .or(patch.functions.first().map(|f| f.line))
        {
            return Err(NetworkError::Syntax {
                line,
                message: "expansion cannot define parameters or functions".into(),
            });
        }

        let mut species = self.species.clone();
        let new_species = build_species(&patch.species, &self.parameters)?;
        let species_range = species.append(new_species).map_err(|err| match err {
            NetworkError::DuplicateName { name, .. } => NetworkError::DuplicateName {
                line: patch
                    .species
                    .iter()
                    .find(|s| s.name == name)
                    .map_or(0, |s| s.line),
                block: "species",
                name,
            },
            other => other,
        })?;

        let mut reactions = self.reactions.clone();
        let start = reactions.len();
        for rdef in &patch.reactions {
            let rxn = self.build_reaction(rdef, &species)?;
            reactions.push(rxn)?;
        }
        let reactions_range = start..reactions.len();

        let mut observables = self.observables.clone();
        add_groups(&mut observables, &patch.groups, &species)?;

        self.species = species;
        self.reactions = reactions;
        self.observables = observables;
        let x = self.species.values();
        self.refresh_observables(&x);

        Ok(Growth {
            species: species_range,
            reactions: reactions_range,
            observables: !patch.groups.is_empty(),
        })
    }

    pub fn has_functions(&self) -> bool {
        !self.functions.is_empty()
    }

    pub fn species_values(&self) -> Vec<f64> {
        self.species.values()
    }

    pub fn set_species_values(&mut self, x: &[f64]) {
        for (elt, &val) in self.species.iter_mut().zip(x) {
            elt.value = val;
        }
    }

    pub fn refresh_observables(&mut self, x: &[f64]) {
        self.observables.iter_mut().for_each(|obs| obs.recompute(x));
    }

    pub fn refresh_observable(&mut self, pos: usize, x: &[f64]) {
        self.observables.at_mut(pos).recompute(x);
    }

    /// Re-evaluate every function, in definition order.
    pub fn refresh_functions(&mut self) -> Result<(), SimError> {
        for i_fn in 0..self.functions.len() {
            self.refresh_function(i_fn)?;
        }
        Ok(())
    }

    /// Re-evaluate one function and store the result in its parameter.
    pub fn refresh_function(&mut self, i_fn: usize) -> Result<(), SimError> {
        let func = &self.functions[i_fn];
        let val = func
            .evaluate(&self.parameters, &self.observables)
            .map_err(|source| SimError::Formula {
                name: func.name.clone(),
                source,
            })?;
        let param = func.param;
        self.parameters.at_mut(param).value = val;
        Ok(())
    }

    fn add_function(&mut self, fdef: &FunctionDef) -> Result<(), NetworkError> {
        let formula = Formula::parse(&fdef.expression).map_err(|source| NetworkError::Formula {
            line: fdef.line,
            name: fdef.name.clone(),
            source,
        })?;

        let mut bindings = Vec::new();
        for var in formula.variables() {
            let binding = if let Some(pos) = self.parameters.position_of(&var) {
                Binding::Parameter(pos)
            } else if let Some(pos) = self.observables.position_of(&var) {
                Binding::Observable(pos)
            } else {
                return Err(NetworkError::UndefinedVariable {
                    line: fdef.line,
                    name: fdef.name.clone(),
                    var,
                });
            };
            bindings.push((var, binding));
        }

        if self.parameters.position_of(&fdef.name).is_some() {
            return Err(NetworkError::DuplicateName {
                line: fdef.line,
                block: "functions",
                name: fdef.name.clone(),
            });
        }
        let index = self
            .parameters
            .push(Element::new(fdef.name.clone(), 0.0, 0))?;
        let param = index - self.parameters.offset();

        let func = RateFunction {
            name: fdef.name.clone(),
            param,
            formula,
            bindings,
        };
        let val = func
            .evaluate(&self.parameters, &self.observables)
            .map_err(|source| NetworkError::Formula {
                line: fdef.line,
                name: fdef.name.clone(),
                source,
            })?;
        self.parameters.at_mut(param).value = val;
        self.functions.push(func);
        Ok(())
    }

    fn lookup_parameter(&self, line: usize, name: &str) -> Result<usize, NetworkError> {
        self.parameters
            .position_of(name)
            .ok_or_else(|| NetworkError::UndefinedParameter {
                line,
                name: name.to_string(),
            })
    }

    fn build_reaction(
        &self,
        rdef: &ReactionDef,
        species: &ElementArray,
    ) -> Result<Reaction, NetworkError> {
        let line = rdef.line;
        let resolve = |srefs: &[SpeciesRef]| -> Result<Vec<usize>, NetworkError> {
            srefs
                .iter()
                .map(|sref| resolve_species(species, sref, line))
                .collect()
        };
        let mut reactants = resolve(&rdef.reactants)?;
        let products = resolve(&rdef.products)?;
        let n_params = rdef.params.len();

        let param_count = |kind: &'static str| NetworkError::ParameterCount {
            line,
            kind,
            count: n_params,
        };
        let params = rdef
            .params
            .iter()
            .map(|name| self.lookup_parameter(line, name))
            .collect::<Result<Vec<_>, _>>();

        let rate_law = match rdef.keyword.as_deref() {
            None => {
                let param = params?[0];
                if self.functions.iter().any(|f| f.param == param) {
                    RateLaw::Function { param }
                } else {
                    RateLaw::Elementary { k: param }
                }
            }
            Some("Ele") => match params?.as_slice() {
                &[k] => RateLaw::Elementary { k },
                _ => return Err(param_count("Ele")),
            },
            Some("MM") => {
                let &[kcat, km] = params?.as_slice() else {
                    return Err(param_count("MM"));
                };
                if reactants.len() < 2 {
                    return Err(NetworkError::ReactantCount {
                        line,
                        kind: "MM",
                        min: 2,
                    });
                }
                RateLaw::MichaelisMenten { kcat, km }
            }
            Some("Sat") => {
                if n_params == 0 || n_params > reactants.len() + 1 {
                    return Err(param_count("Sat"));
                }
                let params = params?;
                RateLaw::Saturation {
                    k: params[0],
                    denominators: params[1..].to_vec(),
                }
            }
            Some("Hill") => {
                let &[k, half, exponent] = params?.as_slice() else {
                    return Err(param_count("Hill"));
                };
                if reactants.is_empty() {
                    return Err(NetworkError::ReactantCount {
                        line,
                        kind: "Hill",
                        min: 1,
                    });
                }
                RateLaw::Hill { k, half, exponent }
            }
            Some(other) => {
                return Err(NetworkError::UndefinedRateLaw {
                    line,
                    name: other.to_string(),
                });
            }
        };

        // Adjacent repeats drive the discrete combinatorics.
        if matches!(
            rate_law,
            RateLaw::Elementary { .. } | RateLaw::Function { .. }
        ) {
            reactants.sort_unstable();
        }

        Ok(Reaction {
            index: rdef.index,
            reactants,
            products,
            rate_law,
            stat_factor: rdef.stat_factor,
        })
    }
}

fn resolve_species(
    species: &ElementArray,
    sref: &SpeciesRef,
    line: usize,
) -> Result<usize, NetworkError> {
    match sref {
        SpeciesRef::Index(index) => species
            .position(*index)
            .ok_or(NetworkError::SpeciesOutOfRange {
                line,
                index: *index,
            }),
        SpeciesRef::Name(name) => {
            species
                .position_of(name)
                .ok_or_else(|| NetworkError::UndefinedSpecies {
                    line,
                    name: name.clone(),
                })
        }
    }
}

fn resolve_value(
    edef: &ElementDef,
    known: &dyn Fn(&str) -> Option<f64>,
) -> Result<f64, NetworkError> {
    match &edef.value {
        ValueDef::Absent => Ok(0.0),
        ValueDef::Number(val) => Ok(*val),
        ValueDef::Scaled { factor, name } => {
            known(name)
                .map(|val| factor * val)
                .ok_or_else(|| NetworkError::UndefinedParameter {
                    line: edef.line,
                    name: name.clone(),
                })
        }
    }
}

fn build_parameters(defs: &[ElementDef]) -> Result<ElementArray, NetworkError> {
    // Parameters may be defined in terms of earlier ones.
    let mut values: HashMap<&str, f64> = HashMap::new();
    let mut elements = Vec::with_capacity(defs.len());
    for (pos, edef) in defs.iter().enumerate() {
        let val = resolve_value(edef, &|name: &str| values.get(name).copied())?;
        values.insert(&edef.name, val);
        elements.push(Element::new(
            edef.name.clone(),
            val,
            edef.index.unwrap_or(pos + 1),
        ));
    }
    let lines: Vec<_> = defs.iter().map(|d| d.line).collect();
    ElementArray::from_entries("parameters", elements, &lines)
}

fn build_species(
    defs: &[ElementDef],
    parameters: &ElementArray,
) -> Result<ElementArray, NetworkError> {
    let lookup = |name: &str| parameters.lookup(name).map(|p| p.value);
    let mut elements = Vec::with_capacity(defs.len());
    for (pos, edef) in defs.iter().enumerate() {
        let mut elt = Element::new(
            edef.name.clone(),
            resolve_value(edef, &lookup)?,
            edef.index.unwrap_or(pos + 1),
        );
        elt.fixed = edef.fixed;
        elements.push(elt);
    }
    let lines: Vec<_> = defs.iter().map(|d| d.line).collect();
    ElementArray::from_entries("species", elements, &lines)
}

/// Add group definitions, appending terms to groups that already exist.
fn add_groups(
    observables: &mut IndexedArray<Observable>,
    defs: &[GroupDef],
    species: &ElementArray,
) -> Result<(), NetworkError> {
    for gdef in defs {
        let mut terms = Vec::with_capacity(gdef.entries.len());
        for (sref, weight) in &gdef.entries {
            terms.push((resolve_species(species, sref, gdef.line)?, *weight));
        }
        match observables.position_of(&gdef.name) {
            Some(pos) => observables.at_mut(pos).terms.extend(terms),
            None => {
                if let Some(index) = gdef.index {
                    if index != observables.next_index() {
                        log::debug!(
                            "group {} renumbered from {index} to {}",
                            gdef.name,
                            observables.next_index()
                        );
                    }
                }
                observables.push(Observable {
                    name: gdef.name.clone(),
                    index: 0,
                    terms,
                    total: 0.0,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = "
begin parameters
    1 k1   2.0
    2 Km   1.0
    3 kh   3.0
end parameters
begin species
    1 S    10
    2 E    1
    3 P    0
    4 $Src 5
end species
begin groups
    1 Stot S,P
    2 Etot 2*E
end groups
begin functions
    1 f() k1*Stot
    2 g() f/2
end functions
begin reactions
    1 S,E  E,P  MM k1 Km
    2 Src  S    f
    3 P,P  S    0.5*k1
    4 S    P    Hill k1 Km kh
end reactions
";

    #[test]
    fn test_build_network() {
        let net: Network = NET.parse().unwrap();
        assert_eq!(net.species.len(), 4);
        assert!(net.species.at(3).fixed);
        assert_eq!(net.observables.at(0).total, 10.0);
        assert_eq!(net.observables.at(1).total, 2.0);

        // Functions define parameters after the declared ones.
        assert_eq!(net.parameters.len(), 5);
        assert_eq!(net.parameters.lookup("f").unwrap().value, 20.0);
        assert_eq!(net.parameters.lookup("g").unwrap().value, 10.0);

        let f = net.parameters.position_of("f").unwrap();
        assert_eq!(net.reactions.at(1).rate_law, RateLaw::Function { param: f });
        assert_eq!(net.reactions.at(0).rate_law.kind(), "MM");
        assert_eq!(net.reactions.at(2).stat_factor, 0.5);
        assert_eq!(net.reactions.at(2).reactants, vec![2, 2]);
    }

    #[test]
    fn test_build_rejects_bad_rate_laws() {
        let with_reaction = |rxn: &str| {
            format!(
                "begin parameters\n1 k 1\nend parameters\n\
                 begin species\n1 A 1\n2 B 1\nend species\n\
                 begin reactions\n{rxn}\nend reactions\n"
            )
        };

        let err = with_reaction("1 A B MM k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::ParameterCount { line: 9, .. }));

        let err = with_reaction("1 A B MM k k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::ReactantCount { min: 2, .. }));

        let err = with_reaction("1 A B Sat k k k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::ParameterCount { .. }));

        let err = with_reaction("1 A B Foo k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::UndefinedRateLaw { .. }));

        let err = with_reaction("1 A C k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::UndefinedSpecies { .. }));

        let err = with_reaction("1 3 B k").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::SpeciesOutOfRange { index: 3, .. }));

        let err = with_reaction("1 A B kx").parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::UndefinedParameter { .. }));
    }

    #[test]
    fn test_function_with_unknown_variable() {
        let text = "begin functions\n1 f() 2*x\nend functions\n";
        let err = text.parse::<Network>().unwrap_err();
        assert!(matches!(err, NetworkError::UndefinedVariable { line: 2, .. }));
    }

    #[test]
    fn test_merge_appends_without_renumbering() {
        let mut net: Network = NET.parse().unwrap();
        let patch: NetworkDef = "
begin species
    5 Q 0
end species
begin reactions
    5 P Q k1
end reactions
begin groups
    1 Stot Q
    3 Qtot Q
end groups
"
        .parse()
        .unwrap();

        let growth = net.merge(patch).unwrap();
        assert_eq!(growth.species, 4..5);
        assert_eq!(growth.reactions, 4..5);
        assert!(growth.observables);

        assert_eq!(net.species.get(1).unwrap().name, "S");
        assert_eq!(net.species.get(5).unwrap().name, "Q");
        let rxn = net.reactions.get(5).unwrap();
        assert_eq!((rxn.reactants.clone(), rxn.products.clone()), (vec![2], vec![4]));
        assert_eq!(net.observables.at(0).terms.len(), 3);
        assert_eq!(net.observables.lookup("Qtot").unwrap().index, 3);
    }

    #[test]
    fn test_failed_merge_leaves_network_untouched() {
        let mut net: Network = NET.parse().unwrap();
        let patch: NetworkDef = "
begin species
    5 Q 0
end species
begin reactions
    5 P Q nope
end reactions
"
        .parse()
        .unwrap();

        assert!(net.merge(patch).is_err());
        assert_eq!(net.species.len(), 4);
        assert_eq!(net.reactions.len(), 4);

        let patch: NetworkDef = "begin parameters\n1 z 1\nend parameters\n".parse().unwrap();
        assert!(net.merge(patch).is_err());
    }
}
