//! Rate and propensity evaluation.

use crate::collection::ElementArray;
use crate::network::{RateLaw, Reaction};

/// How reactant populations combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Molecule counts: `m` copies of a reactant contribute `X (X-1) … (X-m+1)`.
    Discrete,
    /// Concentrations: `m` copies contribute `X^m`.
    Continuous,
}

/// Run counter over adjacent identical reactant positions.
struct Runs {
    mode: Mode,
    prev: Option<usize>,
    run: f64,
}

impl Runs {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            prev: None,
            run: 0.0,
        }
    }

    /// Effective population of the next reactant.
    fn next(&mut self, pos: usize, x: &[f64]) -> f64 {
        if self.mode == Mode::Discrete && self.prev == Some(pos) {
            self.run += 1.0;
        } else {
            self.run = 0.0;
        }
        self.prev = Some(pos);
        x[pos] - self.run
    }
}

fn mass_action(reactants: &[usize], x: &[f64], mode: Mode) -> f64 {
    let mut runs = Runs::new(mode);
    reactants.iter().map(|&pos| runs.next(pos, x)).product()
}

/// Free substrate of the quasi-steady-state Michaelis–Menten approximation.
///
/// Positive root of `S^2 - (St - Km - Et) S - St Km = 0`.
pub fn free_substrate(st: f64, et: f64, km: f64) -> f64 {
    let b = st - km - et;
    0.5 * (b + (b * b + 4.0 * st * km).sqrt())
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

impl Reaction {
    /// Rate (continuous) or propensity (discrete) of the reaction.
    ///
    /// A vanishing denominator in any saturating term yields 0.
    pub fn rate(&self, x: &[f64], params: &ElementArray, mode: Mode) -> f64 {
        let p = |pos: usize| params.value(pos);
        let sf = self.stat_factor;
        let reactants = &self.reactants;

        match &self.rate_law {
            RateLaw::Elementary { k } => sf * p(*k) * mass_action(reactants, x, mode),
            RateLaw::Function { param } => sf * p(*param) * mass_action(reactants, x, mode),
            RateLaw::MichaelisMenten { kcat, km } => {
                let st = x[reactants[0]];
                let et: f64 = reactants[1..].iter().map(|&pos| x[pos]).sum();
                let km = p(*km);
                let s = free_substrate(st, et, km);
                ratio(sf * p(*kcat) * et * s, km + s).unwrap_or(0.0)
            }
            RateLaw::Saturation { k, denominators } => {
                let mut rate = sf * p(*k);
                if denominators.is_empty() {
                    return rate;
                }
                let mut runs = Runs::new(mode);
                for (i, &pos) in reactants.iter().enumerate() {
                    let xr = runs.next(pos, x);
                    match denominators.get(i) {
                        Some(&kd) => match ratio(xr, xr + p(kd)) {
                            Some(frac) => rate *= frac,
                            None => return 0.0,
                        },
                        None => rate *= xr,
                    }
                }
                rate
            }
            RateLaw::Hill { k, half, exponent } => {
                let q = p(*exponent);
                let mut runs = Runs::new(mode);
                let x1q = runs.next(reactants[0], x).powf(q);
                let Some(frac) = ratio(x1q, p(*half).powf(q) + x1q) else {
                    return 0.0;
                };
                let rest: f64 = reactants[1..].iter().map(|&pos| runs.next(pos, x)).product();
                sf * p(*k) * frac * rest
            }
        }
    }
}
