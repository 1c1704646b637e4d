//! Deterministic rates of change and a fixed-step propagator.

use crate::error::SimError;
use crate::network::Network;
use crate::rate_law::Mode;

impl Network {
    /// Net rate of change of every species at state `x`.
    ///
    /// Observables and function-valued parameters are refreshed from `x`
    /// first, so calling twice on the same state gives the same result.
    pub fn derivatives(&mut self, t: f64, x: &[f64]) -> Result<Vec<f64>, SimError> {
        let mut dx = vec![0.0; x.len()];
        self.derivatives_into(t, x, &mut dx)?;
        Ok(dx)
    }

    pub fn derivatives_into(&mut self, t: f64, x: &[f64], dx: &mut [f64]) -> Result<(), SimError> {
        let expected = self.species.len();
        for found in [x.len(), dx.len()] {
            if found != expected {
                return Err(SimError::StateLength { expected, found });
            }
        }
        self.refresh_observables(x);
        self.refresh_functions()?;

        dx.fill(0.0);
        for rxn in &self.reactions {
            let rate = rxn.rate(x, &self.parameters, Mode::Continuous);
            for &pos in &rxn.reactants {
                dx[pos] -= rate;
            }
            for &pos in &rxn.products {
                dx[pos] += rate;
            }
        }

        for (dxi, elt) in dx.iter_mut().zip(&self.species) {
            if elt.fixed {
                *dxi = 0.0;
            }
        }

        match dx.iter().position(|val| !val.is_finite()) {
            Some(pos) => Err(SimError::NonFinite {
                species: self.species.at(pos).index,
                time: t,
            }),
            None => Ok(()),
        }
    }

    /// Continuous rate of every reaction at the current species values.
    pub fn rates(&self) -> Vec<f64> {
        let x = self.species_values();
        self.reactions
            .iter()
            .map(|rxn| rxn.rate(&x, &self.parameters, Mode::Continuous))
            .collect()
    }
}

/// Integrate from `t` over `delta_t` with explicit Euler steps of size `h`.
///
/// Species values are advanced in place and `t` is updated. The last step is
/// shortened to land exactly on `t + delta_t`.
pub fn propagate_euler(
    net: &mut Network,
    t: &mut f64,
    delta_t: f64,
    h: f64,
) -> Result<(), SimError> {
    let t_end = *t + delta_t;
    let mut x = net.species_values();
    let mut dx = vec![0.0; x.len()];

    while *t < t_end {
        let step = h.min(t_end - *t);
        net.derivatives_into(*t, &x, &mut dx)?;
        for (xi, dxi) in x.iter_mut().zip(&dx) {
            *xi += step * dxi;
        }
        *t += step;
        if let Some(pos) = x.iter().position(|val| !val.is_finite()) {
            return Err(SimError::NonFinite {
                species: net.species.at(pos).index,
                time: *t,
            });
        }
    }

    net.set_species_values(&x);
    net.refresh_observables(&x);
    net.refresh_functions()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = "
begin parameters
    1 k1 1.0
    2 K  2.0
end parameters
begin species
    1 A   1.0
    2 B   0.0
    3 $E  0.5
end species
begin groups
    1 Btot B
end groups
begin functions
    1 f() k1*K/(K+Btot)
end functions
begin reactions
    1 A    B  k1
    2 B,E  A  f
    3 A    E  k1
end reactions
";

    #[test]
    fn test_derivatives_are_idempotent() {
        let mut net: Network = NET.parse().unwrap();
        let x = [0.7, 0.3, 0.5];
        let first = net.derivatives(0.0, &x).unwrap();
        let second = net.derivatives(0.0, &x).unwrap();
        assert_eq!(first, second);

        let f = 2.0 / 2.3;
        assert!((first[0] - (-0.7 + f * 0.3 * 0.5 - 0.7)).abs() < 1e-12);
        assert!((first[1] - (0.7 - f * 0.3 * 0.5)).abs() < 1e-12);
        // Fixed species do not change.
        assert_eq!(first[2], 0.0);
    }

    #[test]
    fn test_non_finite_rate_is_an_error() {
        let mut net: Network = NET.parse().unwrap();
        net.parameters.at_mut(0).value = f64::INFINITY;
        let err = net.derivatives(1.5, &[1.0, 0.0, 0.5]).unwrap_err();
        assert!(matches!(err, SimError::NonFinite { species: 1, time } if time == 1.5));
    }

    #[test]
    fn test_state_length_must_match() {
        let mut net: Network = NET.parse().unwrap();
        let err = net.derivatives(0.0, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, SimError::StateLength { expected: 3, found: 2 }));

        let mut dx = [0.0; 4];
        let err = net.derivatives_into(0.0, &[1.0, 0.0, 0.5], &mut dx).unwrap_err();
        assert!(matches!(err, SimError::StateLength { expected: 3, found: 4 }));
    }

    #[test]
    fn test_euler_decay() {
        let mut net: Network = "begin parameters\n1 k 1\nend parameters\n\
                                begin species\n1 A 1\n2 B 0\nend species\n\
                                begin reactions\n1 A B k\nend reactions\n"
            .parse()
            .unwrap();
        let mut t = 0.0;
        propagate_euler(&mut net, &mut t, 1.0, 1e-4).unwrap();
        assert!((t - 1.0).abs() < 1e-9);

        let x = net.species_values();
        assert!((x[0] - (-1.0f64).exp()).abs() < 1e-3);
        assert!((x[0] + x[1] - 1.0).abs() < 1e-12);
        assert_eq!(net.rates(), vec![x[0]]);
    }
}
