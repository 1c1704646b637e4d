use crate::config::{Config, Method};
use crate::expansion::ExpansionOracle;
use crate::graph::DependencyGraph;
use crate::network::Network;
use crate::ode::propagate_euler;
use crate::ssa::{Gillespie, Outcome};
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// State saved after each interval of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: f64,
    pub n_steps: u64,
    pub populations: Vec<f64>,
    pub observables: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Propagator {
    Ssa(Gillespie),
    Ode,
}

/// Simulation engine.
///
/// Holds the configuration, the network with its dependency graph, the
/// propagator state, and the random number generator, and provides methods
/// to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    network: Network,
    graph: DependencyGraph,
    propagator: Propagator,
    time: f64,
    exhausted: bool,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` from the network file named in the configuration.
    ///
    /// The network path is resolved against `sim_dir`.
    pub fn from_network_file<P: AsRef<Path>>(cfg: Config, sim_dir: P) -> Result<Self> {
        let file = sim_dir.as_ref().join(&cfg.network);
        let text = fs::read_to_string(&file).with_context(|| format!("failed to read {file:?}"))?;
        let network: Network = text
            .parse()
            .with_context(|| format!("failed to build network from {file:?}"))?;
        Self::new(cfg, network)
    }

    pub fn new(cfg: Config, mut network: Network) -> Result<Self> {
        let rng = match cfg.simulation.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let graph = DependencyGraph::build(&network);

        let propagator = match cfg.simulation.method {
            Method::Ssa => Propagator::Ssa(
                Gillespie::new(
                    &mut network,
                    cfg.ssa.update_interval,
                    cfg.ssa.recalc_interval,
                )
                .context("failed to initialize stochastic engine")?,
            ),
            Method::Ode => {
                let x = network.species_values();
                network.refresh_observables(&x);
                network
                    .refresh_functions()
                    .context("failed to evaluate functions")?;
                Propagator::Ode
            }
        };

        Ok(Self {
            cfg,
            network,
            graph,
            propagator,
            time: 0.0,
            exhausted: false,
            rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Simulate one time span and save a record after each interval to a binary file.
    pub fn run_simulation<P: AsRef<Path>>(
        &mut self,
        file: P,
        oracle: &mut dyn ExpansionOracle,
    ) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let n_saves = self.cfg.simulation.n_saves;
        let t_save = self.cfg.simulation.t_span / n_saves as f64;
        for i_save in 0..n_saves {
            self.propagate(t_save, oracle)
                .with_context(|| format!("failed to propagate from t={}", self.time))?;

            encode::write(&mut writer, &self.record()).context("failed to serialize record")?;

            let progress = 100.0 * (i_save + 1) as f64 / n_saves as f64;
            log::info!("completed {progress:06.2}%");
        }

        writer.flush().context("failed to flush writer stream")?;

        if let Propagator::Ssa(ssa) = &self.propagator {
            log::info!(
                "{} steps, {} of {} species ever populated, {:.3} of reactions active",
                ssa.n_steps(),
                ssa.n_species_ever_populated(),
                self.network.species.len(),
                ssa.frac_reactions_active()
            );
        }

        Ok(())
    }

    fn propagate(&mut self, delta_t: f64, oracle: &mut dyn ExpansionOracle) -> Result<()> {
        match &mut self.propagator {
            Propagator::Ssa(ssa) => {
                if !self.exhausted {
                    let outcome = ssa.advance(
                        &mut self.network,
                        &mut self.graph,
                        delta_t,
                        &mut self.rng,
                        oracle,
                    )?;
                    if outcome == Outcome::Exhausted {
                        log::info!("no reaction can fire after t={}", self.time);
                        self.exhausted = true;
                    }
                }
                self.time += delta_t;
            }
            Propagator::Ode => {
                propagate_euler(&mut self.network, &mut self.time, delta_t, self.cfg.ode.step)?;
            }
        }
        Ok(())
    }

    pub fn record(&self) -> Record {
        let n_steps = match &self.propagator {
            Propagator::Ssa(ssa) => ssa.n_steps(),
            Propagator::Ode => 0,
        };
        Record {
            time: self.time,
            n_steps,
            populations: self.network.species_values(),
            observables: self.network.observables.iter().map(|obs| obs.total).collect(),
        }
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::NoExpansion;

    const NET: &str = "
begin parameters
    1 k1 1.0
    2 k2 0.5
end parameters
begin species
    1 A 200
    2 B 0
end species
begin groups
    1 Btot B
end groups
begin reactions
    1 A B k1
    2 B A k2
end reactions
";

    fn config(method: &str) -> Config {
        format!(
            "network = \"model.net\"\n\
             [simulation]\nmethod = \"{method}\"\nt_span = 2.0\nn_saves = 4\nseed = 9\n"
        )
        .parse()
        .unwrap()
    }

    #[test]
    fn test_checkpoint_resumes_same_stream() {
        let dir = std::env::temp_dir().join(format!("rxnet-engine-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut engine = Engine::new(config("ssa"), NET.parse().unwrap()).unwrap();
        engine
            .run_simulation(dir.join("first.msgpack"), &mut NoExpansion)
            .unwrap();
        engine.save_checkpoint(dir.join("checkpoint.msgpack")).unwrap();
        let mut resumed = Engine::load_checkpoint(dir.join("checkpoint.msgpack")).unwrap();
        assert_eq!(resumed.cfg(), engine.cfg());

        engine
            .run_simulation(dir.join("a.msgpack"), &mut NoExpansion)
            .unwrap();
        resumed
            .run_simulation(dir.join("b.msgpack"), &mut NoExpansion)
            .unwrap();
        assert_eq!(engine.record(), resumed.record());
        assert!((engine.time() - 4.0).abs() < 1e-12);

        let record = engine.record();
        assert_eq!(record.populations.iter().sum::<f64>(), 200.0);
        assert_eq!(record.observables, vec![record.populations[1]]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ode_engine_approaches_equilibrium() {
        let mut cfg = config("ode");
        cfg.simulation.t_span = 20.0;
        cfg.ode.step = 1e-3;
        let mut engine = Engine::new(cfg, NET.parse().unwrap()).unwrap();
        let dir = std::env::temp_dir().join(format!("rxnet-ode-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        engine
            .run_simulation(dir.join("ode.msgpack"), &mut NoExpansion)
            .unwrap();

        // k1 A = k2 B at equilibrium.
        let record = engine.record();
        assert!((record.populations[0] - 200.0 / 3.0).abs() < 1e-3);
        assert!((record.observables[0] - 400.0 / 3.0).abs() < 1e-3);
        assert_eq!(record.n_steps, 0);

        fs::remove_dir_all(&dir).ok();
    }
}
