use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs,
    ops::{Bound, RangeBounds},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Simulation configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network definition file, relative to the simulation directory.
    pub network: PathBuf,

    pub simulation: SimulationConfig,

    #[serde(default)]
    pub ssa: SsaConfig,

    #[serde(default)]
    pub ode: OdeConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Stochastic simulation of molecule counts.
    Ssa,
    /// Deterministic integration of concentrations.
    Ode,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub method: Method,
    /// Simulated time covered by each trajectory file.
    pub t_span: f64,
    /// Number of frames written per trajectory file.
    pub n_saves: usize,
    /// Seed of the random number generator (drawn from the OS if absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsaConfig {
    /// Number of firings between propensity updates.
    pub update_interval: u64,
    /// Number of firings between full recomputations of the total propensity.
    pub recalc_interval: u64,
}

impl Default for SsaConfig {
    fn default() -> Self {
        Self {
            update_interval: 1,
            recalc_interval: 1_000_000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OdeConfig {
    /// Euler step size.
    pub step: f64,
}

impl Default for OdeConfig {
    fn default() -> Self {
        Self { step: 1e-3 }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpansionConfig {
    /// Program (and arguments) answering expansion requests.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be a TOML document describing a [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let text = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        text.parse()
    }

    fn validate(&self) -> Result<()> {
        let positive = (Bound::Excluded(0.0), Bound::Unbounded);

        check_num(self.simulation.t_span, positive).context("invalid time span")?;
        check_num(self.simulation.n_saves, 1..=100_000).context("invalid number of saves")?;

        check_num(self.ssa.update_interval, 1..).context("invalid update interval")?;
        check_num(self.ssa.recalc_interval, 1..).context("invalid recalculation interval")?;

        check_num(self.ode.step, positive).context("invalid step size")?;
        if self.simulation.method == Method::Ode {
            let t_save = self.simulation.t_span / self.simulation.n_saves as f64;
            check_num(self.ode.step, ..=t_save).context("step size exceeds save interval")?;
        }

        if let Some(command) = &self.expansion.command {
            if command.is_empty() {
                bail!("expansion command must name a program");
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
