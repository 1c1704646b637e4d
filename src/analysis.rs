use crate::engine::Record;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, record: &Record);
    fn report(&self) -> ObsReport;
}

/// Summary of one observer over all analyzed records.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ObsReport {
    pub name: String,
    pub entries: Vec<(String, AccumulatorReport)>,
}

/// Per-entry statistics of a record vector whose length may grow.
///
/// Entries appearing late (species added by expansion) count as zero in
/// earlier records.
struct Columns {
    names: Vec<String>,
    acc_vec: Vec<Accumulator>,
    n_records: usize,
}

impl Columns {
    fn new(names: Vec<String>) -> Self {
        Self {
            names,
            acc_vec: Vec::new(),
            n_records: 0,
        }
    }

    fn update(&mut self, vals: &[f64]) {
        if vals.len() > self.acc_vec.len() {
            let n_records = self.n_records;
            self.acc_vec
                .resize_with(vals.len(), || Accumulator::with_zeros(n_records));
        }
        for (i_val, acc) in self.acc_vec.iter_mut().enumerate() {
            acc.add(vals.get(i_val).copied().unwrap_or(0.0));
        }
        self.n_records += 1;
    }

    fn report(&self, name: &str) -> ObsReport {
        let entries = self
            .acc_vec
            .iter()
            .enumerate()
            .map(|(i_val, acc)| {
                let label = self
                    .names
                    .get(i_val)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", i_val + 1));
                (label, acc.report())
            })
            .collect();
        ObsReport {
            name: name.to_string(),
            entries,
        }
    }
}

pub struct SpeciesPop(Columns);

impl Obs for SpeciesPop {
    fn update(&mut self, record: &Record) {
        self.0.update(&record.populations);
    }

    fn report(&self) -> ObsReport {
        self.0.report("species")
    }
}

pub struct ObservableVal(Columns);

impl Obs for ObservableVal {
    fn update(&mut self, record: &Record) {
        self.0.update(&record.observables);
    }

    fn report(&self) -> ObsReport {
        self.0.report("observables")
    }
}

/// Reaction firings per unit time between consecutive records.
pub struct FiringRate {
    last: Option<(f64, u64)>,
    acc: Accumulator,
}

impl Obs for FiringRate {
    fn update(&mut self, record: &Record) {
        if let Some((time, n_steps)) = self.last {
            let dt = record.time - time;
            if dt > 0.0 {
                self.acc.add(record.n_steps.saturating_sub(n_steps) as f64 / dt);
            }
        }
        self.last = Some((record.time, record.n_steps));
    }

    fn report(&self) -> ObsReport {
        ObsReport {
            name: "firing_rate".to_string(),
            entries: vec![("events".to_string(), self.acc.report())],
        }
    }
}

pub struct Analyzer {
    n_saves: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    /// `species` and `observables` label the record columns.
    pub fn new(n_saves: usize, species: Vec<String>, observables: Vec<String>) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(SpeciesPop(Columns::new(species))),
            Box::new(ObservableVal(Columns::new(observables))),
            Box::new(FiringRate {
                last: None,
                acc: Accumulator::new(),
            }),
        ];
        Self {
            n_saves,
            obs_ptr_vec,
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.n_saves {
            let record = decode::from_read(&mut reader).context("failed to read record")?;
            self.add_record(&record);
        }
        Ok(())
    }

    pub fn add_record(&mut self, record: &Record) {
        for obs in &mut self.obs_ptr_vec {
            obs.update(record);
        }
    }

    pub fn reports(&self) -> Vec<ObsReport> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        encode::write_named(&mut writer, &self.reports()).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64, n_steps: u64, populations: &[f64]) -> Record {
        Record {
            time,
            n_steps,
            populations: populations.to_vec(),
            observables: vec![populations.iter().sum()],
        }
    }

    #[test]
    fn test_late_species_count_as_zero() {
        let mut analyzer = Analyzer::new(2, vec!["A".into()], vec!["Tot".into()]);
        analyzer.add_record(&record(1.0, 10, &[4.0]));
        analyzer.add_record(&record(2.0, 30, &[2.0, 6.0]));

        let reports = analyzer.reports();
        let species = &reports[0];
        assert_eq!(species.entries[0].0, "A");
        assert_eq!(species.entries[0].1.mean, 3.0);
        assert_eq!(species.entries[1].0, "#2");
        assert_eq!(species.entries[1].1.mean, 3.0);
        assert_eq!(species.entries[1].1.min, 0.0);

        assert_eq!(reports[1].entries[0].1.mean, 6.0);
        assert_eq!(reports[2].entries[0].1.mean, 20.0);
    }
}
