//! On-the-fly network expansion.
//!
//! When a species is populated for the first time and no reaction consumes
//! it, the stochastic engine asks an [`ExpansionOracle`] whether the network
//! should grow. The oracle answers with a patch of species, reactions and
//! groups, which the network merges atomically.

use crate::reader::NetworkDef;
use anyhow::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Answer of an oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Declined,
    Grow(NetworkDef),
}

pub trait ExpansionOracle {
    /// Called with the names of the newly populated species.
    fn expand(&mut self, names: &[String]) -> Result<Expansion>;
}

/// Oracle that never grows the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

impl ExpansionOracle for NoExpansion {
    fn expand(&mut self, _names: &[String]) -> Result<Expansion> {
        Ok(Expansion::Declined)
    }
}

impl<F> ExpansionOracle for F
where
    F: FnMut(&[String]) -> Result<Expansion>,
{
    fn expand(&mut self, names: &[String]) -> Result<Expansion> {
        self(names)
    }
}

/// Oracle speaking the `edgepop` line protocol.
///
/// The request is a single line `edgepop: <name> <name> …`. A response line
/// starting with `read` is followed by the patch in definition format, which
/// ends at a blank line, at end of input, or right after `end groups`. Any
/// other response declines.
pub struct LineOracle<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LineOracle<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn read_payload(&mut self) -> Result<String> {
        let mut payload = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n_bytes = self
                .reader
                .read_line(&mut line)
                .context("failed to read payload")?;
            if n_bytes == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if payload.is_empty() {
                    continue;
                }
                break;
            }
            payload.push_str(&line);
            if !line.ends_with('\n') {
                payload.push('\n');
            }
            if trimmed.split_whitespace().eq(["end", "groups"]) {
                break;
            }
        }
        Ok(payload)
    }
}

impl<R: BufRead, W: Write> ExpansionOracle for LineOracle<R, W> {
    fn expand(&mut self, names: &[String]) -> Result<Expansion> {
        writeln!(self.writer, "edgepop: {}", names.join(" "))
            .context("failed to write request")?;
        self.writer.flush().context("failed to flush request")?;

        let mut response = String::new();
        let n_bytes = self
            .reader
            .read_line(&mut response)
            .context("failed to read response")?;
        if n_bytes == 0 {
            bail!("oracle closed its output");
        }
        log::debug!("oracle responded {:?}", response.trim_end());
        if !response.starts_with("read") {
            return Ok(Expansion::Declined);
        }

        let payload = self.read_payload()?;
        let patch: NetworkDef = payload.parse().context("malformed expansion payload")?;
        Ok(Expansion::Grow(patch))
    }
}

/// Line-protocol oracle backed by a child process.
///
/// The child reads requests on its stdin and answers on its stdout. It is
/// killed when the oracle is dropped.
pub struct ProcessOracle {
    child: Child,
    lines: LineOracle<BufReader<ChildStdout>, ChildStdin>,
}

impl ProcessOracle {
    /// Spawn `command`, whose first element is the program.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().context("empty expansion command")?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {program:?}"))?;
        let stdin = child.stdin.take().context("failed to open child stdin")?;
        let stdout = child.stdout.take().context("failed to open child stdout")?;
        log::info!("spawned expansion oracle {command:?}");
        Ok(Self {
            child,
            lines: LineOracle::new(BufReader::new(stdout), stdin),
        })
    }
}

impl ExpansionOracle for ProcessOracle {
    fn expand(&mut self, names: &[String]) -> Result<Expansion> {
        self.lines.expand(names)
    }
}

impl Drop for ProcessOracle {
    fn drop(&mut self) {
        if let Err(error) = self.child.kill() {
            log::debug!("failed to kill expansion oracle: {error}");
        }
        self.child.wait().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_line_oracle_reads_patch() {
        let response = "read\n\
                        begin species\n5 Q 0\nend species\n\
                        begin reactions\n5 4 5 k1\nend reactions\n\
                        begin groups\n1 Qtot Q\nend groups\n\
                        ignored trailing line\n";
        let mut oracle = LineOracle::new(Cursor::new(response), Vec::new());

        let Expansion::Grow(patch) = oracle.expand(&names(&["P", "R"])).unwrap() else {
            panic!("expected a patch");
        };
        assert_eq!(patch.species.len(), 1);
        assert_eq!(patch.reactions.len(), 1);
        assert_eq!(patch.groups.len(), 1);

        let (mut reader, writer) = oracle.into_parts();
        assert_eq!(String::from_utf8(writer).unwrap(), "edgepop: P R\n");
        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "ignored trailing line\n");
    }

    #[test]
    fn test_line_oracle_payload_ends_at_blank_line() {
        let response = "read\nbegin species\n5 Q 0\nend species\n\nnext\n";
        let mut oracle = LineOracle::new(Cursor::new(response), Vec::new());
        let Expansion::Grow(patch) = oracle.expand(&names(&["P"])).unwrap() else {
            panic!("expected a patch");
        };
        assert!(patch.reactions.is_empty());
    }

    #[test]
    fn test_line_oracle_declines() {
        let mut oracle = LineOracle::new(Cursor::new("nothing new\n"), Vec::new());
        assert_eq!(oracle.expand(&names(&["P"])).unwrap(), Expansion::Declined);

        let mut oracle = LineOracle::new(Cursor::new(""), Vec::new());
        assert!(oracle.expand(&names(&["P"])).is_err());

        let mut oracle = LineOracle::new(Cursor::new("read\nbegin species\n5 Q 0\n"), Vec::new());
        assert!(oracle.expand(&names(&["P"])).is_err());
    }

    #[test]
    fn test_closure_oracle() {
        let mut calls = 0;
        let mut oracle = |_: &[String]| -> Result<Expansion> {
            calls += 1;
            Ok(Expansion::Declined)
        };
        oracle.expand(&names(&["A"])).unwrap();
        oracle.expand(&names(&["B"])).unwrap();
        assert_eq!(calls, 2);
    }
}
