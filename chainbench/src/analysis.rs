/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Offline analysis of latency trace logs.
//!
//! A block is the run of lines sharing one identifier; it ends at a blank
//! line or when a line with a different identifier starts.  For every
//! complete block:
//!
//! ```text
//! end-to-end = l1_end − origin_wake
//! execution  = Σ_level (send − start|recv)  +  (l1_end − l1_recv)
//! waiting    = end-to-end − execution
//! ```
//!
//! where the sum runs over the origin and every intermediate level.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no trace blocks found")]
    NoBlocks,

    #[error("histogram bin width must be positive, got {0}")]
    InvalidBinWidth(f64),

    #[error("histogram would need {bins} bins of {bin_width} us, limit is {limit}")]
    TooManyBins { bins: f64, bin_width: f64, limit: usize },
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Timestamp field within one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Wake,
    Start,
    Recv,
    Send,
    End,
}

impl Field {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "wake" => Some(Field::Wake),
            "start" => Some(Field::Start),
            "recv" => Some(Field::Recv),
            "send" => Some(Field::Send),
            "end" => Some(Field::End),
            _ => None,
        }
    }
}

/// One parsed trace line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceLine {
    pub id: u8,
    pub level: u8,
    pub field: Field,
    pub micros: f64,
}

/// Parse `ID = <n>, chain_l<level>_<field>_us = <value> us`.
pub fn parse_line(line: &str) -> Option<TraceLine> {
    let rest = line.trim().strip_prefix("ID = ")?;
    let (id, rest) = rest.split_once(", ")?;
    let (key, value) = rest.split_once(" = ")?;
    let value = value.trim_end().strip_suffix(" us")?;

    let key = key.strip_prefix("chain_l")?.strip_suffix("_us")?;
    let (level, field) = key.split_once('_')?;

    Some(TraceLine {
        id: id.trim().parse().ok()?,
        level: level.parse().ok()?,
        field: Field::parse(field)?,
        micros: value.trim().parse().ok()?,
    })
}

/// All timestamps logged for one identifier transition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub id: u8,
    pub fields: BTreeMap<(u8, Field), f64>,
}

impl Block {
    fn get(&self, level: u8, field: Field) -> Option<f64> {
        self.fields.get(&(level, field)).copied()
    }

    fn origin_level(&self) -> Option<u8> {
        self.fields.keys().map(|(l, _)| *l).max()
    }

    /// `(end_to_end, execution, waiting)` in microseconds, or `None` if any
    /// required field is missing.
    pub fn latencies(&self) -> Option<(f64, f64, f64)> {
        let origin = self.origin_level()?;
        let sink = self.fields.keys().map(|(l, _)| *l).min()?;
        if origin <= sink {
            return None;
        }

        let origin_wake = self.get(origin, Field::Wake)?;
        let sink_recv = self.get(sink, Field::Recv)?;
        let sink_end = self.get(sink, Field::End)?;

        let mut execution = sink_end - sink_recv;
        for level in (sink + 1..=origin).rev() {
            let begin = self
                .get(level, Field::Start)
                .or_else(|| self.get(level, Field::Recv))?;
            execution += self.get(level, Field::Send)? - begin;
        }

        let e2e = sink_end - origin_wake;
        Some((e2e, execution, e2e - execution))
    }
}

/// Blocks of one trace log plus the number of lines that did not parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedLog {
    pub blocks: Vec<Block>,
    pub skipped_lines: usize,
}

/// Split a trace log into blocks.
///
/// Lines that do not parse are skipped; a stage killed mid-write leaves a
/// truncated last line behind.
pub fn parse_blocks(text: &str) -> ParsedLog {
    let mut blocks = Vec::new();
    let mut skipped_lines = 0;
    let mut current: Option<Block> = None;

    for (i, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            blocks.extend(current.take());
            continue;
        }
        let Some(line) = parse_line(raw) else {
            debug!(line_no = i + 1, "skipping malformed trace line");
            skipped_lines += 1;
            continue;
        };

        if current.as_ref().is_some_and(|b| b.id != line.id) {
            blocks.extend(current.take());
        }
        current
            .get_or_insert_with(|| Block {
                id: line.id,
                ..Block::default()
            })
            .fields
            .insert((line.level, line.field), line.micros);
    }
    blocks.extend(current);
    ParsedLog {
        blocks,
        skipped_lines,
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n − 1); zero for a single value.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Some(Self {
            count: values.len(),
            mean,
            std_dev,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Upper bound on histogram bins; a finer width over a wide spread is an
/// error rather than an allocation.
pub const MAX_BINS: usize = 100_000;

/// Fixed-width bins starting at the smallest value.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn build(values: &[f64], bin_width: f64) -> Result<Self, AnalysisError> {
        if !(bin_width > 0.0) {
            return Err(AnalysisError::InvalidBinWidth(bin_width));
        }
        let start = values.iter().copied().fold(f64::INFINITY, f64::min);
        if !start.is_finite() {
            return Ok(Self {
                start: 0.0,
                bin_width,
                counts: Vec::new(),
            });
        }
        let end = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bins = ((end - start) / bin_width).floor() + 1.0;
        if !(bins <= MAX_BINS as f64) {
            return Err(AnalysisError::TooManyBins {
                bins,
                bin_width,
                limit: MAX_BINS,
            });
        }

        let mut counts = vec![0usize; bins as usize];
        for v in values {
            let idx = ((v - start) / bin_width).floor() as usize;
            let last = counts.len() - 1;
            counts[idx.min(last)] += 1;
        }
        Ok(Self {
            start,
            bin_width,
            counts,
        })
    }
}

const BAR_WIDTH: usize = 50;

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peak = self.counts.iter().copied().max().unwrap_or(0).max(1);
        for (i, count) in self.counts.iter().enumerate() {
            let lo = self.start + i as f64 * self.bin_width;
            let bar = "#".repeat(count * BAR_WIDTH / peak);
            writeln!(
                f,
                "  [{:>10.1}, {:>10.1}) us {:>6} {}",
                lo,
                lo + self.bin_width,
                count,
                bar
            )?;
        }
        Ok(())
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub blocks: usize,
    pub end_to_end: Summary,
    pub execution: Summary,
    pub waiting: Summary,
    /// `complete blocks × period`, in milliseconds.
    pub covered_ms: f64,
    pub end_to_end_histogram: Histogram,
    pub execution_histogram: Histogram,
    pub waiting_histogram: Histogram,
    /// Identifiers of blocks missing a required field.
    pub incomplete: Vec<u8>,
    /// Lines that did not parse as trace lines.
    pub skipped_lines: usize,
}

/// Analyse parsed blocks.
pub fn analyze_blocks(blocks: &[Block], period_ms: f64, bin_width_us: f64) -> Result<Report, AnalysisError> {
    let mut e2e = Vec::new();
    let mut exec = Vec::new();
    let mut wait = Vec::new();
    let mut incomplete = Vec::new();

    for b in blocks {
        match b.latencies() {
            Some((e, x, w)) => {
                e2e.push(e);
                exec.push(x);
                wait.push(w);
            }
            None => incomplete.push(b.id),
        }
    }

    let (Some(end_to_end), Some(execution), Some(waiting)) =
        (Summary::of(&e2e), Summary::of(&exec), Summary::of(&wait))
    else {
        return Err(AnalysisError::NoBlocks);
    };

    Ok(Report {
        blocks: blocks.len(),
        end_to_end,
        execution,
        waiting,
        covered_ms: e2e.len() as f64 * period_ms,
        end_to_end_histogram: Histogram::build(&e2e, bin_width_us)?,
        execution_histogram: Histogram::build(&exec, bin_width_us)?,
        waiting_histogram: Histogram::build(&wait, bin_width_us)?,
        incomplete,
        skipped_lines: 0,
    })
}

/// Parse and analyse the text of one trace log.
pub fn analyze_text(text: &str, period_ms: f64, bin_width_us: f64) -> Result<Report, AnalysisError> {
    let parsed = parse_blocks(text);
    let mut report = analyze_blocks(&parsed.blocks, period_ms, bin_width_us)?;
    report.skipped_lines = parsed.skipped_lines;
    Ok(report)
}

/// Read, parse and analyse one trace log file.
pub fn analyze_file(path: &Path, period_ms: f64, bin_width_us: f64) -> Result<Report, AnalysisError> {
    let text = std::fs::read_to_string(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    analyze_text(&text, period_ms, bin_width_us)
}

fn write_summary(f: &mut fmt::Formatter<'_>, label: &str, s: &Summary) -> fmt::Result {
    writeln!(
        f,
        "{label:<12} mean {:>10.2} us  std {:>9.2} us  min {:>10.2} us  max {:>10.2} us",
        s.mean, s.std_dev, s.min, s.max
    )
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "blocks: {} (complete {}), covered time: {:.1} ms",
            self.blocks, self.end_to_end.count, self.covered_ms
        )?;
        write_summary(f, "end-to-end", &self.end_to_end)?;
        write_summary(f, "execution", &self.execution)?;
        write_summary(f, "waiting", &self.waiting)?;
        if !self.incomplete.is_empty() {
            writeln!(f, "incomplete ids: {:?}", self.incomplete)?;
        }
        if self.skipped_lines > 0 {
            writeln!(f, "skipped lines: {}", self.skipped_lines)?;
        }
        writeln!(f, "end-to-end histogram:")?;
        write!(f, "{}", self.end_to_end_histogram)?;
        writeln!(f, "execution histogram:")?;
        write!(f, "{}", self.execution_histogram)?;
        writeln!(f, "waiting histogram:")?;
        write!(f, "{}", self.waiting_histogram)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
ID = 7, chain_l3_wake_us = 100000.00 us
ID = 7, chain_l3_start_us = 105000.00 us
ID = 7, chain_l3_send_us = 110000.00 us
ID = 7, chain_l2_wake_us = 111000.00 us
ID = 7, chain_l2_recv_us = 111000.00 us
ID = 7, chain_l2_send_us = 111500.00 us
ID = 7, chain_l1_wake_us = 112000.00 us
ID = 7, chain_l1_recv_us = 112000.00 us
ID = 7, chain_l1_end_us = 120000.00 us

ID = 8, chain_l3_wake_us = 133000.00 us
ID = 8, chain_l3_start_us = 133000.00 us
ID = 8, chain_l3_send_us = 140000.00 us
ID = 8, chain_l2_recv_us = 141000.00 us
ID = 8, chain_l2_send_us = 142000.00 us
ID = 8, chain_l1_recv_us = 143000.00 us
ID = 8, chain_l1_end_us = 150000.00 us

";

    #[test]
    fn parse_line_reads_all_parts() {
        let l = parse_line("ID = 12, chain_l3_start_us = 1234.50 us").unwrap();
        assert_eq!(l.id, 12);
        assert_eq!(l.level, 3);
        assert_eq!(l.field, Field::Start);
        assert!((l.micros - 1234.5).abs() < 1e-9);
    }

    #[test]
    fn parse_line_rejects_garbage() {
        assert!(parse_line("hello").is_none());
        assert!(parse_line("ID = x, chain_l3_wake_us = 1 us").is_none());
        assert!(parse_line("ID = 1, chain_l3_nap_us = 1 us").is_none());
    }

    #[test]
    fn blocks_split_on_blank_line_and_id_change() {
        let text = "\
ID = 1, chain_l1_end_us = 1.00 us
ID = 2, chain_l1_end_us = 2.00 us

ID = 2, chain_l1_end_us = 3.00 us
";
        let blocks = parse_blocks(text).blocks;
        assert_eq!(blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2, 2]);
    }

    #[test]
    fn latencies_follow_definitions() {
        let blocks = parse_blocks(LOG).blocks;
        let (e2e, exec, wait) = blocks[0].latencies().unwrap();
        assert!((e2e - 20_000.0).abs() < 1e-6);
        // (110000-105000) + (111500-111000) + (120000-112000)
        assert!((exec - 13_500.0).abs() < 1e-6);
        assert!((wait - 6_500.0).abs() < 1e-6);
    }

    #[test]
    fn report_summarises_complete_blocks() {
        let r = analyze_text(LOG, 33.0, 1_000.0).unwrap();
        assert_eq!(r.blocks, 2);
        assert_eq!(r.end_to_end.count, 2);
        assert!((r.end_to_end.mean - 18_500.0).abs() < 1e-6);
        assert!((r.end_to_end.min - 17_000.0).abs() < 1e-6);
        assert!((r.covered_ms - 66.0).abs() < 1e-9);
        assert_eq!(r.end_to_end_histogram.counts.iter().sum::<usize>(), 2);
        assert!(r.incomplete.is_empty());
        assert_eq!(r.skipped_lines, 0);
        assert!(r.to_string().contains("end-to-end"));
    }

    #[test]
    fn every_latency_gets_a_histogram() {
        let r = analyze_text(LOG, 33.0, 1_000.0).unwrap();
        // execution 13500 and 15000 us
        assert_eq!(r.execution_histogram.start, 13_500.0);
        assert_eq!(r.execution_histogram.counts, vec![1, 1]);
        // waiting 6500 and 2000 us
        assert_eq!(r.waiting_histogram.start, 2_000.0);
        assert_eq!(r.waiting_histogram.counts, vec![1, 0, 0, 0, 1]);

        let text = r.to_string();
        assert!(text.contains("execution histogram:"));
        assert!(text.contains("waiting histogram:"));
    }

    #[test]
    fn truncated_last_line_is_skipped() {
        let text = format!("{LOG}ID = 8, chain_l2_wa");
        let r = analyze_text(&text, 33.0, 1_000.0).unwrap();
        assert_eq!(r.end_to_end.count, 2);
        assert_eq!(r.skipped_lines, 1);
        assert!(r.to_string().contains("skipped lines: 1"));
    }

    #[test]
    fn garbage_between_lines_does_not_split_block() {
        let text = "\
ID = 3, chain_l2_wake_us = 0.00 us
not a trace line
ID = 3, chain_l2_send_us = 5.00 us
";
        let parsed = parse_blocks(text);
        assert_eq!(parsed.skipped_lines, 1);
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.blocks[0].fields.len(), 2);
    }

    #[test]
    fn incomplete_blocks_are_listed() {
        let text = format!("{LOG}ID = 9, chain_l3_wake_us = 160000.00 us\n");
        let r = analyze_text(&text, 33.0, 1_000.0).unwrap();
        assert_eq!(r.incomplete, vec![9]);
    }

    #[test]
    fn empty_log_has_no_blocks() {
        assert!(matches!(analyze_text("", 5.0, 100.0), Err(AnalysisError::NoBlocks)));
    }

    #[test]
    fn sample_std_dev_uses_n_minus_one() {
        let s = Summary::of(&[1.0, 3.0]).unwrap();
        assert!((s.std_dev - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(Summary::of(&[4.0]).unwrap().std_dev, 0.0);
    }

    #[test]
    fn histogram_rejects_zero_width() {
        assert!(matches!(
            Histogram::build(&[1.0], 0.0),
            Err(AnalysisError::InvalidBinWidth(_))
        ));
    }

    #[test]
    fn histogram_rejects_excessive_bin_count() {
        assert!(matches!(
            Histogram::build(&[0.0, 1.0e6], 1.0e-12),
            Err(AnalysisError::TooManyBins { limit: MAX_BINS, .. })
        ));
        assert!(matches!(
            analyze_text(LOG, 33.0, 1.0e-9),
            Err(AnalysisError::TooManyBins { .. })
        ));
    }

    #[test]
    fn histogram_places_maximum_in_last_bin() {
        let h = Histogram::build(&[0.0, 1.0, 2.0], 1.0).unwrap();
        assert_eq!(h.counts, vec![1, 1, 1]);
    }

    #[test]
    fn analyze_file_reads_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_Chain 3_tcp.txt");
        std::fs::write(&path, LOG).unwrap();
        let r = analyze_file(&path, 33.0, 500.0).unwrap();
        assert_eq!(r.end_to_end.count, 2);
    }
}
