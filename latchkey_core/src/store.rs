use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use log::debug;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::adapter::{ErrorKind, ExecutionResult};
use crate::payload::TestCase;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("result store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("result store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The recorded outcome of a failed execution: a transport status code, a
/// timeout, or a dead session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureStatus {
    Code(u16),
    Timeout,
    Fatal,
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStatus::Code(code) => write!(f, "{code}"),
            FailureStatus::Timeout => f.write_str("timeout"),
            FailureStatus::Fatal => f.write_str("fatal"),
        }
    }
}

impl Serialize for FailureStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One collected failure. Append-only: never mutated after being recorded.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub input: Value,
    pub status: FailureStatus,
    pub message: String,
    pub operator: String,
    pub sequence_id: u64,
    pub timestamp: String,
}

/// Counter snapshot exposed to callers and summary output.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSummary {
    pub executed: u64,
    pub succeeded: u64,
    pub errored: u64,
    pub failures: usize,
    pub interesting: u64,
    pub by_operator: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

/// Owns the failure queue and campaign counters, and persists them:
/// `failures.json` with every record, a `by_operator/` directory grouping
/// failures by the operator that produced them, and a plain-text
/// `summary.txt`. Failures are flushed incrementally so an interrupted
/// campaign loses nothing already collected.
pub struct ResultStore {
    output_dir: PathBuf,
    failures: Vec<FailureRecord>,
    executed: u64,
    succeeded: u64,
    errored: u64,
    interesting: u64,
    by_operator: BTreeMap<String, u64>,
    by_status: BTreeMap<String, u64>,
    flush_every: usize,
}

const DEFAULT_FLUSH_EVERY: usize = 5;
const SUMMARY_SAMPLE_LIMIT: usize = 5;

impl ResultStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(ResultStore {
            output_dir,
            failures: Vec::new(),
            executed: 0,
            succeeded: 0,
            errored: 0,
            interesting: 0,
            by_operator: BTreeMap::new(),
            by_status: BTreeMap::new(),
            flush_every: DEFAULT_FLUSH_EVERY,
        })
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Folds one execution into the counters, appending a failure record
    /// when the result carries an error. Flushes incrementally every
    /// `flush_every` failures.
    pub fn record<P: Serialize, R>(
        &mut self,
        case: &TestCase<P>,
        result: &ExecutionResult<R>,
    ) -> Result<(), StoreError> {
        self.executed += 1;

        let Some(error) = &result.error else {
            self.succeeded += 1;
            return Ok(());
        };

        self.errored += 1;
        let status = match error.kind {
            ErrorKind::Timeout => FailureStatus::Timeout,
            ErrorKind::Fatal => FailureStatus::Fatal,
            ErrorKind::Application => result
                .raw_status
                .map(FailureStatus::Code)
                .unwrap_or(FailureStatus::Fatal),
        };

        let record = FailureRecord {
            input: serde_json::to_value(&case.payload)?,
            status,
            message: result.log_excerpt.clone(),
            operator: case.operator.to_string(),
            sequence_id: self.executed,
            timestamp: Utc::now().to_rfc3339(),
        };

        *self.by_operator.entry(record.operator.clone()).or_insert(0) += 1;
        *self.by_status.entry(status.to_string()).or_insert(0) += 1;
        self.failures.push(record);
        debug!(
            "failure #{} recorded (operator {}, status {})",
            self.failures.len(),
            case.operator,
            status
        );

        if self.flush_every > 0 && self.failures.len() % self.flush_every == 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Counts one interesting classification (the find itself lives in the
    /// corpus).
    pub fn note_interesting(&mut self) {
        self.interesting += 1;
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            executed: self.executed,
            succeeded: self.succeeded,
            errored: self.errored,
            failures: self.failures.len(),
            interesting: self.interesting,
            by_operator: self.by_operator.clone(),
            by_status: self.by_status.clone(),
        }
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Writes all artifacts. Safe to call repeatedly; later calls overwrite
    /// with the superset of earlier data.
    pub fn flush(&self) -> Result<(), StoreError> {
        if !self.failures.is_empty() {
            let file = File::create(self.output_dir.join("failures.json"))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &self.failures)?;

            let grouped_dir = self.output_dir.join("by_operator");
            fs::create_dir_all(&grouped_dir)?;
            let mut grouped: BTreeMap<&str, Vec<&FailureRecord>> = BTreeMap::new();
            for failure in &self.failures {
                grouped.entry(&failure.operator).or_default().push(failure);
            }
            for (operator, failures) in grouped {
                let file = File::create(grouped_dir.join(format!("{operator}_failures.json")))?;
                serde_json::to_writer_pretty(BufWriter::new(file), &failures)?;
            }
        }

        let file = File::create(self.output_dir.join("summary.txt"))?;
        let mut writer = BufWriter::new(file);
        self.write_summary(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_summary<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Fuzzing Summary Report")?;
        writeln!(out, "======================")?;
        writeln!(out, "Generated: {}", Utc::now().to_rfc3339())?;
        writeln!(out, "Total executions: {}", self.executed)?;
        writeln!(out, "Successful responses: {}", self.succeeded)?;
        writeln!(out, "Error responses: {}", self.errored)?;
        writeln!(out, "Failures collected: {}", self.failures.len())?;
        writeln!(out, "Interesting finds: {}", self.interesting)?;

        writeln!(out, "\nFailures by operator:")?;
        for (operator, count) in &self.by_operator {
            writeln!(out, "  {operator}: {count} failures")?;
        }

        writeln!(out, "\nStatus distribution:")?;
        for (status, count) in &self.by_status {
            writeln!(out, "  {status}: {count} occurrences")?;
        }

        if !self.failures.is_empty() {
            writeln!(out, "\nSample failures:")?;
            for (index, failure) in self.failures.iter().take(SUMMARY_SAMPLE_LIMIT).enumerate() {
                writeln!(out, "\n--- Failure #{} ---", index + 1)?;
                writeln!(out, "Operator: {}", failure.operator)?;
                writeln!(out, "Status: {}", failure.status)?;
                writeln!(out, "Input: {}", failure.input)?;
                let mut message = failure.message.clone();
                if message.chars().count() > 200 {
                    message = message.chars().take(200).collect::<String>() + "...";
                }
                writeln!(out, "Message: {message}")?;
            }
        }
        Ok(())
    }
}
