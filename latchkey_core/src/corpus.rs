use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;

use crate::payload::{ProtocolState, SeedPayload};

/// Errors that can occur while reading a seed file.
///
/// These never escape the corpus: [`SeedCorpus::load_or_default`] recovers by
/// falling back to the payload's built-in default seeds.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read seed file {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("failed to parse seed file {path}: {detail}")]
    Parse { path: String, detail: String },
}

/// The seed queue plus the per-seed interest ledger.
///
/// Consumption is FIFO for stateless selection and uniform sampling under
/// state filtering; insertion is append-only. The queue is never allowed to
/// stay empty going into a scheduling round: a default seed is synthesized
/// on demand. Interesting-counts are keyed by seed fingerprint, never
/// decremented, and live for the whole campaign.
#[derive(Debug)]
pub struct SeedCorpus<P: SeedPayload> {
    queue: VecDeque<P>,
    interesting: HashMap<String, u32>,
}

impl<P: SeedPayload> SeedCorpus<P> {
    pub fn new() -> Self {
        SeedCorpus {
            queue: VecDeque::new(),
            interesting: HashMap::new(),
        }
    }

    /// Reads a JSON array of seed records from `path`.
    pub fn load(path: &Path) -> Result<Vec<P>, CorpusError> {
        let content = fs::read_to_string(path).map_err(|e| CorpusError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| CorpusError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Builds a corpus from a seed file, falling back to the payload's
    /// built-in defaults on any load failure. Never raises: a missing or
    /// malformed seed file must not stop a campaign.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let seeds = match path {
            Some(path) => match Self::load(path) {
                Ok(seeds) if !seeds.is_empty() => {
                    info!("loaded {} seeds from {}", seeds.len(), path.display());
                    seeds
                }
                Ok(_) => {
                    warn!(
                        "seed file {} is empty, using built-in defaults",
                        path.display()
                    );
                    P::default_seeds()
                }
                Err(err) => {
                    warn!("{err}; using built-in defaults");
                    P::default_seeds()
                }
            },
            None => {
                info!("no seed file configured, using built-in defaults");
                P::default_seeds()
            }
        };
        let mut corpus = SeedCorpus::new();
        corpus.queue.extend(seeds);
        corpus
    }

    /// Selects the next seed to fuzz.
    ///
    /// With no current state (stateless targets) the front of the queue is
    /// popped. With a current state, a seed whose precondition accepts that
    /// state is sampled uniformly and left in place; if nothing matches, the
    /// sample falls back to the entire queue. An empty queue is replenished
    /// with one synthesized default first, so this never blocks or errors.
    pub fn choose_next<R: Rng + ?Sized>(
        &mut self,
        current: Option<ProtocolState>,
        rng: &mut R,
    ) -> P {
        if self.queue.is_empty() {
            let seed = P::synthesize(rng);
            debug!("seed queue empty, synthesized default seed: {seed:?}");
            self.queue.push_back(seed);
        }

        match current {
            None => match self.queue.pop_front() {
                Some(seed) => seed,
                // Unreachable after the replenishment above; stay total anyway.
                None => P::synthesize(rng),
            },
            Some(state) => {
                let candidates: Vec<usize> = (0..self.queue.len())
                    .filter(|&i| self.queue[i].eligible_from(state))
                    .collect();
                let index = if candidates.is_empty() {
                    rng.random_range(0..self.queue.len())
                } else {
                    candidates[rng.random_range(0..candidates.len())]
                };
                self.queue[index].clone()
            }
        }
    }

    /// Credits the originating seed with one interesting find and appends
    /// the derived test case to the queue as a new seed.
    pub fn record_interesting(&mut self, origin_fingerprint: &str, derived: P) {
        *self
            .interesting
            .entry(origin_fingerprint.to_string())
            .or_insert(0) += 1;
        self.queue.push_back(derived);
    }

    pub fn interesting_count(&self, fingerprint: &str) -> u32 {
        self.interesting.get(fingerprint).copied().unwrap_or(0)
    }

    /// Number of distinct seeds that have produced at least one interesting
    /// result.
    pub fn seeds_with_finds(&self) -> usize {
        self.interesting.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&mut self, seed: P) {
        self.queue.push_back(seed);
    }
}

impl<P: SeedPayload> Default for SeedCorpus<P> {
    fn default() -> Self {
        SeedCorpus::new()
    }
}
