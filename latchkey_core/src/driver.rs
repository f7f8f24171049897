use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;

use crate::adapter::{ErrorKind, Recovery, TargetAdapter};
use crate::corpus::SeedCorpus;
use crate::mutator::OperatorSet;
use crate::oracle::Oracle;
use crate::payload::SeedPayload;
use crate::schedule::PowerSchedule;
use crate::state::StateTracker;
use crate::store::{ResultStore, StoreError, StoreSummary};

/// The final accounting of one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub name: String,
    pub rounds: u64,
    pub elapsed_secs: f64,
    pub corpus_size: usize,
    pub seeds_with_finds: usize,
    pub cancelled: bool,
    pub store: StoreSummary,
}

/// One campaign: the loop wiring scheduler, mutation, execution,
/// classification, state tracking and recovery together for a single target.
///
/// The loop is strictly sequential per target: the session state and
/// connection are shared mutable resources with no internal locking, so test
/// cases are never issued concurrently against the same adapter. Campaigns
/// for distinct targets are independent and may run on separate threads.
pub struct CampaignDriver<P: SeedPayload, Resp, R: Rng> {
    name: String,
    corpus: SeedCorpus<P>,
    operators: OperatorSet<P, R>,
    oracle: Box<dyn Oracle<P, Resp, R>>,
    tracker: Option<Box<dyn StateTracker>>,
    schedule: PowerSchedule,
    store: ResultStore,
    pacing: Duration,
    cancel: Arc<AtomicBool>,
    rng: R,
}

impl<P: SeedPayload, Resp, R: Rng> CampaignDriver<P, Resp, R> {
    pub fn new(
        name: impl Into<String>,
        corpus: SeedCorpus<P>,
        operators: OperatorSet<P, R>,
        oracle: Box<dyn Oracle<P, Resp, R>>,
        schedule: PowerSchedule,
        store: ResultStore,
        rng: R,
    ) -> Self {
        CampaignDriver {
            name: name.into(),
            corpus,
            operators,
            oracle,
            tracker: None,
            schedule,
            store,
            pacing: Duration::ZERO,
            cancel: Arc::new(AtomicBool::new(false)),
            rng,
        }
    }

    /// Attaches protocol-state tracking; scheduling then filters seeds by
    /// the tracked state.
    pub fn with_tracker(mut self, tracker: Box<dyn StateTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Inter-iteration delay, to avoid overwhelming the target.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Shares a cancellation flag; the loop checks it between test cases and
    /// stops issuing new ones promptly once set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Runs up to `iterations` scheduling rounds against the adapter and
    /// flushes the result store before returning. Execution failures never
    /// abort the loop; only cancellation or the iteration cap end it.
    pub fn run(
        &mut self,
        adapter: &mut dyn TargetAdapter<P, Response = Resp>,
        iterations: u64,
    ) -> Result<CampaignReport, StoreError> {
        let started = Instant::now();
        info!(
            "campaign {}: starting, {} seeds, {} iterations",
            self.name,
            self.corpus.len(),
            iterations
        );

        let mut rounds = 0;
        while rounds < iterations && !self.cancelled() {
            let current_state = self.tracker.as_ref().map(|t| t.current());
            let seed = self.corpus.choose_next(current_state, &mut self.rng);
            let fingerprint = seed.fingerprint();
            let energy = self
                .schedule
                .assign(self.corpus.interesting_count(&fingerprint), &mut self.rng);
            debug!(
                "campaign {}: round {} energy {} state {:?}",
                self.name,
                rounds + 1,
                energy,
                current_state
            );

            for _ in 0..energy {
                if self.cancelled() {
                    break;
                }

                let case = self.operators.mutate(&seed, &mut self.rng);
                let result = adapter.execute(&case);

                if let Err(err) = self.store.record(&case, &result) {
                    // Persistence trouble must not end the campaign.
                    warn!("campaign {}: failed to record result: {err}", self.name);
                }

                if self
                    .oracle
                    .is_interesting(&seed, &result, &mut self.rng)
                {
                    debug!(
                        "campaign {}: interesting behavior via {}",
                        self.name, case.operator
                    );
                    self.store.note_interesting();
                    self.corpus
                        .record_interesting(&fingerprint, case.payload.clone());
                }

                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.update(&result.log_excerpt);
                }

                if result.error_kind() == Some(ErrorKind::Fatal) {
                    match adapter.recover() {
                        Recovery::Reconnected => {}
                        Recovery::GaveUp => {
                            warn!(
                                "campaign {}: recovery failed, abandoning remaining energy",
                                self.name
                            );
                            break;
                        }
                        Recovery::Unsupported => {}
                    }
                }

                if !self.pacing.is_zero() {
                    thread::sleep(self.pacing);
                }
            }

            rounds += 1;
        }

        let cancelled = self.cancelled();
        if cancelled {
            info!("campaign {}: cancelled, flushing partial results", self.name);
        }
        self.store.flush()?;

        let report = CampaignReport {
            name: self.name.clone(),
            rounds,
            elapsed_secs: started.elapsed().as_secs_f64(),
            corpus_size: self.corpus.len(),
            seeds_with_finds: self.corpus.seeds_with_finds(),
            cancelled,
            store: self.store.summary(),
        };
        info!(
            "campaign {}: finished after {} rounds, {} executions, {} failures",
            report.name, report.rounds, report.store.executed, report.store.failures
        );
        Ok(report)
    }
}
