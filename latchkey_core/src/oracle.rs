use rand::Rng;

use crate::adapter::{ExecutionResult, HttpResponse};
use crate::payload::{ProductRecord, SessionSeed};
use crate::state::markers_for;

/// Classifies one execution outcome as worth further exploration or not.
/// Pure with respect to campaign state; the random source only feeds
/// documented sampling behavior.
pub trait Oracle<P, Resp, R: Rng + ?Sized>: Send {
    fn is_interesting(&self, seed: &P, result: &ExecutionResult<Resp>, rng: &mut R) -> bool;
}

/// Stateless-target oracle: missing responses and error statuses are
/// interesting, and a small fixed fraction of successes is kept anyway to
/// keep sampling response diversity. The sampling is documented
/// non-determinism, not a bug, and the rate is a tunable parameter.
#[derive(Debug, Clone, Copy)]
pub struct EndpointOracle {
    pub sample_rate: f64,
}

impl EndpointOracle {
    pub fn new(sample_rate: f64) -> Self {
        EndpointOracle { sample_rate }
    }
}

impl Default for EndpointOracle {
    fn default() -> Self {
        EndpointOracle { sample_rate: 0.1 }
    }
}

impl<R: Rng + ?Sized> Oracle<ProductRecord, HttpResponse, R> for EndpointOracle {
    fn is_interesting(
        &self,
        _seed: &ProductRecord,
        result: &ExecutionResult<HttpResponse>,
        rng: &mut R,
    ) -> bool {
        if result.response.is_none() {
            return true;
        }
        if matches!(result.raw_status, Some(status) if status >= 400) {
            return true;
        }
        self.sample_rate > 0.0 && rng.random_bool(self.sample_rate.min(1.0))
    }
}

/// Device log markers that indicate a firmware-level failure.
pub const CRASH_MARKERS: [&str; 2] = ["[Error]", "Guru Meditation"];

/// Response code the device uses for an accepted command.
const RESPONSE_OK: u8 = 0x00;

/// Session-target oracle. Four independent checks; any one makes the result
/// interesting:
/// 1. the response is absent or not the expected shape,
/// 2. the seed expected an error (`to_state = "error"`) but the device
///    accepted the command,
/// 3. the declared end-state is not reflected in the device log,
/// 4. the log carries a known crash marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockOracle;

impl LockOracle {
    /// Whether the log excerpt reflects the declared end-state. End-states
    /// naming a protocol state accept any of that state's log markers (a
    /// "Lock mechanism closed" line announces Locked); other strings are
    /// matched verbatim. Case-insensitive either way.
    fn end_state_reached(to_state: &str, log_excerpt: &str) -> bool {
        let log_lower = log_excerpt.to_lowercase();
        match to_state.parse::<crate::payload::ProtocolState>() {
            Ok(state) => markers_for(state)
                .iter()
                .any(|marker| log_lower.contains(&marker.to_lowercase())),
            Err(_) => log_lower.contains(&to_state.to_lowercase()),
        }
    }
}

impl<R: Rng + ?Sized> Oracle<SessionSeed, Vec<u8>, R> for LockOracle {
    fn is_interesting(
        &self,
        seed: &SessionSeed,
        result: &ExecutionResult<Vec<u8>>,
        _rng: &mut R,
    ) -> bool {
        let response = match &result.response {
            None => return true,
            Some(response) => response,
        };

        // An expected failure that did not occur is itself a finding.
        if seed.to_state == "error" && response.first() == Some(&RESPONSE_OK) {
            return true;
        }

        if !seed.to_state.is_empty()
            && !Self::end_state_reached(&seed.to_state, &result.log_excerpt)
        {
            return true;
        }

        CRASH_MARKERS
            .iter()
            .any(|marker| result.log_excerpt.contains(marker))
    }
}
