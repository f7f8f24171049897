use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::adapter::{Recovery, SessionTransport};

/// Default wait between tearing a broken session down and reconnecting.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1500);

/// Restores a usable session after a fatal transport error:
/// disconnect (best effort) -> backoff -> one reconnect attempt.
///
/// The reconnect is deliberately not retried within a scheduling round; if it
/// fails, the caller abandons the seed's remaining energy budget and the next
/// scheduler iteration starts with a fresh attempt.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    backoff: Duration,
}

impl RecoveryManager {
    pub fn new(backoff: Duration) -> Self {
        RecoveryManager { backoff }
    }

    pub fn run<T: SessionTransport + ?Sized>(&self, transport: &mut T, device: &str) -> Recovery {
        debug!("recovery: disconnecting broken session to {device}");
        if let Err(err) = transport.disconnect() {
            // Best-effort cleanup; the session is already considered dead.
            debug!("recovery: disconnect failed ({err}), continuing");
        }

        debug!("recovery: backing off for {:?}", self.backoff);
        if !self.backoff.is_zero() {
            thread::sleep(self.backoff);
        }

        match transport.connect(device) {
            Ok(()) => {
                info!("recovery: reconnected to {device}");
                Recovery::Reconnected
            }
            Err(err) => {
                warn!("recovery: reconnect to {device} failed: {err}");
                Recovery::GaveUp
            }
        }
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        RecoveryManager::new(DEFAULT_BACKOFF)
    }
}
