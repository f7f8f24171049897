use crate::payload::ProtocolState;

/// Infers the session target's protocol state from execution feedback.
///
/// The shipped implementation matches free-text device log lines; a target
/// with a structured state signal can supply its own implementation and the
/// rest of the engine is unaffected.
pub trait StateTracker: Send {
    /// The state the session is currently believed to be in.
    fn current(&self) -> ProtocolState;

    /// Folds one log excerpt into the tracked state and returns the
    /// (possibly unchanged) result.
    fn update(&mut self, log_excerpt: &str) -> ProtocolState;
}

/// Ordered marker rules: the first marker contained in a log line decides
/// the state. "Unlocked" must be checked before "Locked" so that an
/// "Unlocked" line is not claimed by the shorter marker.
const STATE_RULES: [(&str, ProtocolState); 5] = [
    ("Authenticated", ProtocolState::Authenticated),
    ("Unlocked", ProtocolState::Unlocked),
    ("Lock mechanism open", ProtocolState::Unlocked),
    ("Locked", ProtocolState::Locked),
    ("Lock mechanism closed", ProtocolState::Locked),
];

/// Log markers that announce the given state. Shared with the session oracle
/// so "expected end-state reached" and "state transition observed" agree on
/// what the device log means.
pub fn markers_for(state: ProtocolState) -> &'static [&'static str] {
    match state {
        ProtocolState::Authenticated => &["Authenticated"],
        ProtocolState::Unlocked => &["Unlocked", "Lock mechanism open"],
        ProtocolState::Locked => &["Locked", "Lock mechanism closed"],
    }
}

/// Best-effort state inference over the smart-lock log convention.
///
/// This is substring matching, not a verified state machine: if the target's
/// log wording changes the tracked state can drift. Matching is
/// case-sensitive, following the device's log casing.
#[derive(Debug, Clone)]
pub struct LockStateTracker {
    state: ProtocolState,
}

impl LockStateTracker {
    pub fn new(initial: ProtocolState) -> Self {
        LockStateTracker { state: initial }
    }
}

impl Default for LockStateTracker {
    fn default() -> Self {
        LockStateTracker::new(ProtocolState::Locked)
    }
}

impl StateTracker for LockStateTracker {
    fn current(&self) -> ProtocolState {
        self.state
    }

    fn update(&mut self, log_excerpt: &str) -> ProtocolState {
        for (marker, state) in STATE_RULES {
            if log_excerpt.contains(marker) {
                self.state = state;
                break;
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_locked_by_default() {
        let tracker = LockStateTracker::default();
        assert_eq!(tracker.current(), ProtocolState::Locked);
    }

    #[test]
    fn marker_rules_map_log_lines_to_states() {
        let mut tracker = LockStateTracker::default();
        assert_eq!(
            tracker.update("Device says: Authenticated"),
            ProtocolState::Authenticated
        );
        assert_eq!(
            tracker.update("Lock mechanism open"),
            ProtocolState::Unlocked
        );
        assert_eq!(
            tracker.update("Lock mechanism closed"),
            ProtocolState::Locked
        );
    }

    #[test]
    fn unlocked_line_is_not_claimed_by_locked_rule() {
        let mut tracker = LockStateTracker::default();
        assert_eq!(tracker.update("State now: Unlocked"), ProtocolState::Unlocked);
    }

    #[test]
    fn unmatched_line_leaves_state_unchanged() {
        let mut tracker = LockStateTracker::new(ProtocolState::Authenticated);
        assert_eq!(
            tracker.update("battery level at 87 percent"),
            ProtocolState::Authenticated
        );
        assert_eq!(tracker.current(), ProtocolState::Authenticated);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let mut tracker = LockStateTracker::default();
        // lower-case wording does not follow the device's log convention
        assert_eq!(tracker.update("lock mechanism open"), ProtocolState::Locked);
    }
}
