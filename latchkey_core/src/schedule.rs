use rand::Rng;

/// Maps a seed's interest history onto an iteration budget ("energy"): the
/// number of mutated test cases derived from that seed in one scheduling
/// round. A simplified power schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSchedule {
    /// A fixed budget per round, regardless of history. Used for stateless
    /// targets where every request is independent.
    Constant(u32),
    /// `base + min(interesting_count, bonus_cap) + jitter(0..=jitter)`.
    /// Seeds that historically produced interesting behavior earn more
    /// exploration budget.
    Adaptive {
        base: u32,
        bonus_cap: u32,
        jitter: u32,
    },
}

impl PowerSchedule {
    /// The session target's historical schedule: base 5, bonus capped at 7,
    /// jitter 0..=3.
    pub fn adaptive_default() -> Self {
        PowerSchedule::Adaptive {
            base: 5,
            bonus_cap: 7,
            jitter: 3,
        }
    }

    /// Returns the energy for a seed with the given interesting-count.
    /// Always at least 1, whatever the configuration says.
    pub fn assign<R: Rng + ?Sized>(&self, interesting_count: u32, rng: &mut R) -> u32 {
        let energy = match *self {
            PowerSchedule::Constant(budget) => budget,
            PowerSchedule::Adaptive {
                base,
                bonus_cap,
                jitter,
            } => {
                let bonus = interesting_count.min(bonus_cap);
                let roll = if jitter == 0 {
                    0
                } else {
                    rng.random_range(0..=jitter)
                };
                base.saturating_add(bonus).saturating_add(roll)
            }
        };
        energy.max(1)
    }
}
