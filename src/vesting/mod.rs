//! Tranche unlock schedule.
//!
//! Six lock-up stages. Stage 0 unlocks `first_amount`, stages 1 to 4 each add
//! `graded_amount`, and reaching the final stage unlocks whatever is left.
//! Everything here is a pure function of the schedule and the caller's clock.

use serde::{Deserialize, Serialize};

use crate::primitives::{serde_amount, Amount, Timestamp};

pub const LOCKUP_STAGES: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 6 lock-up stages, got {0}")]
    StageCount(usize),
    #[error("lock-up stage {index} ({at}) does not follow the previous stage")]
    NotIncreasing { index: usize, at: Timestamp },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockupSchedule {
    ends: [Timestamp; LOCKUP_STAGES],
    #[serde(with = "serde_amount")]
    first_amount: Amount,
    #[serde(with = "serde_amount")]
    graded_amount: Amount,
}

impl LockupSchedule {
    pub fn new(
        ends: &[Timestamp],
        first_amount: Amount,
        graded_amount: Amount,
    ) -> Result<Self, ScheduleError> {
        let ends: [Timestamp; LOCKUP_STAGES] = ends
            .try_into()
            .map_err(|_| ScheduleError::StageCount(ends.len()))?;
        for index in 1..LOCKUP_STAGES {
            if ends[index] <= ends[index - 1] {
                return Err(ScheduleError::NotIncreasing {
                    index,
                    at: ends[index],
                });
            }
        }
        Ok(Self {
            ends,
            first_amount,
            graded_amount,
        })
    }

    pub fn stage_ends(&self) -> &[Timestamp; LOCKUP_STAGES] {
        &self.ends
    }

    /// Number of stages whose end time is at or before `now`.
    pub fn stages_reached(&self, now: Timestamp) -> usize {
        self.ends.iter().take_while(|end| **end <= now).count()
    }

    /// Cumulative allowance unlocked at `now`, before capping at a balance.
    /// `Amount::MAX` once the final stage is reached.
    pub fn unlocked_allowance(&self, now: Timestamp) -> Amount {
        match self.stages_reached(now) {
            0 => 0,
            LOCKUP_STAGES => Amount::MAX,
            reached => {
                let graded = self.graded_amount.saturating_mul(reached as Amount - 1);
                self.first_amount.saturating_add(graded)
            }
        }
    }

    /// Amount of a `credited` position that may leave the lock-up at `now`,
    /// given `released` has already been paid out.
    pub fn releasable(&self, now: Timestamp, credited: Amount, released: Amount) -> Amount {
        self.unlocked_allowance(now)
            .min(credited)
            .saturating_sub(released)
    }

    /// `(stage end, cumulative allowance)` per stage, for reporting.
    pub fn table(&self) -> Vec<(Timestamp, Amount)> {
        self.ends
            .iter()
            .map(|end| (*end, self.unlocked_allowance(*end)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::UNIT;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const WEEK: Timestamp = 7 * 24 * 3600;

    fn schedule() -> LockupSchedule {
        let close = 1_000_000;
        let ends: Vec<Timestamp> = (1..=6).map(|w| close + w * WEEK).collect();
        LockupSchedule::new(&ends, 4_000 * UNIT, 2_000 * UNIT).unwrap()
    }

    #[test]
    fn rejects_malformed_schedules() {
        assert_eq!(
            LockupSchedule::new(&[1, 2, 3], 1, 1).unwrap_err(),
            ScheduleError::StageCount(3)
        );
        assert_eq!(
            LockupSchedule::new(&[1, 2, 3, 3, 4, 5], 1, 1).unwrap_err(),
            ScheduleError::NotIncreasing { index: 3, at: 3 }
        );
    }

    #[test]
    fn nothing_unlocks_before_first_stage() {
        let s = schedule();
        let first = s.stage_ends()[0];
        assert_eq!(s.releasable(first - 1, 7_000 * UNIT, 0), 0);
        assert_eq!(s.releasable(first, 7_000 * UNIT, 0), 4_000 * UNIT);
    }

    #[test]
    fn stage_boundaries_are_inclusive() {
        let s = schedule();
        let ends = *s.stage_ends();
        assert_eq!(s.unlocked_allowance(ends[1] - 60), 4_000 * UNIT);
        assert_eq!(s.unlocked_allowance(ends[1]), 6_000 * UNIT);
        assert_eq!(s.unlocked_allowance(ends[4]), 12_000 * UNIT);
    }

    #[test]
    fn final_stage_releases_remainder() {
        let s = schedule();
        let last = s.stage_ends()[5];
        // 4 + 5 * 2 = 14 whole tokens of schedule, 15 credited
        assert_eq!(s.unlocked_allowance(last - 1), 12_000 * UNIT);
        assert_eq!(s.releasable(last, 15_000 * UNIT, 0), 15_000 * UNIT);
    }

    #[test]
    fn releasable_never_exceeds_credit() {
        let s = schedule();
        let ends = *s.stage_ends();
        assert_eq!(s.releasable(ends[0], 3_000 * UNIT, 0), 3_000 * UNIT);
        assert_eq!(s.releasable(ends[3], 3_000 * UNIT, 3_000 * UNIT), 0);
    }

    #[test]
    fn payout_is_independent_of_withdrawal_pattern() {
        let s = schedule();
        let ends = *s.stage_ends();
        let credited = 11_500 * UNIT;
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let mut released = 0;
            let mut last_visit = 0;
            for end in ends.iter() {
                if rng.gen_bool(0.5) {
                    let now = end + rng.gen_range(0..WEEK);
                    released += s.releasable(now, credited, released);
                    last_visit = now;
                    // a second call at the same instant pays nothing
                    assert_eq!(s.releasable(now, credited, released), 0);
                }
            }
            assert_eq!(released, s.unlocked_allowance(last_visit).min(credited));

            released += s.releasable(ends[5], credited, released);
            assert_eq!(released, credited);
        }
    }
}
