use std::time::Duration;

use rand::Rng;

use super::ReportError;

/// Jittered report interval: a whole number of seconds drawn uniformly
/// from `[min, max)` before every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    min_secs: u64,
    max_secs: u64,
}

impl ReportSchedule {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self, ReportError> {
        if max_secs <= min_secs {
            return Err(ReportError::InvalidInterval {
                min: min_secs,
                max: max_secs,
            });
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(self.min_secs..self.max_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_equal_bounds_are_refused() {
        assert!(matches!(
            ReportSchedule::new(60, 60),
            Err(ReportError::InvalidInterval { min: 60, max: 60 })
        ));
        assert!(ReportSchedule::new(61, 60).is_err());
    }

    #[test]
    fn test_delays_stay_in_half_open_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for (min, max) in [(0, 1), (1800, 3600), (59, 61), (10, 11)] {
            let schedule = ReportSchedule::new(min, max).unwrap();
            for _ in 0..500 {
                let delay = schedule.next_delay(&mut rng).as_secs();
                assert!(delay >= min && delay < max, "{} not in [{}, {})", delay, min, max);
            }
        }
    }

    #[test]
    fn test_narrow_range_is_constant() {
        let mut rng = StdRng::seed_from_u64(1);
        let schedule = ReportSchedule::new(10, 11).unwrap();
        assert_eq!(schedule.next_delay(&mut rng), Duration::from_secs(10));
    }
}
