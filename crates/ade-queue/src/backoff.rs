/// Capped exponential backoff: `min(base * 2^max(attempt-1, 0), max)`,
/// matching `ade_worker/queue.py`'s `POWER(2, GREATEST(attempt_count-1,0))`
/// SQL expression exactly so retry timing is identical across a mixed
/// deployment.
pub fn capped_exponential(attempt: i32, base_seconds: i64, max_seconds: i64) -> i64 {
    let exponent = (attempt - 1).max(0) as u32;
    let doubled = base_seconds.saturating_mul(1i64 << exponent.min(62));
    doubled.min(max_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base() {
        assert_eq!(capped_exponential(1, 5, 300), 5);
    }

    #[test]
    fn doubles_each_attempt_until_capped() {
        assert_eq!(capped_exponential(2, 5, 300), 10);
        assert_eq!(capped_exponential(3, 5, 300), 20);
        assert_eq!(capped_exponential(7, 5, 300), 300);
    }

    #[test]
    fn never_exceeds_max() {
        for attempt in 1..40 {
            assert!(capped_exponential(attempt, 5, 300) <= 300);
        }
    }

    #[test]
    fn is_monotonically_nondecreasing_in_attempt() {
        let mut previous = capped_exponential(1, 5, 300);
        for attempt in 2..40 {
            let next = capped_exponential(attempt, 5, 300);
            assert!(next >= previous);
            previous = next;
        }
    }
}
