use rand::Rng;

/// Decide whether to keep an event with the given sampling ratio.
///
/// A ratio of 1 keeps every event, 0 keeps none, and `n` keeps roughly one in `n`.
pub fn should_sample(ratio: u64) -> bool {
    match ratio {
        0 => false,
        1 => true,
        n => rand::thread_rng().gen_range(0..n) == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_ratios() {
        for _ in 0..100 {
            assert!(should_sample(1));
            assert!(!should_sample(0));
        }
    }

    #[test]
    fn test_ratio_samples_some() {
        let kept = (0..10_000).filter(|_| should_sample(2)).count();
        assert!(kept > 4000 && kept < 6000, "kept {}", kept);
    }
}
