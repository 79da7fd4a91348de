//! Run-scoped resource names.
//!
//! Every scenario needs two project names that do not collide with each
//! other. Names look like `ec2-runner-go-41203`: the prefix followed by a
//! five-digit number.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lowest number a name can carry.
pub const NAME_NUMBER_START: u32 = 10_000;

/// Width of the number range; `NAME_NUMBER_START + NAME_NUMBER_RANGE` is exclusive.
pub const NAME_NUMBER_RANGE: u32 = 90_000;

/// Offset applied to the second draw when it matches the first.
pub const COLLISION_OFFSET: u32 = 1_000;

/// The pair of names used by one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Passed to Terraform as `project_name`.
    pub primary: String,
    /// Passed to Terraform as `project_name_2`.
    pub secondary: String,
}

/// Name generator owning its random source.
///
/// Create one per process and pass it to each scenario.
#[derive(Debug)]
pub struct NameGenerator<R = StdRng> {
    rng: R,
}

impl NameGenerator<StdRng> {
    /// Seed from the wall clock mixed with the process id.
    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let pid = u64::from(std::process::id()).rotate_left(32);
        Self::seeded(nanos ^ pid)
    }

    /// Deterministic generator for a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> NameGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Draw two distinct names for `prefix`.
    pub fn generate(&mut self, prefix: &str) -> RunIdentity {
        let first = self.rng.gen_range(0..NAME_NUMBER_RANGE);
        let second = separate_draws(first, self.rng.gen_range(0..NAME_NUMBER_RANGE));

        RunIdentity {
            primary: format_name(prefix, first),
            secondary: format_name(prefix, second),
        }
    }
}

/// Shift `second` away from `first` when the two draws collide.
///
/// Both values are offsets into the number range.
pub fn separate_draws(first: u32, second: u32) -> u32 {
    if first == second {
        (second + COLLISION_OFFSET) % NAME_NUMBER_RANGE
    } else {
        second
    }
}

fn format_name(prefix: &str, draw: u32) -> String {
    format!(
        "{}-{}",
        prefix.trim_end_matches('-'),
        NAME_NUMBER_START + draw
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn number_of(name: &str) -> u32 {
        name.rsplit('-').next().unwrap().parse().unwrap()
    }

    #[test]
    fn test_generated_names_match_pattern() {
        let mut names = NameGenerator::seeded(7);
        for _ in 0..200 {
            let identity = names.generate("ec2-runner-go-");
            for name in [&identity.primary, &identity.secondary] {
                let digits = name.strip_prefix("ec2-runner-go-").expect("prefix");
                assert_eq!(digits.len(), 5, "{name}");
                assert!(digits.chars().all(|c| c.is_ascii_digit()), "{name}");
            }
            assert_ne!(identity.primary, identity.secondary);
        }
    }

    #[test]
    fn test_prefix_without_trailing_dash() {
        let identity = NameGenerator::seeded(1).generate("eks-runner-go");
        assert!(identity.primary.starts_with("eks-runner-go-"));
        assert!(!identity.primary.contains("--"));
    }

    #[test]
    fn test_same_seed_same_names() {
        let a = NameGenerator::seeded(99).generate("p");
        let b = NameGenerator::seeded(99).generate("p");
        assert_eq!(a, b);
    }

    #[test]
    fn test_colliding_draws_offset_second_name() {
        // A constant source yields the same draw twice.
        let mut names = NameGenerator::with_rng(StepRng::new(0, 0));
        let identity = names.generate("ec2-runner-go-");
        assert_eq!(identity.primary, "ec2-runner-go-10000");
        assert_eq!(identity.secondary, "ec2-runner-go-11000");
        assert_eq!(number_of(&identity.secondary) - number_of(&identity.primary), 1_000);
    }

    #[test]
    fn test_collision_offset_wraps() {
        assert_eq!(separate_draws(89_500, 89_500), 500);
        assert_eq!(separate_draws(31_203, 31_203), 32_203);
        assert_eq!(separate_draws(4, 5), 5);
    }
}
