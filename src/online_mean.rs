//! Running mean used to rank bots.

use std::ops::AddAssign;

/// Numerically stable running mean.
///
/// With a rolling threshold `r`, the count is clamped to `r - 1` before each update once it
/// reaches `r`, so every new value weighs at least `1/r`. This biases the mean towards recent
/// values like a window of `r` values would, but it is an approximation: the oldest value is
/// never removed exactly.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OnlineMean {
    count: u64,
    mean: f64,
    roll_after: Option<u64>,
}

impl OnlineMean {
    /// An empty mean.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mean resuming from a previously saved count and value.
    pub fn with_state(count: u64, mean: f64) -> Self {
        Self {
            count,
            mean,
            roll_after: None,
        }
    }

    /// Enable the rolling behavior after `n` values. `0` disables it.
    #[must_use]
    pub fn with_roll_after(self, n: u64) -> Self {
        Self {
            roll_after: (n > 0).then_some(n),
            ..self
        }
    }

    /// Fold a value in and return the new mean.
    pub fn add(&mut self, x: f64) -> f64 {
        if self.count == 0 {
            self.mean = x;
            self.count = 1;
            return self.mean;
        }
        if let Some(r) = self.roll_after {
            if self.count >= r {
                self.count = r - 1;
            }
        }
        let n = self.count as f64;
        self.mean = self.mean * n / (n + 1.0) + x / (n + 1.0);
        self.count += 1;
        self.mean
    }

    /// Number of values the mean currently accounts for.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Current mean.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Current mean rounded down.
    pub fn floored_mean(&self) -> i64 {
        self.mean.floor() as i64
    }

    /// Current mean rounded to `places` decimals, ties to even.
    pub fn rounded_mean(&self, places: u32) -> f64 {
        let factor = 10f64.powi(places as i32);
        (self.mean * factor).round_ties_even() / factor
    }
}

impl AddAssign<f64> for OnlineMean {
    fn add_assign(&mut self, x: f64) {
        self.add(x);
    }
}

impl std::ops::Add<f64> for OnlineMean {
    type Output = OnlineMean;

    fn add(mut self, x: f64) -> OnlineMean {
        OnlineMean::add(&mut self, x);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTS_OF_NUMBERS: &[&[f64]] = &[
        &[0.0],
        &[0.0, 1.0],
        &[0.0, 1.0, 2.0],
        &[0.0, 0.0, 0.0],
        &[0.0, 0.0, 0.0, 1.0],
        &[-1.0, 1.0],
        &[1.5, 2.5],
    ];

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn add_matches_arithmetic_mean() {
        for nums in LISTS_OF_NUMBERS {
            let mut mean = OnlineMean::new();
            for &x in *nums {
                mean.add(x);
            }
            assert_close(mean.mean(), nums.iter().sum::<f64>() / nums.len() as f64);
            assert_eq!(mean.count(), nums.len() as u64);
        }
    }

    #[test]
    fn add_operator() {
        for nums in LISTS_OF_NUMBERS {
            let mean = nums.iter().fold(OnlineMean::new(), |acc, &x| acc + x);
            assert_close(mean.mean(), nums.iter().sum::<f64>() / nums.len() as f64);
        }
    }

    #[test]
    fn floored_mean() {
        for (nums, out) in [(&[0.0, 1.0], 0), (&[1.15, 1.33], 1), (&[1.75, 1.80], 1)] {
            let mut mean = OnlineMean::new();
            nums.iter().for_each(|&x| mean += x);
            assert_eq!(mean.floored_mean(), out);
        }
    }

    #[test]
    fn rounded_mean() {
        let cases: &[(&[f64], u32, f64)] = &[
            (&[0.0, 1.0], 0, 0.0),
            (&[0.0, 1.0], 2, 0.5),
            (&[1.0, 1.0], 0, 1.0),
            (&[1.0, 1.0], 2, 1.0),
            (&[1.0, 1.0, 2.0], 0, 1.0),
            (&[1.0, 1.0, 2.0], 2, 1.33),
            (&[1.0, 2.0, 2.0], 0, 2.0),
            (&[1.0, 2.0, 2.0], 2, 1.67),
        ];
        for &(nums, places, out) in cases {
            let mut mean = OnlineMean::new();
            nums.iter().for_each(|&x| mean += x);
            assert_eq!(mean.rounded_mean(places), out, "{nums:?} to {places} places");
        }
    }

    #[test]
    fn unbounded_sequence() {
        let mut mean = OnlineMean::new();
        let seen: Vec<f64> = [0.0, 100.0, 100.0, 100.0, 100.0, 100.0]
            .into_iter()
            .map(|x| mean.add(x))
            .collect();
        assert_eq!(mean.rounded_mean(2), 83.33);
        assert_close(seen[2], 200.0 / 3.0);
    }

    #[test]
    fn rolling_sequence() {
        let mut mean = OnlineMean::new().with_roll_after(2);
        let seen: Vec<f64> = [0.0, 100.0, 100.0, 100.0, 100.0, 100.0]
            .into_iter()
            .map(|x| mean.add(x))
            .collect();
        assert_eq!(seen, vec![0.0, 50.0, 75.0, 87.5, 93.75, 96.875]);
        assert_eq!(mean.rounded_mean(2), 96.88);
        assert_eq!(mean.count(), 2);
    }

    #[test]
    fn rolling_after_ten() {
        let mut mean = OnlineMean::new().with_roll_after(10);
        mean.add(0.0);
        (0..10).for_each(|_| mean += 100.0);
        assert_eq!(mean.rounded_mean(2), 91.0);
    }

    #[test]
    fn resumed_state_keeps_weight() {
        let mut mean = OnlineMean::with_state(3, 10.0);
        mean.add(30.0);
        assert_close(mean.mean(), 15.0);
        assert_eq!(mean.count(), 4);
    }

    #[test]
    fn resumed_state_above_threshold_is_clamped() {
        let mut mean = OnlineMean::with_state(50, 0.0).with_roll_after(4);
        mean.add(100.0);
        assert_close(mean.mean(), 25.0);
        assert_eq!(mean.count(), 4);
    }
}
