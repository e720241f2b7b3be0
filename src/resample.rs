use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::error::{CoxError, Result};

/// how each run carves train/test out of the cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// random 2/3 train - 1/3 test split
    #[default]
    Cv,
    /// N draws w/ replacement for train, out-of-bag patients for test
    Boot,
}

impl SamplingMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cv => "cv",
            Self::Boot => "boot",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SamplingMode {
    type Err = CoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cv" => Ok(Self::Cv),
            "boot" => Ok(Self::Boot),
            _ => Err(CoxError::UnsupportedSampling { name: s.to_string() }),
        }
    }
}

/// one run's partition, as row indices into the cohort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// may hold repeats in bootstrap mode
    pub train: Vec<usize>,
    /// ascending, never repeats
    pub test: Vec<usize>,
}

/// seeded train/test generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resampler {
    mode: SamplingMode,
}

impl Resampler {
    pub fn new(mode: SamplingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// partition `n_samples` patients for a run; the run index is the seed
    pub fn split(&self, n_samples: usize, run_index: u64) -> Split {
        let mut rng = StdRng::seed_from_u64(run_index);

        match self.mode {
            SamplingMode::Cv => {
                let n_test = n_samples.div_ceil(3);
                let mut in_test = vec![false; n_samples];
                for i in index::sample(&mut rng, n_samples, n_test) {
                    in_test[i] = true;
                }
                let (test, train): (Vec<usize>, Vec<usize>) = (0..n_samples).partition(|&i| in_test[i]);
                Split { train, test }
            }
            SamplingMode::Boot => {
                if n_samples == 0 {
                    return Split { train: Vec::new(), test: Vec::new() };
                }
                let train: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                let mut drawn = vec![false; n_samples];
                for &i in &train {
                    drawn[i] = true;
                }
                let test = (0..n_samples).filter(|&i| !drawn[i]).collect();
                Split { train, test }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mode_names() {
        assert_eq!("CV".parse::<SamplingMode>().unwrap(), SamplingMode::Cv);
        assert_eq!("boot".parse::<SamplingMode>().unwrap(), SamplingMode::Boot);
        assert_eq!(SamplingMode::Boot.to_string(), "boot");

        let err = "jackknife".parse::<SamplingMode>().unwrap_err();
        assert!(matches!(err, CoxError::UnsupportedSampling { .. }));
    }

    #[test]
    fn test_cv_split_is_disjoint_third() {
        let resampler = Resampler::new(SamplingMode::Cv);
        for n in [3, 10, 30, 31, 100] {
            for run in 1..=20 {
                let split = resampler.split(n, run);
                let train: HashSet<_> = split.train.iter().collect();
                let test: HashSet<_> = split.test.iter().collect();

                assert_eq!(split.test.len(), n.div_ceil(3));
                assert_eq!(split.train.len() + split.test.len(), n);
                assert!(train.is_disjoint(&test));
                assert_eq!(train.len(), split.train.len());
            }
        }
    }

    #[test]
    fn test_boot_split_is_out_of_bag() {
        let resampler = Resampler::new(SamplingMode::Boot);
        for run in 1..=20 {
            let split = resampler.split(40, run);
            let drawn: HashSet<_> = split.train.iter().copied().collect();

            assert_eq!(split.train.len(), 40);
            assert!(split.test.iter().all(|i| !drawn.contains(i)));
            assert_eq!(drawn.len() + split.test.len(), 40);
        }
    }

    #[test]
    fn test_boot_test_can_be_empty() {
        // a single patient is always drawn
        let split = Resampler::new(SamplingMode::Boot).split(1, 5);
        assert_eq!(split.train, vec![0]);
        assert!(split.test.is_empty());
    }

    #[test]
    fn test_split_is_deterministic_per_run() {
        for mode in [SamplingMode::Cv, SamplingMode::Boot] {
            let resampler = Resampler::new(mode);
            assert_eq!(resampler.split(50, 7), resampler.split(50, 7));
            assert_ne!(resampler.split(50, 7), resampler.split(50, 8));
        }
    }
}
