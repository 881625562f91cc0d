//! Splitting policy shared by every box of a tree.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on the number of children of one box.
const MAX_CHILDREN: usize = 1 << 20;

/// Split-into factor: the same for every dimension or one per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitInto {
    /// Same factor in every dimension.
    Uniform(usize),
    /// One factor per dimension.
    PerDimension(Vec<usize>),
}

impl Default for SplitInto {
    fn default() -> Self {
        Self::Uniform(5)
    }
}

/// Configuration for box splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxController {
    /// Children per dimension when a box splits.
    pub split_into: SplitInto,
    /// A leaf splits once it holds more events than this.
    pub split_threshold: usize,
    /// Leaves at this depth never split.
    pub max_depth: usize,
    /// Every leaf is pre-split to at least this depth.
    pub min_depth: usize,
}

impl Default for BoxController {
    fn default() -> Self {
        Self {
            split_into: SplitInto::default(),
            split_threshold: 1000,
            max_depth: 20,
            min_depth: 0,
        }
    }
}

impl BoxController {
    /// Creates the default controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a uniform split-into factor.
    #[must_use]
    pub fn with_split_into(mut self, n: usize) -> Self {
        self.split_into = SplitInto::Uniform(n);
        self
    }

    /// Sets per-dimension split-into factors.
    #[must_use]
    pub fn with_split_into_per_dim(mut self, factors: Vec<usize>) -> Self {
        self.split_into = SplitInto::PerDimension(factors);
        self
    }

    /// Sets the split threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Sets the maximum recursion depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the minimum recursion depth.
    ///
    /// # Errors
    /// Returns an error if `depth` exceeds the maximum depth.
    pub fn try_with_min_depth(mut self, depth: usize) -> Result<Self> {
        if depth > self.max_depth {
            return Err(Error::RecursionDepth {
                min: depth,
                max: self.max_depth,
            });
        }
        self.min_depth = depth;
        Ok(self)
    }

    /// Reduces a uniform split factor whose `nd`-th power exceeds the child
    /// limit to the largest factor that fits. Per-dimension factors are left
    /// to [`Self::validate`].
    #[must_use]
    pub fn fitted_to(mut self, nd: usize) -> Self {
        if let SplitInto::Uniform(n) = self.split_into {
            let fit = max_uniform_factor(nd);
            if n > fit && fit >= 2 {
                warn!("split factor {n} gives more than {MAX_CHILDREN} children in {nd} dimensions, using {fit}");
                self.split_into = SplitInto::Uniform(fit);
            }
        }
        self
    }

    /// Split factor along dimension `dim`.
    #[must_use]
    pub fn split_into(&self, dim: usize) -> usize {
        match &self.split_into {
            SplitInto::Uniform(n) => *n,
            SplitInto::PerDimension(v) => v.get(dim).copied().unwrap_or(0),
        }
    }

    /// Split factors for an `nd`-dimensional tree.
    #[must_use]
    pub fn factors(&self, nd: usize) -> Vec<usize> {
        (0..nd).map(|d| self.split_into(d)).collect()
    }

    /// Number of children of a split box.
    #[must_use]
    pub fn children_count(&self, nd: usize) -> usize {
        (0..nd).map(|d| self.split_into(d)).product()
    }

    /// Checks the controller against a dimensionality.
    ///
    /// # Errors
    /// Returns an error for factors below 2, a zero threshold, a per-dimension
    /// list of the wrong length, too many children, or `min_depth > max_depth`.
    pub fn validate(&self, nd: usize) -> Result<()> {
        if let SplitInto::PerDimension(v) = &self.split_into {
            if v.len() != nd {
                return Err(Error::InvalidSplit(format!(
                    "{} split factors for {nd} dimensions",
                    v.len()
                )));
            }
        }
        if let Some(d) = (0..nd).find(|&d| self.split_into(d) < 2) {
            return Err(Error::InvalidSplit(format!(
                "split factor {} in dimension {d} must be at least 2",
                self.split_into(d)
            )));
        }
        if self.split_threshold == 0 {
            return Err(Error::InvalidSplit(
                "split threshold must be positive".to_string(),
            ));
        }
        let children = (0..nd).try_fold(1usize, |acc, d| acc.checked_mul(self.split_into(d)));
        match children {
            Some(n) if n <= MAX_CHILDREN => {}
            _ => {
                return Err(Error::InvalidSplit(format!(
                    "more than {MAX_CHILDREN} children per box"
                )))
            }
        }
        if self.min_depth > self.max_depth {
            return Err(Error::RecursionDepth {
                min: self.min_depth,
                max: self.max_depth,
            });
        }
        Ok(())
    }

    /// Returns true if a leaf at `depth` holding `count` events should split.
    #[inline]
    #[must_use]
    pub fn should_split(&self, count: usize, depth: usize) -> bool {
        count > self.split_threshold && depth < self.max_depth
    }
}

/// Largest `f` with `f^nd <= MAX_CHILDREN`.
fn max_uniform_factor(nd: usize) -> usize {
    let Ok(exp) = u32::try_from(nd) else {
        return 1;
    };
    if exp == 0 {
        return usize::MAX;
    }
    let fits = |f: usize| f.checked_pow(exp).is_some_and(|p| p <= MAX_CHILDREN);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let mut f = (MAX_CHILDREN as f64).powf(1.0 / f64::from(exp)).round() as usize;
    while f > 1 && !fits(f) {
        f -= 1;
    }
    while fits(f + 1) {
        f += 1;
    }
    f
}
