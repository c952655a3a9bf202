use std::fmt;

use derive_more::Display;
use foldhash::HashMap;
use itertools::Itertools;

/// The result of processing some subset of a workload's batches.
///
/// Partial results form a commutative monoid: [`merge`][Self::merge] must be associative and
/// commutative, and [`identity`][Self::identity] must be its neutral element. This is what allows
/// every execution backend to combine partial results in whatever order they become available
/// and still arrive at the same final result.
pub trait PartialResult: Clone + fmt::Debug + PartialEq + Send + 'static {
    /// The result of processing no batches at all.
    #[must_use]
    fn identity() -> Self;

    /// Combines two partial results into one.
    #[must_use]
    fn merge(self, other: Self) -> Self;
}

/// Folds any number of partial results into one, starting from the identity.
#[must_use]
pub fn merge_all<R, I>(parts: I) -> R
where
    R: PartialResult,
    I: IntoIterator<Item = R>,
{
    parts.into_iter().fold(R::identity(), R::merge)
}

/// The number of primes found in some part of an integer range.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PrimeCount(u64);

impl PrimeCount {
    /// Wraps a raw count.
    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the raw count.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl PartialResult for PrimeCount {
    fn identity() -> Self {
        Self(0)
    }

    fn merge(self, other: Self) -> Self {
        Self(
            self.0
                .checked_add(other.0)
                .expect("prime counts are bounded by the size of a u64 range so they cannot overflow"),
        )
    }
}

/// Occurrence counts of vocabulary tokens in some part of a corpus.
///
/// Tokens that never occurred are absent rather than present with a zero count.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenCounts {
    counts: HashMap<String, u64>,
}

impl TokenCounts {
    /// Creates an empty set of counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more occurrence of `token`.
    pub fn record(&mut self, token: &str) {
        self.add(token, 1);
    }

    /// Records `count` more occurrences of `token`.
    pub fn add(&mut self, token: &str, count: u64) {
        if count == 0 {
            return;
        }

        if let Some(existing) = self.counts.get_mut(token) {
            *existing = existing
                .checked_add(count)
                .expect("token counts cannot realistically exceed u64");
        } else {
            self.counts.insert(token.to_owned(), count);
        }
    }

    /// Returns how many times `token` occurred, zero if it never did.
    #[must_use]
    pub fn get(&self, token: &str) -> u64 {
        self.counts.get(token).copied().unwrap_or_default()
    }

    /// The number of distinct tokens with a non-zero count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no token has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// The sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Iterates over the counts in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts
            .iter()
            .map(|(token, count)| (token.as_str(), *count))
    }

    /// Returns up to `n` tokens with the highest counts.
    ///
    /// Ties are broken by token text in ascending order, so the output is deterministic.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        self.iter()
            .sorted_by(|(a_token, a_count), (b_token, b_count)| {
                b_count.cmp(a_count).then_with(|| a_token.cmp(b_token))
            })
            .take(n)
            .collect()
    }
}

impl PartialResult for TokenCounts {
    fn identity() -> Self {
        Self::default()
    }

    fn merge(self, other: Self) -> Self {
        // Fold the smaller map into the larger one.
        let (mut into, from) = if self.counts.len() >= other.counts.len() {
            (self, other)
        } else {
            (other, self)
        };

        for (token, count) in from.counts {
            let existing = into.counts.entry(token).or_default();
            *existing = existing
                .checked_add(count)
                .expect("token counts cannot realistically exceed u64");
        }

        into
    }
}

impl<S: AsRef<str>> FromIterator<(S, u64)> for TokenCounts {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        let mut counts = Self::new();

        for (token, count) in iter {
            counts.add(token.as_ref(), count);
        }

        counts
    }
}
