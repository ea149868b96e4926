//! # Genome and Instance Identity
//!
//! This module defines the identity types the scheduler works with: the
//! [`Genome`] and [`Instance`] traits for the externally-owned candidate
//! configuration and problem input, the [`GenomeInstancePair`] unit of
//! evaluation work, and the keys used for queue and cache lookups.
//!
//! The scheduler never creates, mutates or validates genomes; it only
//! compares, hashes and clones them. Both traits are therefore pure
//! capability bounds plus, for genomes, an `age` accessor used for
//! priority computation.
//!
//! ## Value equality
//!
//! Genome equality and hashing must be defined over gene *values*: two
//! genomes with identical values are the same key for caching and ranking
//! purposes even if they differ in age or in the order their genes were
//! inserted. The `age` of a genome must not participate in `Eq` or `Hash`.
//!
//! ```rust
//! use std::hash::{Hash, Hasher};
//! use racetune::genome::Genome;
//!
//! #[derive(Clone, Debug)]
//! struct ParamSet {
//!     values: Vec<i64>,
//!     age: u64,
//! }
//!
//! impl PartialEq for ParamSet {
//!     fn eq(&self, other: &Self) -> bool {
//!         self.values == other.values
//!     }
//! }
//!
//! impl Eq for ParamSet {}
//!
//! impl Hash for ParamSet {
//!     fn hash<H: Hasher>(&self, state: &mut H) {
//!         self.values.hash(state);
//!     }
//! }
//!
//! impl Genome for ParamSet {
//!     fn age(&self) -> u64 {
//!         self.age
//!     }
//! }
//!
//! let young = ParamSet { values: vec![1, 2], age: 0 };
//! let old = ParamSet { values: vec![1, 2], age: 5 };
//! assert_eq!(young, old);
//! ```

use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;

/// A candidate parameter configuration, compared by value.
///
/// Genomes are owned by the optimization loop and read-only to the
/// scheduler. Implementations must define `Eq` and `Hash` over gene values
/// only; in particular [`Genome::age`] must not influence either.
pub trait Genome: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// The number of generations this genome has survived.
    ///
    /// Used by run-evaluators when computing queue priorities; excluded
    /// from equality and hashing.
    fn age(&self) -> u64;
}

/// A problem input the target algorithm can be evaluated against.
///
/// Implemented automatically for every type with the required
/// capabilities; equality is by value.
pub trait Instance: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Instance for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// The atomic unit of evaluation work: one genome paired with one
/// instance.
///
/// Immutable; used as map key and as message payload between the
/// coordinator and its workers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GenomeInstancePair<G, I> {
    /// The genome to evaluate.
    pub genome: G,
    /// The instance to evaluate it on.
    pub instance: I,
}

impl<G, I> GenomeInstancePair<G, I> {
    /// Creates a new evaluation pair.
    pub fn new(genome: G, instance: I) -> Self {
        Self { genome, instance }
    }
}

/// Identifier of one mini tournament within a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TournamentId(pub u64);

impl fmt::Display for TournamentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tournament-{}", self.0)
    }
}

/// Identifies a genome's participation in one tournament.
///
/// The same genome value can appear in the global priority queue once per
/// tournament it participates in, but never twice within one tournament.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GenomeTournamentKey<G> {
    /// The participating genome.
    pub genome: G,
    /// The tournament it participates in.
    pub tournament: TournamentId,
}

impl<G> GenomeTournamentKey<G> {
    /// Creates a new key for a genome's participation in a tournament.
    pub fn new(genome: G, tournament: TournamentId) -> Self {
        Self { genome, tournament }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::hash::Hasher;

    #[derive(Clone, Debug)]
    struct AgedGenome {
        values: Vec<i64>,
        age: u64,
    }

    impl PartialEq for AgedGenome {
        fn eq(&self, other: &Self) -> bool {
            self.values == other.values
        }
    }

    impl Eq for AgedGenome {}

    impl std::hash::Hash for AgedGenome {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.values.hash(state);
        }
    }

    impl Genome for AgedGenome {
        fn age(&self) -> u64 {
            self.age
        }
    }

    #[test]
    fn test_pairs_compare_by_value() {
        let a = GenomeInstancePair::new(
            AgedGenome {
                values: vec![4, 2],
                age: 0,
            },
            "instance-1",
        );
        let b = GenomeInstancePair::new(
            AgedGenome {
                values: vec![4, 2],
                age: 7,
            },
            "instance-1",
        );

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_key_distinguishes_tournaments() {
        let genome = AgedGenome {
            values: vec![1],
            age: 0,
        };
        let first = GenomeTournamentKey::new(genome.clone(), TournamentId(0));
        let second = GenomeTournamentKey::new(genome, TournamentId(1));

        assert_ne!(first, second);
        assert_eq!(format!("{}", second.tournament), "tournament-1");
    }
}
