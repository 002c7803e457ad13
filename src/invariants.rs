//! The ledger's hard invariants, each exposed as one independently
//! checkable pure function rather than re-derived ad hoc
//! at each call site. `machine`, `atom`, and `store` already enforce
//! these inline where a [`crate::error::DataPointer`] is needed for
//! diagnostics; this module gives property tests (and anything else
//! that wants to assert an invariant in isolation) a single place to
//! ask "does this sequence/set satisfy the rule?" without replaying
//! the whole validation pipeline.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::particle::{ClassTag, Euid};
use crate::spin::Spin;
use crate::transition::TransitionToken;

/// A named invariant failing outside the context of one `validate`
/// call — used by property tests and build-time checks, not by
/// `validate` itself (which reports through [`crate::error::CMError`]
/// with a [`crate::error::DataPointer`] instead).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("spin sequence {0:?} is not a prefix of NEUTRAL, UP, DOWN")]
    SpinNotMonotonic(Vec<Spin>),
    #[error("particle's spin sequence visits UP or DOWN more than once: {0:?}")]
    SpinRepeated(Vec<Spin>),
    #[error("declared destinations {declared:?} do not match computed destinations {computed:?}")]
    DestinationMismatch {
        declared: BTreeSet<Euid>,
        computed: BTreeSet<Euid>,
    },
    #[error("particle declares no destinations")]
    EmptyDestinations,
    #[error("duplicate particle definition for class {0}")]
    DuplicateDefinition(ClassTag),
    #[error("duplicate transition procedure for token {0}")]
    DuplicateTransition(TransitionToken),
}

/// Invariant 1 + 2: the sequence of spins a single particle is observed
/// at, across every atom ever applied to it, must be a prefix of
/// `NEUTRAL, UP, DOWN` — equivalently, at most one UP and at most one
/// DOWN, and DOWN never precedes UP.
pub fn spin_history_is_monotonic(history: &[Spin]) -> Result<(), InvariantViolation> {
    const CANONICAL: [Spin; 3] = [Spin::Neutral, Spin::Up, Spin::Down];
    let is_prefix = history.len() <= CANONICAL.len() && history.iter().zip(CANONICAL.iter()).all(|(a, b)| a == b);
    if is_prefix {
        Ok(())
    } else {
        Err(InvariantViolation::SpinNotMonotonic(history.to_vec()))
    }
}

/// Invariant 3: within one atom, a particle may be pushed at most once
/// per target spin. `targets` is the sequence of target spins a single
/// particle was pushed with, in atom order (ignoring which group each
/// push fell in — that distinction is `atom::to_micro_instructions`'s
/// concern, not this invariant's).
pub fn no_repeated_target_spin(targets: &[Spin]) -> Result<(), InvariantViolation> {
    let mut seen_up = false;
    let mut seen_down = false;
    for target in targets {
        match target {
            Spin::Up if seen_up => return Err(InvariantViolation::SpinRepeated(targets.to_vec())),
            Spin::Down if seen_down => return Err(InvariantViolation::SpinRepeated(targets.to_vec())),
            Spin::Up => seen_up = true,
            Spin::Down => seen_down = true,
            Spin::Neutral => {}
        }
    }
    Ok(())
}

/// Invariant 4: a particle's declared destination set must be
/// non-empty and must equal what the class's shard mapper computes for
/// it.
pub fn destination_coverage_holds(
    declared: &BTreeSet<Euid>,
    computed: &BTreeSet<Euid>,
) -> Result<(), InvariantViolation> {
    if declared.is_empty() {
        return Err(InvariantViolation::EmptyDestinations);
    }
    if declared != computed {
        return Err(InvariantViolation::DestinationMismatch {
            declared: declared.clone(),
            computed: computed.clone(),
        });
    }
    Ok(())
}

/// Invariant 5: a class tag has at most one registered
/// `ParticleDefinition` across all loaded scrypts.
pub fn definition_uniqueness_holds(classes: &[ClassTag]) -> Result<(), InvariantViolation> {
    let mut seen = BTreeSet::new();
    for class in classes {
        if !seen.insert(class.clone()) {
            return Err(InvariantViolation::DuplicateDefinition(class.clone()));
        }
    }
    Ok(())
}

/// Invariant 6: a `TransitionToken` has at most one registered
/// procedure.
pub fn transition_uniqueness_holds(tokens: &[TransitionToken]) -> Result<(), InvariantViolation> {
    let mut seen = BTreeSet::new();
    for token in tokens {
        if !seen.insert(token.clone()) {
            return Err(InvariantViolation::DuplicateTransition(token.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_single_step_histories_are_monotonic() {
        assert!(spin_history_is_monotonic(&[]).is_ok());
        assert!(spin_history_is_monotonic(&[Spin::Neutral]).is_ok());
        assert!(spin_history_is_monotonic(&[Spin::Neutral, Spin::Up]).is_ok());
        assert!(spin_history_is_monotonic(&[Spin::Neutral, Spin::Up, Spin::Down]).is_ok());
    }

    #[test]
    fn out_of_order_history_is_rejected() {
        assert!(spin_history_is_monotonic(&[Spin::Up, Spin::Neutral]).is_err());
        assert!(spin_history_is_monotonic(&[Spin::Down, Spin::Up]).is_err());
    }

    #[test]
    fn repeated_up_within_targets_is_rejected() {
        assert!(no_repeated_target_spin(&[Spin::Up, Spin::Up]).is_err());
        assert!(no_repeated_target_spin(&[Spin::Up, Spin::Down]).is_ok());
    }

    #[test]
    fn destination_coverage_rejects_empty_and_mismatch() {
        let a = BTreeSet::from([Euid(1)]);
        let b = BTreeSet::from([Euid(2)]);
        assert!(destination_coverage_holds(&BTreeSet::new(), &a).is_err());
        assert!(destination_coverage_holds(&a, &b).is_err());
        assert!(destination_coverage_holds(&a, &a).is_ok());
    }

    #[test]
    fn definition_uniqueness_catches_duplicates() {
        let classes = vec![ClassTag::new("A"), ClassTag::new("B"), ClassTag::new("A")];
        assert!(definition_uniqueness_holds(&classes).is_err());
        assert!(definition_uniqueness_holds(&classes[..2]).is_ok());
    }

    #[test]
    fn transition_uniqueness_catches_duplicates() {
        let token = TransitionToken::void(ClassTag::new("A"), ClassTag::new("B"));
        let tokens = vec![token.clone(), token];
        assert!(transition_uniqueness_holds(&tokens).is_err());
    }
}
