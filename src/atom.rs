//! Atoms and their lowering into the flat micro-instruction stream C3
//! drives against the engine store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CMError, CMErrorKind, DataPointer};
use crate::particle::{Particle, ParticleGroup};
use crate::spin::Spin;
use crate::witness::WitnessBundle;

/// The ledger's atomic state-change unit: an ordered list of particle
/// groups plus the signatures authorizing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    groups: Vec<ParticleGroup>,
    pub witnesses: WitnessBundle,
}

impl Atom {
    pub fn new(groups: Vec<ParticleGroup>, witnesses: WitnessBundle) -> Self {
        Self { groups, witnesses }
    }

    pub fn groups(&self) -> &[ParticleGroup] {
        &self.groups
    }
}

/// A flat micro-instruction, as produced by [`to_micro_instructions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicroInstruction {
    Push {
        particle: Particle,
        spin: Spin,
        pointer: DataPointer,
    },
    GroupEnd,
}

/// Walks `atom`'s particle groups in order, emitting a `Push` per spun
/// particle followed by a `GroupEnd` marker, while enforcing the two
/// atom-local invariants lowering is responsible for:
///
/// - the same particle cannot be pushed twice with the same target spin
///   ([`CMErrorKind::ParticleConflict`]);
/// - two immediately adjacent pushes (no intervening group boundary)
///   cannot name the same particle at all, since a particle cannot be
///   both input and output of its own micro-transition
///   ([`CMErrorKind::ParticleConflict`]);
/// - a particle's within-atom target-spin sequence must itself be a
///   valid spin progression, independent of the store
///   ([`CMErrorKind::SpinConflict`]).
///
/// Pure and deterministic: lowering never consults the engine store.
pub fn to_micro_instructions(atom: &Atom) -> Result<Vec<MicroInstruction>, CMError> {
    trace!(groups = atom.groups().len(), "lowering atom");
    let mut instructions = Vec::new();
    let mut last_spin: HashMap<Particle, Spin> = HashMap::new();

    for (group_index, group) in atom.groups().iter().enumerate() {
        let mut prev_in_group: Option<&Particle> = None;

        for (particle_index, spun) in group.particles().iter().enumerate() {
            let pointer = DataPointer::new(group_index, particle_index);

            if prev_in_group == Some(&spun.particle) {
                return Err(CMError::at(CMErrorKind::ParticleConflict(spun.spin), pointer));
            }

            if let Some(&previous_target) = last_spin.get(&spun.particle) {
                if previous_target == spun.spin {
                    return Err(CMError::at(CMErrorKind::ParticleConflict(spun.spin), pointer));
                }
                if previous_target.next() != Some(spun.spin) {
                    return Err(CMError::at(
                        CMErrorKind::SpinConflict {
                            current: previous_target,
                            requested: spun.spin,
                        },
                        pointer,
                    ));
                }
            }

            last_spin.insert(spun.particle.clone(), spun.spin);
            prev_in_group = Some(&spun.particle);

            instructions.push(MicroInstruction::Push {
                particle: spun.particle.clone(),
                spin: spun.spin,
                pointer,
            });
        }

        instructions.push(MicroInstruction::GroupEnd);
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::particle::{ClassTag, ParticlePayload};

    fn particle(tag: &str, content: u8) -> Particle {
        Particle::new(ClassTag::new(tag), BTreeSet::new(), ParticlePayload::Opaque(vec![content]))
    }

    fn group(spuns: Vec<(Spin, Particle)>) -> ParticleGroup {
        ParticleGroup::new(
            spuns
                .into_iter()
                .map(|(spin, particle)| crate::particle::SpunParticle { particle, spin })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn single_up_lowers_cleanly() {
        let p0 = particle("X", 0);
        let atom = Atom::new(vec![group(vec![(Spin::Up, p0)])], WitnessBundle::new());
        let instrs = to_micro_instructions(&atom).unwrap();
        assert_eq!(instrs.len(), 2);
        assert!(matches!(instrs[1], MicroInstruction::GroupEnd));
    }

    #[test]
    fn up_then_down_across_groups_is_accepted() {
        let p0 = particle("X", 0);
        let atom = Atom::new(
            vec![group(vec![(Spin::Up, p0.clone())]), group(vec![(Spin::Down, p0)])],
            WitnessBundle::new(),
        );
        assert!(to_micro_instructions(&atom).is_ok());
    }

    #[test]
    fn up_then_up_across_groups_is_particle_conflict() {
        let p0 = particle("X", 0);
        let atom = Atom::new(
            vec![group(vec![(Spin::Up, p0.clone())]), group(vec![(Spin::Up, p0)])],
            WitnessBundle::new(),
        );
        let err = to_micro_instructions(&atom).unwrap_err();
        assert!(matches!(err.kind, CMErrorKind::ParticleConflict(Spin::Up)));
        assert_eq!(err.data_pointer, Some(DataPointer::new(1, 0)));
    }

    #[test]
    fn down_then_down_is_particle_conflict() {
        let p0 = particle("X", 0);
        let atom = Atom::new(
            vec![group(vec![(Spin::Down, p0.clone())]), group(vec![(Spin::Down, p0)])],
            WitnessBundle::new(),
        );
        let err = to_micro_instructions(&atom).unwrap_err();
        assert!(matches!(err.kind, CMErrorKind::ParticleConflict(Spin::Down)));
    }

    #[test]
    fn intra_group_duplicate_is_particle_conflict() {
        let p0 = particle("X", 0);
        let atom = Atom::new(
            vec![group(vec![(Spin::Up, p0.clone()), (Spin::Down, p0)])],
            WitnessBundle::new(),
        );
        let err = to_micro_instructions(&atom).unwrap_err();
        assert!(matches!(err.kind, CMErrorKind::ParticleConflict(Spin::Down)));
        assert_eq!(err.data_pointer, Some(DataPointer::new(0, 1)));
    }

    #[test]
    fn down_then_up_is_spin_conflict() {
        let p0 = particle("X", 0);
        let atom = Atom::new(
            vec![group(vec![(Spin::Down, p0.clone())]), group(vec![(Spin::Up, p0)])],
            WitnessBundle::new(),
        );
        let err = to_micro_instructions(&atom).unwrap_err();
        assert!(matches!(err.kind, CMErrorKind::SpinConflict { .. }));
    }

    #[test]
    fn lowering_is_idempotent_under_relowering() {
        let p0 = particle("X", 0);
        let atom = Atom::new(vec![group(vec![(Spin::Up, p0)])], WitnessBundle::new());
        let first = to_micro_instructions(&atom).unwrap();
        let second = to_micro_instructions(&atom).unwrap();
        assert_eq!(first, second);
    }
}
