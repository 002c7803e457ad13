//! C2 — the engine store contract, its in-memory reference
//! implementation, and spin virtualization.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::atom::{to_micro_instructions, Atom, MicroInstruction};
use crate::particle::{Euid, Particle};
use crate::spin::Spin;

/// Caller-supplied identity for a stored atom. Minting and persisting
/// atom identities (e.g. from a content hash) is the caller's concern —
/// atom serialization is out of this crate's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomId(pub [u8; 32]);

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("atom id already present in the store")]
    DuplicateAtomId,
    #[error("delete_atom is not supported: the store is append-only")]
    UnsupportedOperation,
    #[error("atom could not be lowered: {0}")]
    InvalidAtom(String),
}

/// A mapping from particle identity to `(spin, containing atom)`, plus
/// the shard-membership predicate a caller uses to decide whether this
/// store instance serves a given atom at all.
pub trait EngineStore {
    /// Current spin for `particle`. `Spin::Neutral` if never seen.
    fn get_spin(&self, particle: &Particle) -> Spin;

    /// The atom that most recently drove `particle` to its current
    /// spin. `is_input` indicates whether the caller is resolving the
    /// consuming (`true`) or producing (`false`) side of a transition;
    /// both sides resolve to the same stored atom id in this
    /// implementation, since only one atom can ever be "most recent"
    /// for a given particle. Returns `None` if `particle` is at
    /// `Neutral` — behavior is otherwise implementation-defined for
    /// that case (the spec leaves it unspecified; see DESIGN.md).
    fn get_atom_containing(&self, particle: &Particle, is_input: bool) -> Option<AtomId>;

    /// Atomically applies every push in `atom` to the store, advancing
    /// each touched particle's spin by [`Spin::next`].
    fn store_atom(&self, atom_id: AtomId, atom: &Atom) -> Result<(), StoreError>;

    /// Whether this store instance serves the given shard set.
    fn supports(&self, destinations: &BTreeSet<Euid>) -> bool;

    /// Always unsupported: the core is append-only with respect to
    /// accepted atoms.
    fn delete_atom(&self, _atom_id: AtomId) -> Result<(), StoreError> {
        Err(StoreError::UnsupportedOperation)
    }
}

/// A conforming in-memory [`EngineStore`]. Exclusive-writer/many-reader:
/// `store_atom` takes the write lock; `get_spin` and
/// `get_atom_containing` only ever take the read lock.
#[derive(Default)]
pub struct InMemoryEngineStore {
    entries: RwLock<HashMap<Particle, (Spin, AtomId)>>,
    seen_atom_ids: RwLock<HashSet<AtomId>>,
    served_shards: Option<BTreeSet<Euid>>,
}

impl InMemoryEngineStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            seen_atom_ids: RwLock::new(HashSet::new()),
            served_shards: None,
        }
    }

    /// Restricts this store instance to a fixed shard set; `supports`
    /// otherwise accepts any destination set (a single-shard test
    /// harness has no reason to partition).
    pub fn serving(shards: BTreeSet<Euid>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            seen_atom_ids: RwLock::new(HashSet::new()),
            served_shards: Some(shards),
        }
    }
}

impl EngineStore for InMemoryEngineStore {
    fn get_spin(&self, particle: &Particle) -> Spin {
        self.entries
            .read()
            .get(particle)
            .map(|(spin, _)| *spin)
            .unwrap_or(Spin::Neutral)
    }

    fn get_atom_containing(&self, particle: &Particle, _is_input: bool) -> Option<AtomId> {
        self.entries.read().get(particle).map(|(_, atom_id)| *atom_id)
    }

    fn store_atom(&self, atom_id: AtomId, atom: &Atom) -> Result<(), StoreError> {
        debug!(groups = atom.groups().len(), "storing atom");
        let mut seen = self.seen_atom_ids.write();
        if seen.contains(&atom_id) {
            return Err(StoreError::DuplicateAtomId);
        }

        // Lowering is pure and was already run during validation; running it
        // again here keeps `store_atom` a free-standing entry point that
        // does not assume its caller re-threads the lowered form through.
        let instructions = to_micro_instructions(atom).map_err(|e| StoreError::InvalidAtom(e.to_string()))?;
        let mut entries = self.entries.write();
        for instruction in instructions {
            if let MicroInstruction::Push { particle, spin, .. } = instruction {
                trace!(?spin, "advancing particle spin");
                entries.insert(particle, (spin, atom_id));
            }
        }
        seen.insert(atom_id);
        Ok(())
    }

    fn supports(&self, destinations: &BTreeSet<Euid>) -> bool {
        match &self.served_shards {
            None => true,
            Some(served) => destinations.iter().any(|d| served.contains(d)),
        }
    }
}

/// A pure `(particle) -> Option<spin>` override consulted only when the
/// wrapped base store reports `Neutral` for that particle. Transformers
/// are composed as a stack; the machine builder guarantees the
/// RRI-zero-nonce transformer is registered last, i.e. innermost
/// (closest to the base store).
pub struct StateTransformer {
    name: &'static str,
    predicate: Box<dyn Fn(&Particle) -> bool + Send + Sync>,
    default_spin: Spin,
}

impl StateTransformer {
    pub fn new(
        name: &'static str,
        predicate: impl Fn(&Particle) -> bool + Send + Sync + 'static,
        default_spin: Spin,
    ) -> Self {
        Self {
            name,
            predicate: Box::new(predicate),
            default_spin,
        }
    }

    /// RRI particles at nonce zero were never consumed, so they are
    /// implicitly available: virtualize them to `Up`.
    pub fn rri_zero_nonce() -> Self {
        Self::new(
            "rri-zero-nonce",
            |particle| matches!(particle.payload_rri(), Some(_) if particle_rri_nonce_is_zero(particle)),
            Spin::Up,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `Some(default_spin)` if `particle` matches this transformer's
    /// predicate, `None` otherwise.
    pub fn evaluate(&self, particle: &Particle) -> Option<Spin> {
        if (self.predicate)(particle) {
            Some(self.default_spin)
        } else {
            None
        }
    }
}

fn particle_rri_nonce_is_zero(particle: &Particle) -> bool {
    matches!(
        &particle.payload,
        crate::particle::ParticlePayload::Rri { nonce, .. } if *nonce == 0
    )
}

/// Wraps a base [`EngineStore`] with a stack of [`StateTransformer`]s.
/// For any particle the base store reports `Neutral`, the first
/// matching transformer (innermost first) supplies the reported spin
/// instead. `store_atom`/`supports`/`delete_atom` pass straight through
/// to the base — virtualization only ever affects reads of unseen
/// particles.
pub struct VirtualizedStore<'a, S: EngineStore> {
    base: &'a S,
    /// Ordered innermost-first: `transformers[0]` is consulted before
    /// any other.
    transformers: Vec<StateTransformer>,
}

impl<'a, S: EngineStore> VirtualizedStore<'a, S> {
    /// `transformers` must already be innermost-first; use
    /// [`VirtualizedStore::with_rri_default`] for the common case.
    pub fn new(base: &'a S, transformers: Vec<StateTransformer>) -> Self {
        Self { base, transformers }
    }

    /// The standard composition: the RRI-zero-nonce transformer alone,
    /// which is both innermost and outermost when it is the only one.
    pub fn with_rri_default(base: &'a S) -> Self {
        Self::new(base, vec![StateTransformer::rri_zero_nonce()])
    }
}

impl<S: EngineStore> EngineStore for VirtualizedStore<'_, S> {
    fn get_spin(&self, particle: &Particle) -> Spin {
        let base_spin = self.base.get_spin(particle);
        if base_spin != Spin::Neutral {
            return base_spin;
        }
        for transformer in &self.transformers {
            if (transformer.predicate)(particle) {
                trace!(transformer = transformer.name, "spin virtualized");
                return transformer.default_spin;
            }
        }
        Spin::Neutral
    }

    fn get_atom_containing(&self, particle: &Particle, is_input: bool) -> Option<AtomId> {
        self.base.get_atom_containing(particle, is_input)
    }

    fn store_atom(&self, atom_id: AtomId, atom: &Atom) -> Result<(), StoreError> {
        self.base.store_atom(atom_id, atom)
    }

    fn supports(&self, destinations: &BTreeSet<Euid>) -> bool {
        self.base.supports(destinations)
    }

    fn delete_atom(&self, atom_id: AtomId) -> Result<(), StoreError> {
        self.base.delete_atom(atom_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::particle::ClassTag;
    use crate::rri::{Address, Rri};
    use crate::witness::WitnessBundle;

    fn rri_particle(nonce: u64) -> Particle {
        Particle::rri(
            ClassTag::new(crate::particle::RRI_PARTICLE_CLASS),
            BTreeSet::new(),
            Rri::new(Address("addr".into()), "XRD").unwrap(),
            nonce,
        )
    }

    #[test]
    fn unseen_particle_reports_neutral() {
        let store = InMemoryEngineStore::new();
        let p = rri_particle(5);
        assert_eq!(store.get_spin(&p), Spin::Neutral);
    }

    #[test]
    fn store_atom_advances_spin() {
        let store = InMemoryEngineStore::new();
        let p = rri_particle(5);
        let group =
            crate::particle::ParticleGroup::new(vec![crate::particle::SpunParticle::up(p.clone())]).unwrap();
        let atom = Atom::new(vec![group], WitnessBundle::new());
        store.store_atom(AtomId([1; 32]), &atom).unwrap();
        assert_eq!(store.get_spin(&p), Spin::Up);
        assert_eq!(store.get_atom_containing(&p, false), Some(AtomId([1; 32])));
    }

    #[test]
    fn reusing_an_atom_id_is_rejected() {
        let store = InMemoryEngineStore::new();
        let group = crate::particle::ParticleGroup::new(vec![crate::particle::SpunParticle::up(rri_particle(5))]).unwrap();
        let atom = Atom::new(vec![group], WitnessBundle::new());
        store.store_atom(AtomId([1; 32]), &atom).unwrap();

        let other_group =
            crate::particle::ParticleGroup::new(vec![crate::particle::SpunParticle::up(rri_particle(6))]).unwrap();
        let other_atom = Atom::new(vec![other_group], WitnessBundle::new());
        let err = store.store_atom(AtomId([1; 32]), &other_atom).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAtomId));
        // The first atom's effects are untouched by the rejected second call.
        assert_eq!(store.get_spin(&rri_particle(5)), Spin::Up);
        assert_eq!(store.get_spin(&rri_particle(6)), Spin::Neutral);
    }

    #[test]
    fn delete_atom_is_unsupported() {
        let store = InMemoryEngineStore::new();
        assert!(matches!(
            store.delete_atom(AtomId([0; 32])),
            Err(StoreError::UnsupportedOperation)
        ));
    }

    #[test]
    fn rri_zero_nonce_virtualizes_to_up() {
        let store = InMemoryEngineStore::new();
        let virtualized = VirtualizedStore::with_rri_default(&store);
        let never_consumed = rri_particle(0);
        assert_eq!(virtualized.get_spin(&never_consumed), Spin::Up);
    }

    #[test]
    fn rri_nonzero_nonce_is_not_virtualized() {
        let store = InMemoryEngineStore::new();
        let virtualized = VirtualizedStore::with_rri_default(&store);
        let already_used = rri_particle(3);
        assert_eq!(virtualized.get_spin(&already_used), Spin::Neutral);
    }

    #[test]
    fn virtualization_fixpoint_only_applies_to_unseen_particles() {
        let store = InMemoryEngineStore::new();
        let p = rri_particle(0);
        let group =
            crate::particle::ParticleGroup::new(vec![crate::particle::SpunParticle::up(p.clone())]).unwrap();
        let atom = Atom::new(vec![group], WitnessBundle::new());
        store.store_atom(AtomId([2; 32]), &atom).unwrap();
        let virtualized = VirtualizedStore::with_rri_default(&store);
        // Once actually stored, the real spin wins over the virtual default.
        assert_eq!(virtualized.get_spin(&p), Spin::Up);
    }
}
