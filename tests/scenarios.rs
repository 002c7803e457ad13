//! End-to-end validation scenarios exercising the full pipeline:
//! lowering, spin evolution against a store, and transition dispatch.

use std::collections::BTreeSet;
use std::sync::Arc;

use bleep_constraint_machine::{
    Address, Atom, CMErrorKind, ClassTag, EngineStore, Euid, InMemoryEngineStore, Particle, ParticleGroup,
    ParticlePayload, PublicKey, Rri, ScryptEnvironment, Signature, SpunParticle, TransitionProcedure, TransitionToken,
    WitnessBundle,
};

fn shard() -> BTreeSet<Euid> {
    BTreeSet::from([Euid(1)])
}

fn opaque_particle(tag: &str, content: u8) -> Particle {
    Particle::new(ClassTag::new(tag), shard(), ParticlePayload::Opaque(vec![content]))
}

fn register_basic_class(env: &mut ScryptEnvironment, tag: &str) {
    env.register_particle(
        ClassTag::new(tag),
        Arc::new(|_: &Particle| BTreeSet::from([Euid(1)])),
        Arc::new(|_: &Particle| Ok(())),
    )
    .unwrap();
}

/// Scenario 1 — a single UP with a registered definition is accepted,
/// and storing it advances the particle to UP.
#[test]
fn single_up_is_accepted_and_stored() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::up(p0.clone())]).unwrap()],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    machine.validate(&atom, &store).expect("single UP should be accepted");

    store
        .store_atom(bleep_constraint_machine::AtomId([1; 32]), &atom)
        .unwrap();
    assert_eq!(store.get_spin(&p0), bleep_constraint_machine::Spin::Up);
}

/// Scenario 2 — UP then DOWN of the *same* particle within one atom
/// succeeds when a burn procedure is registered under the `Void`
/// sentinel token and the witness bundle carries the required
/// signature. The leading UP is a free mint (no procedure needed); the
/// trailing DOWN has nothing left to pair with, so it dispatches
/// against the sentinel. This also exercises spin evolution correctly
/// tracking `p0`'s own most recent PUSH within this atom (UP, then
/// DOWN from that UP) rather than re-reading the pre-atom store state
/// for the second push.
#[test]
fn up_then_down_with_registered_transition_succeeds() {
    let address = Address("addr1".into());
    let signer = PublicKey(address.0.as_bytes().to_vec());

    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");

    let burn_token = TransitionToken::void(ClassTag::new("Widget"), ClassTag::new(bleep_constraint_machine::VOID_CLASS));
    let expected_signer = signer.clone();
    let procedure = TransitionProcedure::one_shot(
        move |_input, witnesses| {
            if witnesses.is_signed_by(&expected_signer) {
                Ok(())
            } else {
                Err("missing signature".to_string())
            }
        },
        |_output, _witnesses| Ok(()),
    );
    env.create_transition(burn_token, procedure).unwrap();
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![
            ParticleGroup::new(vec![SpunParticle::up(p0.clone())]).unwrap(),
            ParticleGroup::new(vec![SpunParticle::down(p0)]).unwrap(),
        ],
        WitnessBundle::new().with_signature(signer, Signature(vec![0xAB])),
    );

    let store = InMemoryEngineStore::new();
    machine.validate(&atom, &store).expect("signed mint/burn pair should succeed");
}

/// Scenario 3 — UP then UP on the same particle is a particle conflict
/// at the second group's push.
#[test]
fn up_then_up_is_particle_conflict() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![
            ParticleGroup::new(vec![SpunParticle::up(p0.clone())]).unwrap(),
            ParticleGroup::new(vec![SpunParticle::up(p0)]).unwrap(),
        ],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::ParticleConflict(bleep_constraint_machine::Spin::Up)));
    assert_eq!(err.data_pointer, Some(bleep_constraint_machine::DataPointer::new(1, 0)));
}

/// Scenario 4 — DOWN then DOWN on a never-seen particle fails before
/// the second push is even reached, since the first DOWN itself has no
/// UP to consume.
#[test]
fn down_then_down_fails_at_first_push() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![
            ParticleGroup::new(vec![SpunParticle::down(p0.clone())]).unwrap(),
            ParticleGroup::new(vec![SpunParticle::down(p0)]).unwrap(),
        ],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(
        err.kind,
        CMErrorKind::ParticleConflict(_) | CMErrorKind::SpinConflict { .. } | CMErrorKind::MissingDependency(_)
    ));
}

/// Scenario 5 — a DOWN with no prior UP and no virtualization is
/// rejected as a missing dependency.
#[test]
fn down_before_up_without_virtualization_is_missing_dependency() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::down(p0)]).unwrap()],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::MissingDependency(_)));
    assert_eq!(err.data_pointer, Some(bleep_constraint_machine::DataPointer::new(0, 0)));
}

/// Scenario 6 — UP and DOWN of the same particle within a single group
/// is an intra-group duplicate, rejected regardless of target spin.
#[test]
fn intra_group_duplicate_is_particle_conflict() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::up(p0.clone()), SpunParticle::down(p0)]).unwrap()],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::ParticleConflict(_)));
}

/// Scenario 7 — an RRI-coupled transition rejects when the input and
/// output particles name different resources. `output` carries an
/// opaque payload (not an RRI-shaped one) so it is coupled to a
/// resource only through its definition's `rri_mapper`, independent of
/// the store's RRI-zero-nonce virtualization rule (which only looks at
/// RRI-shaped *payloads*).
#[test]
fn rri_mismatch_is_rejected() {
    let rri_a = Rri::new(Address("addr-a".into()), "AAA").unwrap();
    let rri_b = Rri::new(Address("addr-b".into()), "BBB").unwrap();

    let mut env = ScryptEnvironment::new();
    env.register_particle_with_rri(
        ClassTag::new("RRIParticle"),
        Arc::new(|_: &Particle| BTreeSet::from([Euid(1)])),
        Arc::new(|_: &Particle| Ok(())),
        Arc::new(|p: &Particle| p.payload_rri().cloned()),
    )
    .unwrap();
    let rri_b_for_mapper = rri_b.clone();
    env.register_particle_with_rri(
        ClassTag::new("TokenDef"),
        Arc::new(|_: &Particle| BTreeSet::from([Euid(1)])),
        Arc::new(|_: &Particle| Ok(())),
        Arc::new(move |_: &Particle| Some(rri_b_for_mapper.clone())),
    )
    .unwrap();

    let token = TransitionToken::void(ClassTag::new("RRIParticle"), ClassTag::new("TokenDef"));
    env.create_transition(token, TransitionProcedure::one_shot(|_, _| Ok(()), |_, _| Ok(())))
        .unwrap();
    let machine = env.build();

    let input = Particle::rri(ClassTag::new("RRIParticle"), shard(), rri_a, 0);
    let output = Particle::new(ClassTag::new("TokenDef"), shard(), ParticlePayload::Opaque(vec![1]));
    let atom = Atom::new(
        vec![
            ParticleGroup::new(vec![SpunParticle::down(input)]).unwrap(),
            ParticleGroup::new(vec![SpunParticle::up(output)]).unwrap(),
        ],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::RriMismatch));
}

/// Scenario 8 — an unregistered particle class is rejected with
/// `UnknownParticle` rather than silently skipped.
#[test]
fn unregistered_class_is_unknown_particle() {
    let env = ScryptEnvironment::new();
    let machine = env.build();

    let p0 = opaque_particle("Ghost", 0);
    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::up(p0)]).unwrap()],
        WitnessBundle::new(),
    );

    let store = InMemoryEngineStore::new();
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::UnknownParticle(_)));
}

/// A standalone DOWN with no pairing UP ("burn") is rejected unless a
/// scrypt explicitly registers a procedure under the `Void` sentinel
/// token.
#[test]
fn standalone_down_without_burn_procedure_is_missing_procedure() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let store = InMemoryEngineStore::new();
    store
        .store_atom(
            bleep_constraint_machine::AtomId([9; 32]),
            &Atom::new(
                vec![ParticleGroup::new(vec![SpunParticle::up(p0.clone())]).unwrap()],
                WitnessBundle::new(),
            ),
        )
        .unwrap();

    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::down(p0)]).unwrap()],
        WitnessBundle::new(),
    );
    let err = machine.validate(&atom, &store).unwrap_err();
    assert!(matches!(err.kind, CMErrorKind::MissingProcedure(_)));
}

/// The same burn succeeds once a scrypt registers a procedure under
/// the `Void` sentinel output token.
#[test]
fn standalone_down_with_burn_procedure_succeeds() {
    let mut env = ScryptEnvironment::new();
    register_basic_class(&mut env, "Widget");
    let burn_token = TransitionToken::void(ClassTag::new("Widget"), ClassTag::new(bleep_constraint_machine::VOID_CLASS));
    env.create_transition(
        burn_token,
        TransitionProcedure::new(
            |_input, _in_used, output, _out_used| {
                if output.is_some() {
                    Err("burn procedure expects no output".to_string())
                } else {
                    Ok(())
                }
            },
            |_, _, _, _| None,
            |_, _, _, _| None,
            |_, _| Ok(()),
            |_, _| Ok(()),
        ),
    )
    .unwrap();
    let machine = env.build();

    let p0 = opaque_particle("Widget", 0);
    let store = InMemoryEngineStore::new();
    store
        .store_atom(
            bleep_constraint_machine::AtomId([9; 32]),
            &Atom::new(
                vec![ParticleGroup::new(vec![SpunParticle::up(p0.clone())]).unwrap()],
                WitnessBundle::new(),
            ),
        )
        .unwrap();

    let atom = Atom::new(
        vec![ParticleGroup::new(vec![SpunParticle::down(p0)]).unwrap()],
        WitnessBundle::new(),
    );
    machine.validate(&atom, &store).expect("registered burn should succeed");
}
