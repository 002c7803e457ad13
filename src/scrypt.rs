//! C4 — the constraint-scrypt builder surface: the API application
//! scrypts program against to register particle definitions and
//! transition procedures before the machine is compiled and frozen.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::BuildError;
use crate::machine::{Building, ConstraintMachine, VOID_CLASS};
use crate::particle::{ClassTag, Euid, Particle, ParticleDefinition};
use crate::rri::Address;
use crate::transition::{TransitionProcedure, TransitionToken};
use crate::witness::{PublicKey, WitnessData};

type ShardMapper = Arc<dyn Fn(&Particle) -> BTreeSet<Euid> + Send + Sync>;
type StaticCheck = Arc<dyn Fn(&Particle) -> Result<(), String> + Send + Sync>;
type RriMapper = Arc<dyn Fn(&Particle) -> Option<crate::rri::Rri> + Send + Sync>;
type AddressValidator = Arc<dyn Fn(&Euid) -> Result<(), String> + Send + Sync>;

fn default_address_validator() -> AddressValidator {
    Arc::new(|_: &Euid| Ok(()))
}

/// Derives the fingerprint a `create_transition_from_rri` witness
/// validator checks against. Real key derivation from an address is a
/// cryptography concern this crate treats as opaque; addresses double
/// as their own fingerprint here.
fn address_public_key(address: &Address) -> PublicKey {
    PublicKey(address.0.as_bytes().to_vec())
}

/// The environment a constraint scrypt is handed during loading. Wraps
/// a still-`Building` machine; `build()` hands the accumulated
/// registrations off to C3 and is the only way out of this type.
pub struct ScryptEnvironment {
    machine: ConstraintMachine<Building>,
    address_validator: AddressValidator,
}

impl Default for ScryptEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ScryptEnvironment {
    pub fn new() -> Self {
        Self {
            machine: ConstraintMachine::new(),
            address_validator: default_address_validator(),
        }
    }

    /// As [`ScryptEnvironment::new`], but every particle's declared
    /// destinations are additionally checked against `validator` on
    /// every `register_particle*` call's static check, and eagerly at
    /// registration time for [`ScryptEnvironment::register_particle_with_addresses`].
    pub fn with_address_validator(validator: impl Fn(&Euid) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            machine: ConstraintMachine::new(),
            address_validator: Arc::new(validator),
        }
    }

    pub fn build(self) -> ConstraintMachine<crate::machine::Built> {
        self.machine.build()
    }

    /// Registers a particle class. Empty-destination particles are
    /// already rejected uniformly by the compiled machine before any
    /// static check runs; the given `static_check` is additionally
    /// wrapped to run the host's address validator over every declared
    /// destination, so a scrypt author never needs to remember that
    /// check themselves.
    pub fn register_particle(
        &mut self,
        class: ClassTag,
        shard_mapper: ShardMapper,
        static_check: StaticCheck,
    ) -> Result<(), BuildError> {
        self.register_particle_inner(class, shard_mapper, static_check, None, true)
    }

    /// As [`ScryptEnvironment::register_particle`], but for a class
    /// whose destinations are a fixed multi-address set supplied
    /// directly rather than computed per particle. `addresses` must be
    /// non-empty (`BuildError::EmptyDestinations`), and every address in
    /// it is run through the host's address validator once, at
    /// registration time, failing with `BuildError::InvalidAddress`
    /// rather than deferring the rejection to every future static
    /// check.
    pub fn register_particle_with_addresses(
        &mut self,
        class: ClassTag,
        addresses: BTreeSet<Euid>,
        static_check: StaticCheck,
    ) -> Result<(), BuildError> {
        if addresses.is_empty() {
            return Err(BuildError::EmptyDestinations);
        }
        for address in &addresses {
            (self.address_validator)(address).map_err(BuildError::InvalidAddress)?;
        }
        let shard_mapper: ShardMapper = Arc::new(move |_: &Particle| addresses.clone());
        self.register_particle_inner(class, shard_mapper, static_check, None, true)
    }

    /// As [`ScryptEnvironment::register_particle`], but the particle is
    /// additionally coupled to a resource identifier. If `rri_mapper`
    /// ever returns `None` for a live particle, dispatch rejects with
    /// `"rri cannot be null"` rather than silently treating the
    /// particle as RRI-less.
    pub fn register_particle_with_rri(
        &mut self,
        class: ClassTag,
        shard_mapper: ShardMapper,
        static_check: StaticCheck,
        rri_mapper: RriMapper,
    ) -> Result<(), BuildError> {
        self.register_particle_inner(class, shard_mapper, static_check, Some(rri_mapper), true)
    }

    fn register_particle_inner(
        &mut self,
        class: ClassTag,
        shard_mapper: ShardMapper,
        static_check: StaticCheck,
        rri_mapper: Option<RriMapper>,
        allows_transitions_from_outside_scrypts: bool,
    ) -> Result<(), BuildError> {
        let address_validator = self.address_validator.clone();
        let wrapped_check: StaticCheck = Arc::new(move |particle: &Particle| {
            for address in &particle.destinations {
                address_validator(address).map_err(|msg| format!("address validation failed: {msg}"))?;
            }
            static_check(particle)
        });

        let definition = ParticleDefinition::new(
            class,
            shard_mapper,
            wrapped_check,
            rri_mapper,
            allows_transitions_from_outside_scrypts,
        );
        self.machine.add_particle_definition(definition)
    }

    /// Registers the canonical one-shot procedure consuming an
    /// `RRIParticle` to produce `class`: a trivially true precondition,
    /// no used-data carry, and witness validators that require the
    /// signing key of the RRI's address on whichever side actually
    /// carries the RRI payload.
    pub fn create_transition_from_rri(&mut self, class: ClassTag) -> Result<(), BuildError> {
        let token = TransitionToken::void(ClassTag::new(crate::particle::RRI_PARTICLE_CLASS), class);
        let procedure = TransitionProcedure::one_shot(
            |input, witnesses: &dyn WitnessData| match input.payload_rri() {
                Some(rri) if witnesses.is_signed_by(&address_public_key(&rri.address)) => Ok(()),
                Some(_) => Err("missing signature for the RRI's address".to_string()),
                None => Err("input particle carries no RRI payload".to_string()),
            },
            |_output, _witnesses| Ok(()),
        );
        self.machine.add_procedure(token, procedure)
    }

    /// Registers a routine bridging three particle classes:
    /// `RRIParticle -> class_a` (the canonical one-shot mint) and
    /// `class_a -> class_b`, the latter gated by `combined_check` run
    /// over both particle instances. Used by scrypts that mint one
    /// resource class and immediately fold it into a second one within
    /// the same atom (e.g. an RRI claiming a derived token class).
    pub fn create_transition_from_rri_combined(
        &mut self,
        class_a: ClassTag,
        class_b: ClassTag,
        combined_check: impl Fn(&Particle, &Particle) -> Result<(), String> + Send + Sync + 'static,
    ) -> Result<(), BuildError> {
        let class_a_for_token = class_a.clone();
        self.execute_routine(move |env| {
            env.create_transition_from_rri(class_a.clone())?;
            let check = Arc::new(combined_check);
            let precondition_check = check.clone();
            let procedure = TransitionProcedure::new(
                move |input, _in_used, output, _out_used| match output {
                    Some(output) => precondition_check(input, output),
                    None => Err("combined transition requires a producing output".to_string()),
                },
                |_, _, _, _| None,
                |_, _, _, _| None,
                |_, _| Ok(()),
                |_, _| Ok(()),
            );
            env.create_transition(TransitionToken::void(class_a_for_token.clone(), class_b.clone()), procedure)
        })
    }

    /// Registers a custom procedure under `token`. The RRI-equality
    /// invariant applies uniformly to every dispatched token, including
    /// this one, so it is enforced centrally by the compiled machine
    /// rather than re-wrapped here — see DESIGN.md.
    pub fn create_transition(&mut self, token: TransitionToken, procedure: TransitionProcedure) -> Result<(), BuildError> {
        self.machine.add_procedure(token, procedure)
    }

    /// Registers a kernel-level, atom-wide predicate run once per atom
    /// before any per-particle checks. Kernel failures are batched
    /// rather than fail-fast.
    pub fn add_kernel_procedure(
        &mut self,
        name: &'static str,
        check: impl Fn(&crate::atom::Atom) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.machine.add_kernel_procedure(name, check);
    }

    /// Registers a pure, derived summary computed over an accepted atom
    /// and surfaced in the returned `ApplicationResult`.
    pub fn add_compute(
        &mut self,
        key: impl Into<String>,
        compute: impl Fn(&crate::atom::Atom) -> serde_json::Value + Send + Sync + 'static,
    ) {
        self.machine.add_compute(key, compute);
    }

    /// Runs a closure that calls back into `self` to register several
    /// definitions/procedures as one logical unit. A routine's
    /// registrations are not rolled back on failure: a scrypt author
    /// who needs atomicity across a routine should registeer the
    /// dependent calls up front and bail before calling
    /// `execute_routine` at all.
    pub fn execute_routine(
        &mut self,
        routine: impl FnOnce(&mut ScryptEnvironment) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        routine(self)
    }
}

/// A convenience token constructor mirroring `create_transition_from_rri`'s
/// registration key, for callers that need to look up or re-derive it
/// (e.g. tests asserting the canonical token shape).
pub fn rri_transition_token(class: ClassTag) -> TransitionToken {
    TransitionToken::void(ClassTag::new(crate::particle::RRI_PARTICLE_CLASS), class)
}

/// The sentinel output class a burn dispatches against; re-exported
/// here since scrypts registering burn procedures need it too.
pub fn void_class() -> ClassTag {
    ClassTag::new(VOID_CLASS)
}
