//! The data model: particles, spun particles, particle groups, and
//! particle definitions (the registry C4 compiles and C3 consults).

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rri::Rri;
use crate::spin::Spin;

/// Opaque 128-bit shard identifier. The core only ever compares these for
/// equality and set membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Euid(pub u128);

impl std::fmt::Display for Euid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The discriminant a [`Particle`] is registered and dispatched under.
///
/// Particle classes are opened by constraint scrypts at machine-build
/// time; there is no inheritance or runtime reflection (see DESIGN.md —
/// "subclass fallback" becomes an explicit registration-time fallback
/// chain, never implicit).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassTag(pub String);

impl ClassTag {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for ClassTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The built-in RRI-resource particle class, the only concrete payload
/// shape the core itself names (it backs `create_transition_from_rri`
/// and the RRI-zero-nonce virtualization rule in `store`). Every other
/// application particle class carries an opaque, content-addressed
/// byte payload the core never interprets.
pub const RRI_PARTICLE_CLASS: &str = "RRIParticle";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticlePayload {
    /// The canonical RRI-ownership particle: an RRI plus a strictly
    /// increasing nonce. `nonce == 0` means "never yet consumed",
    /// which is what the store's virtualization rule keys off of.
    Rri { rri: Rri, nonce: u64 },
    /// An application-defined payload, opaque to the core. Identity is
    /// by byte equality — callers are responsible for using a
    /// canonical encoding so that value equality matches intent.
    Opaque(Vec<u8>),
}

/// An immutable, content-addressed leaf of application state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Particle {
    pub class: ClassTag,
    pub destinations: BTreeSet<Euid>,
    pub payload: ParticlePayload,
}

impl Particle {
    pub fn new(class: ClassTag, destinations: BTreeSet<Euid>, payload: ParticlePayload) -> Self {
        Self {
            class,
            destinations,
            payload,
        }
    }

    pub fn rri(class: ClassTag, destinations: BTreeSet<Euid>, rri: Rri, nonce: u64) -> Self {
        Self::new(class, destinations, ParticlePayload::Rri { rri, nonce })
    }

    /// The RRI this particle names, if its payload is RRI-shaped.
    /// Distinct from [`ParticleDefinition::rri_mapper`], which lets a
    /// *non*-RRI-payload class (e.g. a fungible token) still declare an
    /// RRI it is coupled to.
    pub fn payload_rri(&self) -> Option<&Rri> {
        match &self.payload {
            ParticlePayload::Rri { rri, .. } => Some(rri),
            ParticlePayload::Opaque(_) => None,
        }
    }
}

/// `(particle, target-spin)`: asserts the particle's spin *after* this
/// instruction executes. `target` is always `Up` or `Down` — `Neutral`
/// is never pushed, it is only ever the unobserved starting state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpunParticle {
    pub particle: Particle,
    pub spin: Spin,
}

impl SpunParticle {
    pub fn up(particle: Particle) -> Self {
        Self {
            particle,
            spin: Spin::Up,
        }
    }

    pub fn down(particle: Particle) -> Self {
        Self {
            particle,
            spin: Spin::Down,
        }
    }
}

/// Non-empty, ordered sequence of spun particles. Cross-group ordering
/// matters for dispatch; intra-group ordering couples consecutive
/// instructions for the dispatch cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleGroup(Vec<SpunParticle>);

impl ParticleGroup {
    /// Returns `None` for an empty input — groups are non-empty by
    /// construction, never by runtime check deep in the pipeline.
    pub fn new(particles: Vec<SpunParticle>) -> Option<Self> {
        if particles.is_empty() {
            None
        } else {
            Some(Self(particles))
        }
    }

    pub fn particles(&self) -> &[SpunParticle] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

type ShardMapper = Arc<dyn Fn(&Particle) -> BTreeSet<Euid> + Send + Sync>;
type StaticCheck = Arc<dyn Fn(&Particle) -> Result<(), String> + Send + Sync>;
type RriMapper = Arc<dyn Fn(&Particle) -> Option<Rri> + Send + Sync>;

/// The registry entry a constraint scrypt creates for each particle
/// class it introduces, compiled into C3's lookup table.
#[derive(Clone)]
pub struct ParticleDefinition {
    pub class: ClassTag,
    shard_mapper: ShardMapper,
    static_check: StaticCheck,
    rri_mapper: Option<RriMapper>,
    pub allows_transitions_from_outside_scrypts: bool,
}

impl ParticleDefinition {
    pub fn new(
        class: ClassTag,
        shard_mapper: ShardMapper,
        static_check: StaticCheck,
        rri_mapper: Option<RriMapper>,
        allows_transitions_from_outside_scrypts: bool,
    ) -> Self {
        Self {
            class,
            shard_mapper,
            static_check,
            rri_mapper,
            allows_transitions_from_outside_scrypts,
        }
    }

    pub fn destinations_for(&self, particle: &Particle) -> BTreeSet<Euid> {
        (self.shard_mapper)(particle)
    }

    pub fn run_static_check(&self, particle: &Particle) -> Result<(), String> {
        (self.static_check)(particle)
    }

    pub fn rri_for(&self, particle: &Particle) -> Option<Rri> {
        self.rri_mapper.as_ref().and_then(|m| m(particle))
    }

    pub fn has_rri_mapper(&self) -> bool {
        self.rri_mapper.is_some()
    }
}

impl std::fmt::Debug for ParticleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleDefinition")
            .field("class", &self.class)
            .field("has_rri_mapper", &self.rri_mapper.is_some())
            .field(
                "allows_transitions_from_outside_scrypts",
                &self.allows_transitions_from_outside_scrypts,
            )
            .finish()
    }
}
