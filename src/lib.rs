//! A deterministic UTXO-style constraint engine: the transaction
//! validation core of a distributed ledger.
//!
//! An [`atom::Atom`] — an ordered list of particle groups plus a
//! witness bundle — is lowered into a flat micro-instruction stream
//! ([`atom::to_micro_instructions`]), driven against an
//! [`store::EngineStore`] to evolve each particle's [`spin::Spin`], and
//! dispatched through a compiled [`machine::ConstraintMachine`] built
//! from the particle definitions and transition procedures a
//! [`scrypt::ScryptEnvironment`] registers. `validate` never mutates
//! the store; persisting an accepted atom is the caller's decision.

// === C1: spin state machine ===
pub mod spin;

// === Data model ===
pub mod particle;
pub mod rri;
pub mod witness;

// === Atoms and lowering ===
pub mod atom;

// === C2: engine store ===
pub mod store;

// === Transition tokens and procedures ===
pub mod transition;

// === C3: constraint machine ===
pub mod machine;

// === C4: constraint-scrypt builder environment ===
pub mod scrypt;

// === Invariants ===
pub mod invariants;

// === Errors ===
pub mod error;

pub use atom::{to_micro_instructions, Atom, MicroInstruction};
pub use error::{BuildError, CMError, CMErrorKind, DataPointer};
pub use machine::{ApplicationResult, Built, Building, ConstraintMachine, VOID_CLASS};
pub use particle::{ClassTag, Euid, Particle, ParticleDefinition, ParticleGroup, ParticlePayload, SpunParticle};
pub use rri::{Address, Rri};
pub use scrypt::ScryptEnvironment;
pub use spin::Spin;
pub use store::{AtomId, EngineStore, InMemoryEngineStore, StateTransformer, StoreError, VirtualizedStore};
pub use transition::{TransitionProcedure, TransitionToken, UsedData};
pub use witness::{PublicKey, Signature, WitnessBundle, WitnessData};
