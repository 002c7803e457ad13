//! The witness oracle: the core never verifies a signature itself, it
//! only asks the bundle whether a given key signed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fingerprint of a signing key. Real key material and curve math live
/// in `bleep-crypto`; here it is an opaque, comparable byte string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// An opaque signature blob. The core never inspects its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// The signature set attached to an atom, keyed by signer public key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WitnessBundle(HashMap<PublicKey, Signature>);

impl WitnessBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(mut self, key: PublicKey, signature: Signature) -> Self {
        self.0.insert(key, signature);
        self
    }

    pub fn insert(&mut self, key: PublicKey, signature: Signature) {
        self.0.insert(key, signature);
    }
}

/// What a transition procedure's witness validator is handed: an O(1)
/// membership oracle over the atom's witness bundle. The core trusts
/// this oracle completely — it performs no cryptographic verification
/// of its own.
pub trait WitnessData {
    fn is_signed_by(&self, public_key: &PublicKey) -> bool;
}

impl WitnessData for WitnessBundle {
    fn is_signed_by(&self, public_key: &PublicKey) -> bool {
        self.0.contains_key(public_key)
    }
}
