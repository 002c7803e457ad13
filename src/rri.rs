//! Radix Resource Identifier: `(address, name)`, where `name` is
//! restricted to the Base58 alphabet minus the visually-ambiguous
//! characters `0`, `O`, `I`, `l`.

use serde::{Deserialize, Serialize};

/// An opaque, content-addressed account/owner reference.
///
/// Real address encoding (bech32, curve points, …) is a `bleep-crypto`
/// concern and out of scope here; the constraint machine only needs
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(address, name)`, globally naming a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rri {
    pub address: Address,
    pub name: String,
}

impl Rri {
    /// Validates `name` against the Base58-minus-ambiguous alphabet and
    /// constructs the identifier. Definition-time rejection of malformed
    /// names keeps bad RRIs out of the registry entirely.
    pub fn new(address: Address, name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if !is_valid_rri_name(&name) {
            return Err(format!("invalid RRI name: {name:?}"));
        }
        Ok(Self { address, name })
    }
}

/// `[1-9A-Za-z]+`, non-empty, no `0`, `O`, `I`, or `l`.
fn is_valid_rri_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address(s.to_string())
    }

    #[test]
    fn valid_name_accepted() {
        assert!(Rri::new(addr("a1"), "XRD").is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        assert!(Rri::new(addr("a1"), "").is_err());
    }

    #[test]
    fn ambiguous_characters_rejected() {
        for bad in ["0ABC", "OABC", "IABC", "lABC"] {
            assert!(Rri::new(addr("a1"), bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn equality_is_by_address_and_name() {
        let a = Rri::new(addr("a1"), "XRD").unwrap();
        let b = Rri::new(addr("a1"), "XRD").unwrap();
        let c = Rri::new(addr("a2"), "XRD").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
