use bitcoin::hashes::{ripemd160, sha256, Hash};
use std::{fmt, str::FromStr};

/// The preimage whose on-chain reveal unlocks the counterparty's leg.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Secret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Secret {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Secret(hex::decode(s)?))
    }
}

// Secrets travel through logs alongside txids; they don't belong there
// before reveal.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

/// Hash of the secret together with the algorithm that produced it.
///
/// The variant selects the hash opcode emitted into the redeem script.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SecretHash {
    Ripemd160([u8; 20]),
    Sha256([u8; 32]),
}

impl SecretHash {
    pub fn ripemd160(secret: &Secret) -> Self {
        SecretHash::Ripemd160(ripemd160::Hash::hash(secret.as_bytes()).to_byte_array())
    }

    pub fn sha256(secret: &Secret) -> Self {
        SecretHash::Sha256(sha256::Hash::hash(secret.as_bytes()).to_byte_array())
    }

    /// Parses a hex digest, inferring the algorithm from its length.
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        match bytes.len() {
            20 => {
                let mut digest = [0u8; 20];
                digest.copy_from_slice(&bytes);
                Ok(SecretHash::Ripemd160(digest))
            }
            32 => {
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&bytes);
                Ok(SecretHash::Sha256(digest))
            }
            n => anyhow::bail!("secret hash must be 20 or 32 bytes, got {}", n),
        }
    }

    pub fn matches(&self, secret: &Secret) -> bool {
        match self {
            SecretHash::Ripemd160(digest) => {
                ripemd160::Hash::hash(secret.as_bytes()).to_byte_array() == *digest
            }
            SecretHash::Sha256(digest) => {
                sha256::Hash::hash(secret.as_bytes()).to_byte_array() == *digest
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SecretHash::Ripemd160(digest) => digest,
            SecretHash::Sha256(digest) => digest,
        }
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecretHash::Ripemd160(_) => "Ripemd160",
            SecretHash::Sha256(_) => "Sha256",
        };
        write!(f, "SecretHash::{}({})", name, self)
    }
}

/// Stand-in pushed in the preimage slot of a refund script-sig.
///
/// A refund spends through the timelock branch, selected by the owner key
/// comparison; the filler is an arbitrary non-preimage value occupying the
/// slot the script pops. It is a distinct type so a refund can never be
/// confused with a withdraw carrying the real secret.
#[derive(Clone, PartialEq, Eq)]
pub struct RefundFiller(Vec<u8>);

impl RefundFiller {
    pub fn new(bytes: Vec<u8>) -> Self {
        RefundFiller(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for RefundFiller {
    fn default() -> Self {
        RefundFiller(vec![0u8; 32])
    }
}

impl fmt::Debug for RefundFiller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefundFiller({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_prefix() {
        let plain: Secret = "c0ffee".parse().unwrap();
        let prefixed: Secret = "0xc0ffee".parse().unwrap();

        assert_eq!(plain, prefixed);
        assert_eq!(plain.as_bytes(), &[0xc0, 0xff, 0xee]);
    }

    #[test]
    fn hash_length_selects_algorithm() {
        let ripemd = SecretHash::from_hex(&"ab".repeat(20)).unwrap();
        let sha = SecretHash::from_hex(&"ab".repeat(32)).unwrap();

        assert!(matches!(ripemd, SecretHash::Ripemd160(_)));
        assert!(matches!(sha, SecretHash::Sha256(_)));
        assert!(SecretHash::from_hex(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn secret_matches_its_own_hash() {
        let secret = Secret::new(b"such secret, much wow".to_vec());

        assert!(SecretHash::ripemd160(&secret).matches(&secret));
        assert!(SecretHash::sha256(&secret).matches(&secret));
        assert!(!SecretHash::sha256(&secret).matches(&Secret::new(b"not it".to_vec())));
    }
}
