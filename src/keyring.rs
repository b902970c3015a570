use crate::SECP;
use bitcoin::{
    ecdsa, secp256k1::Message, sighash::EcdsaSighashType, Address, Network, NetworkKind,
    PrivateKey, PublicKey,
};
use std::fmt;

/// Custody seam. The engine asks for identities and signatures; where the
/// key material lives is the implementation's business.
pub trait Keyring: Send + Sync {
    fn public_key(&self) -> PublicKey;

    /// The local party's P2PKH address, used as funding source and default
    /// spend destination.
    fn address(&self) -> Address;

    /// ECDSA-signs a 32-byte legacy sighash digest with SIGHASH_ALL.
    fn sign(&self, sighash: [u8; 32]) -> anyhow::Result<ecdsa::Signature>;
}

/// Keyring holding a single WIF-encoded private key in memory.
#[derive(Clone)]
pub struct WifKeyring {
    private_key: PrivateKey,
    network: Network,
}

impl WifKeyring {
    pub fn from_wif(wif: &str, network: Network) -> anyhow::Result<Self> {
        let private_key = PrivateKey::from_wif(wif)?;
        anyhow::ensure!(
            private_key.network == NetworkKind::from(network),
            "key does not belong to {}",
            network
        );
        anyhow::ensure!(
            private_key.compressed,
            "uncompressed keys are not supported"
        );

        Ok(WifKeyring {
            private_key,
            network,
        })
    }

    /// Builds a keyring directly from 32 secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32], network: Network) -> anyhow::Result<Self> {
        let secret_key = bitcoin::secp256k1::SecretKey::from_slice(&bytes)?;

        Ok(WifKeyring {
            private_key: PrivateKey::new(secret_key, network),
            network,
        })
    }

    /// The key in WIF, for import into another wallet.
    pub fn wif(&self) -> String {
        self.private_key.to_wif()
    }
}

impl Keyring for WifKeyring {
    fn public_key(&self) -> PublicKey {
        self.private_key.public_key(&SECP)
    }

    fn address(&self) -> Address {
        Address::p2pkh(&self.public_key(), self.network)
    }

    fn sign(&self, sighash: [u8; 32]) -> anyhow::Result<ecdsa::Signature> {
        let message = Message::from_digest(sighash);

        Ok(ecdsa::Signature {
            signature: SECP.sign_ecdsa(&message, &self.private_key.inner),
            sighash_type: EcdsaSighashType::All,
        })
    }
}

impl fmt::Debug for WifKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifKeyring")
            .field("address", &self.address())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wif_round_trips() {
        let keyring = WifKeyring::from_secret_bytes([0x11; 32], Network::Testnet).unwrap();
        let restored = WifKeyring::from_wif(&keyring.wif(), Network::Testnet).unwrap();

        assert_eq!(keyring.public_key(), restored.public_key());
        assert_eq!(keyring.address(), restored.address());
    }

    #[test]
    fn rejects_wif_from_the_wrong_network() {
        let testnet = WifKeyring::from_secret_bytes([0x22; 32], Network::Testnet).unwrap();

        assert!(WifKeyring::from_wif(&testnet.wif(), Network::Bitcoin).is_err());
    }

    #[test]
    fn signatures_carry_sighash_all() {
        let keyring = WifKeyring::from_secret_bytes([0x33; 32], Network::Testnet).unwrap();
        let signature = keyring.sign([0xab; 32]).unwrap();

        assert_eq!(signature.sighash_type, EcdsaSighashType::All);
        assert_eq!(signature.to_vec().last(), Some(&0x01));
    }

    #[test]
    fn p2pkh_address_matches_network() {
        let keyring = WifKeyring::from_secret_bytes([0x44; 32], Network::Testnet).unwrap();

        // Testnet P2PKH addresses start with m or n.
        let address = keyring.address().to_string();
        assert!(address.starts_with('m') || address.starts_with('n'));
    }
}
