use crate::{
    error::SwapError,
    secret::{Secret, SecretHash},
};
use bitcoin::{
    ecdsa,
    opcodes::all::{
        OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUAL, OP_EQUALVERIFY, OP_IF,
        OP_RIPEMD160, OP_SHA256,
    },
    script::{Builder, PushBytesBuf},
    Address, Network, PublicKey, ScriptBuf,
};

/// Parameters that uniquely identify one HTLC instance.
///
/// Two instances with equal fields compile to byte-identical redeem scripts
/// and therefore to the same P2SH address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptValues {
    secret_hash: SecretHash,
    owner: PublicKey,
    recipient: PublicKey,
    locktime: u32,
}

impl ScriptValues {
    /// `owner` reclaims via the timelock branch, `recipient` claims by
    /// revealing the preimage. Both keys must be compressed.
    pub fn new(
        secret_hash: SecretHash,
        owner: PublicKey,
        recipient: PublicKey,
        locktime: u32,
    ) -> Result<Self, SwapError> {
        for (role, key) in [("owner", &owner), ("recipient", &recipient)] {
            if !key.compressed {
                return Err(SwapError::InvariantViolated(format!(
                    "{} public key is not compressed",
                    role
                )));
            }
        }

        Ok(ScriptValues {
            secret_hash,
            owner,
            recipient,
            locktime,
        })
    }

    pub fn secret_hash(&self) -> &SecretHash {
        &self.secret_hash
    }

    pub fn owner(&self) -> &PublicKey {
        &self.owner
    }

    pub fn recipient(&self) -> &PublicKey {
        &self.recipient
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    /// Compiles the redeem script.
    ///
    /// The leading hash clause checks the pushed preimage slot. The pushed
    /// public key then selects the branch: the recipient's key leads to a
    /// plain CHECKSIG, anything else must satisfy the absolute timelock and
    /// a signature from the owner.
    pub fn redeem_script(&self) -> ScriptBuf {
        let builder = match self.secret_hash {
            SecretHash::Ripemd160(digest) => {
                Builder::new().push_opcode(OP_RIPEMD160).push_slice(digest)
            }
            SecretHash::Sha256(digest) => Builder::new().push_opcode(OP_SHA256).push_slice(digest),
        };

        builder
            .push_opcode(OP_EQUALVERIFY)
            .push_slice(self.recipient.inner.serialize())
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_slice(self.recipient.inner.serialize())
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_int(i64::from(self.locktime))
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_slice(self.owner.inner.serialize())
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script()
    }

    /// P2SH address wrapping the redeem script on the given network.
    pub fn compute_address(&self, network: Network) -> Result<Address, SwapError> {
        Address::p2sh(&self.redeem_script(), network)
            .map_err(|e| SwapError::InvariantViolated(format!("redeem script unwrappable: {}", e)))
    }

    /// Assembles the script-sig spending the HTLC: signature, the spender's
    /// public key, the preimage slot, then the serialized redeem script.
    pub(crate) fn unlock_script_sig(
        &self,
        signature: &ecdsa::Signature,
        spender: &PublicKey,
        preimage_slot: &[u8],
    ) -> Result<ScriptBuf, SwapError> {
        let signature = push_bytes(signature.to_vec())?;
        let preimage_slot = push_bytes(preimage_slot.to_vec())?;
        let redeem_script = push_bytes(self.redeem_script().into_bytes())?;

        Ok(Builder::new()
            .push_slice(signature)
            .push_slice(spender.inner.serialize())
            .push_slice(preimage_slot)
            .push_slice(redeem_script)
            .into_script())
    }

    /// Script-sig for the preimage-reveal path. The signature must be the
    /// recipient's.
    pub(crate) fn unlock_with_secret(
        &self,
        signature: &ecdsa::Signature,
        secret: &Secret,
    ) -> Result<ScriptBuf, SwapError> {
        self.unlock_script_sig(signature, &self.recipient, secret.as_bytes())
    }

    /// Script-sig for the timelock path. The signature must be the owner's
    /// and the spending transaction must carry `locktime` as its nLockTime.
    pub(crate) fn unlock_after_timeout(
        &self,
        signature: &ecdsa::Signature,
        filler: &[u8],
    ) -> Result<ScriptBuf, SwapError> {
        self.unlock_script_sig(signature, &self.owner, filler)
    }
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, SwapError> {
    PushBytesBuf::try_from(bytes)
        .map_err(|e| SwapError::InvariantViolated(format!("push exceeds script limits: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // Generator point and its small multiples, guaranteed on-curve.
    const OWNER: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const RECIPIENT: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    fn values(secret_hash: SecretHash, locktime: u32) -> ScriptValues {
        ScriptValues::new(
            secret_hash,
            PublicKey::from_str(OWNER).unwrap(),
            PublicKey::from_str(RECIPIENT).unwrap(),
            locktime,
        )
        .unwrap()
    }

    fn ripemd_values() -> ScriptValues {
        let digest = hex::decode("c0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ff").unwrap();
        values(
            SecretHash::from_hex(&hex::encode(digest)).unwrap(),
            1_700_000_000,
        )
    }

    #[test]
    fn ripemd160_redeem_script_bytes() {
        let script = ripemd_values().redeem_script();

        // a6 = OP_RIPEMD160, 88 = OP_EQUALVERIFY, 87 = OP_EQUAL, 63 = OP_IF,
        // ac = OP_CHECKSIG, 67 = OP_ELSE, b1 = OP_CLTV, 75 = OP_DROP,
        // 68 = OP_ENDIF; 1_700_000_000 = 0x6553f100, minimally encoded LE.
        let expected = format!(
            "a614c0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ff8821{r}8763\
             21{r}ac670400f15365b17521{o}ac68",
            r = RECIPIENT,
            o = OWNER,
        );

        assert_eq!(hex::encode(script.as_bytes()), expected);
    }

    #[test]
    fn sha256_redeem_script_selects_sha_opcode() {
        let digest = "51a488e06e9c69c555b8ad5e2c4629bb3135b96accd1f23451af75e06d3aee9c";
        let script = values(SecretHash::from_hex(digest).unwrap(), 900).redeem_script();

        let expected = format!(
            "a820{h}8821{r}876321{r}ac67028403b17521{o}ac68",
            h = digest,
            r = RECIPIENT,
            o = OWNER,
        );

        assert_eq!(hex::encode(script.as_bytes()), expected);
    }

    #[test]
    fn script_construction_is_deterministic() {
        let a = ripemd_values();
        let b = ripemd_values();

        assert_eq!(a.redeem_script(), b.redeem_script());
        assert_eq!(
            a.compute_address(Network::Testnet).unwrap(),
            b.compute_address(Network::Testnet).unwrap()
        );
    }

    #[test]
    fn testnet_address_wraps_the_script_hash() {
        use bitcoin::hashes::{hash160, Hash};

        let script = ripemd_values().redeem_script();
        let address = ripemd_values().compute_address(Network::Testnet).unwrap();

        assert!(address.to_string().starts_with('2'));

        // scriptPubKey must be OP_HASH160 <hash160(redeem script)> OP_EQUAL.
        let digest = hash160::Hash::hash(script.as_bytes());
        let mut expected = vec![0xa9, 0x14];
        expected.extend_from_slice(&digest.to_byte_array());
        expected.push(0x87);

        assert_eq!(address.script_pubkey().into_bytes(), expected);
    }

    #[test]
    fn different_locktimes_yield_different_addresses() {
        let digest = "51a488e06e9c69c555b8ad5e2c4629bb3135b96accd1f23451af75e06d3aee9c";
        let a = values(SecretHash::from_hex(digest).unwrap(), 900);
        let b = values(SecretHash::from_hex(digest).unwrap(), 901);

        assert_ne!(
            a.compute_address(Network::Testnet).unwrap(),
            b.compute_address(Network::Testnet).unwrap()
        );
    }

    #[test]
    fn rejects_uncompressed_keys() {
        let uncompressed = PublicKey::from_str(
            "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
             483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
        )
        .unwrap();
        let recipient = PublicKey::from_str(RECIPIENT).unwrap();

        let result = ScriptValues::new(
            SecretHash::from_hex(&"ab".repeat(20)).unwrap(),
            uncompressed,
            recipient,
            0,
        );

        assert!(matches!(result, Err(SwapError::InvariantViolated(_))));
    }
}
