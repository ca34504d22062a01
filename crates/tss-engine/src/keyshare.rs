//! Long-lived secret-bearing objects produced by finished sessions.
//!
//! Key functionalities:
//! - Keyshare serialization to and from opaque byte buffers
//! - The distinct refresh-share format consumed by key refresh
//! - Non-interactive derivation of child public keys along a
//!   hierarchical path

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::proto::{decode_point, encode_point, scalar_from_bytes};
use crate::setup::KeyId;
use crate::{Error, Result};

const KEYSHARE_MAGIC: &[u8; 4] = b"TSK1";
const REFRESH_MAGIC: &[u8; 4] = b"TSR1";

pub(crate) mod scalar_serde {
    use k256::{
        elliptic_curve::{bigint::U256, ops::Reduce},
        Scalar,
    };
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes = scalar.to_bytes();
        serializer.serialize_bytes(bytes.as_slice())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid scalar length"))?;
        Ok(<Scalar as Reduce<U256>>::reduce_bytes(&array.into()))
    }
}

/// One party's share of a threshold key.
///
/// Holds the secret Shamir share at evaluation point `party_id + 1`,
/// together with the public material every participant agrees on.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Keyshare {
    /// This party's index in the generating party set
    pub(crate) party_id: u8,

    /// Threshold required to sign
    pub(crate) threshold: u8,

    /// Total number of parties the key is shared across
    pub(crate) participants: u8,

    /// Key identifier, equal on every party
    #[zeroize(skip)]
    pub(crate) key_id: KeyId,

    /// Secret Shamir share
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub(crate) secret_share: Scalar,

    /// Compressed public key
    #[zeroize(skip)]
    pub(crate) public_key: Vec<u8>,

    /// Per-party public shares, indexed by party id
    #[zeroize(skip)]
    pub(crate) public_shares: Vec<Vec<u8>>,

    /// Chain code for child-key derivation, when the key carries one
    pub(crate) chain_code: Option<[u8; 32]>,
}

impl Keyshare {
    pub fn party_id(&self) -> u8 {
        self.party_id
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn participants(&self) -> u8 {
        self.participants
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Compressed public key bytes.
    pub fn public_key(&self) -> Vec<u8> {
        self.public_key.clone()
    }

    pub fn chain_code(&self) -> Option<[u8; 32]> {
        self.chain_code
    }

    /// Serializes into an opaque buffer; `from_bytes` round-trips exactly.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let mut out = Vec::with_capacity(KEYSHARE_MAGIC.len() + body.len());
        out.extend_from_slice(KEYSHARE_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(KEYSHARE_MAGIC.as_slice())
            .ok_or_else(|| Error::Serialization("not a keyshare buffer".into()))?;
        let (share, _) =
            bincode::serde::decode_from_slice::<Self, _>(body, bincode::config::standard())?;
        Ok(share)
    }

    /// Serializes into the refresh-share format, the only form accepted as
    /// the "old keyshare" input of a refresh session besides a live
    /// keyshare. Distinct from `to_bytes` output.
    pub fn to_refresh_bytes(&self) -> Result<Vec<u8>> {
        self.to_refresh_share().to_bytes()
    }

    pub(crate) fn to_refresh_share(&self) -> RefreshShare {
        RefreshShare {
            party_id: self.party_id,
            threshold: self.threshold,
            participants: self.participants,
            key_id: self.key_id,
            secret_share: self.secret_share,
            public_key: self.public_key.clone(),
            public_shares: self.public_shares.clone(),
            chain_code: self.chain_code,
        }
    }

    /// Derives the child public key for a non-hardened path, e.g.
    /// `m/0/1/42`. Pure and deterministic: the same path always yields the
    /// same key. Hardened segments are rejected.
    pub fn derive_child_public_key(&self, path: &str) -> Result<Vec<u8>> {
        let derived = derive_path(&self.public_key, self.chain_code, path)?;
        Ok(derived.public_key)
    }

    pub(crate) fn public_share_point(&self, party_id: usize) -> Result<ProjectivePoint> {
        let raw = self
            .public_shares
            .get(party_id)
            .ok_or_else(|| Error::Keygen(format!("no public share for party {party_id}")))?;
        decode_point(raw)
    }

    pub(crate) fn secret_share(&self) -> Scalar {
        self.secret_share
    }
}

/// Keyshare re-encoded for the refresh protocol's "old share" input.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RefreshShare {
    pub(crate) party_id: u8,
    pub(crate) threshold: u8,
    pub(crate) participants: u8,
    #[zeroize(skip)]
    pub(crate) key_id: KeyId,
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub(crate) secret_share: Scalar,
    #[zeroize(skip)]
    pub(crate) public_key: Vec<u8>,
    #[zeroize(skip)]
    pub(crate) public_shares: Vec<Vec<u8>>,
    pub(crate) chain_code: Option<[u8; 32]>,
}

impl RefreshShare {
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let mut out = Vec::with_capacity(REFRESH_MAGIC.len() + body.len());
        out.extend_from_slice(REFRESH_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(REFRESH_MAGIC.as_slice())
            .ok_or_else(|| Error::Serialization("not a refresh-share buffer".into()))?;
        let (share, _) =
            bincode::serde::decode_from_slice::<Self, _>(body, bincode::config::standard())?;
        Ok(share)
    }
}

pub(crate) struct DerivedKey {
    /// Compressed child public key
    pub public_key: Vec<u8>,
    /// Sum of the per-step tweaks; child secret = parent secret + tweak
    pub tweak: Scalar,
}

/// Walks a non-hardened derivation path over public material only.
pub(crate) fn derive_path(
    public_key: &[u8],
    chain_code: Option<[u8; 32]>,
    path: &str,
) -> Result<DerivedKey> {
    use derivation_path::{ChildIndex, DerivationPath};
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let parsed: DerivationPath = path.parse().map_err(|_| Error::InvalidDerivationPath)?;
    let components: Vec<_> = parsed.into_iter().collect();

    let mut point = decode_point(public_key)?;
    let mut tweak = Scalar::ZERO;

    if components.is_empty() {
        return Ok(DerivedKey {
            public_key: encode_point(&point),
            tweak,
        });
    }

    let mut chain = chain_code.ok_or_else(|| Error::Derivation("keyshare has no chain code".into()))?;

    for child in components {
        let index = match child {
            ChildIndex::Normal(idx) => *idx,
            ChildIndex::Hardened(_) => {
                return Err(Error::Derivation(
                    "hardened derivation is not supported for threshold keys".into(),
                ));
            }
        };

        let mut hmac = Hmac::<Sha512>::new_from_slice(&chain)
            .map_err(|e| Error::Derivation(e.to_string()))?;
        hmac.update(&encode_point(&point));
        hmac.update(&index.to_be_bytes());
        let digest = hmac.finalize().into_bytes();

        let step = scalar_from_bytes(&digest[..32])?;
        chain.copy_from_slice(&digest[32..]);

        point += ProjectivePoint::GENERATOR * step;
        tweak += step;
    }

    Ok(DerivedKey {
        public_key: encode_point(&point),
        tweak,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;
    use rand::rngs::OsRng;

    fn sample_share() -> Keyshare {
        let secret = Scalar::random(&mut OsRng);
        let point = ProjectivePoint::GENERATOR * secret;
        Keyshare {
            party_id: 1,
            threshold: 2,
            participants: 3,
            key_id: [5u8; 32],
            secret_share: secret,
            public_key: encode_point(&point),
            public_shares: vec![encode_point(&point); 3],
            chain_code: Some([9u8; 32]),
        }
    }

    #[test]
    fn keyshare_bytes_round_trip() {
        let share = sample_share();
        let restored = Keyshare::from_bytes(&share.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.key_id(), share.key_id());
        assert_eq!(restored.public_key(), share.public_key());
        assert_eq!(restored.chain_code(), share.chain_code());
        assert_eq!(restored.secret_share(), share.secret_share());
        assert_eq!(restored.party_id(), share.party_id());
    }

    #[test]
    fn refresh_bytes_are_a_distinct_format() {
        let share = sample_share();
        let refresh = share.to_refresh_bytes().unwrap();
        assert!(Keyshare::from_bytes(&refresh).is_err());
        let restored = RefreshShare::from_bytes(&refresh).unwrap();
        assert_eq!(restored.key_id(), share.key_id());
    }

    #[test]
    fn derivation_is_deterministic_and_path_sensitive() {
        let share = sample_share();
        let a = share.derive_child_public_key("m/0/1").unwrap();
        let b = share.derive_child_public_key("m/0/1").unwrap();
        let c = share.derive_child_public_key("m/0/2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn derived_key_matches_tweaked_secret() {
        let share = sample_share();
        let derived = derive_path(&share.public_key, share.chain_code, "m/4/2").unwrap();
        let expected =
            ProjectivePoint::GENERATOR * (share.secret_share() + derived.tweak);
        assert_eq!(derived.public_key, encode_point(&expected));
    }

    #[test]
    fn root_path_returns_root_key() {
        let share = sample_share();
        assert_eq!(share.derive_child_public_key("m").unwrap(), share.public_key());
    }

    #[test]
    fn hardened_path_is_rejected() {
        let share = sample_share();
        assert!(matches!(
            share.derive_child_public_key("m/0'/1"),
            Err(Error::Derivation(_))
        ));
        assert!(matches!(
            share.derive_child_public_key("not a path"),
            Err(Error::InvalidDerivationPath)
        ));
    }
}
