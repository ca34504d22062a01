//! Shared helpers for driving full protocol runs through the public API
#![allow(dead_code)]

use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::FromEncodedPoint,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use sha2::{Digest, Sha256};
use tss_sessions::{
    router::{run_protocol, RouterParty},
    setup, FinishResult, Handle, Registry,
};

/// `p1..pn`, matching the keyshare party-id order.
pub fn party_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("p{i}")).collect()
}

/// Runs a full keygen and returns each party's keyshare handle, indexed
/// so that `shares[i]` belongs to `p{i+1}`.
pub fn run_keygen(registry: &Registry, threshold: u8, n: usize) -> Vec<Handle> {
    let names = party_names(n);
    let ids: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let setup_msg = setup::keygen_setup_msg(threshold, None, &ids).unwrap();

    let parties: Vec<RouterParty> = ids
        .iter()
        .map(|id| {
            let session = registry.keygen_session_from_setup(&setup_msg, id).unwrap();
            RouterParty::new(*id, session)
        })
        .collect();

    let mut outcomes = run_protocol(registry, parties).unwrap();
    outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    outcomes
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Keyshare(h) => h,
            _ => panic!("keygen must finish into keyshares"),
        })
        .collect()
}

/// Signs `message` with the given (name, keyshare) pairs; returns every
/// signer's signature bytes.
pub fn run_sign(
    registry: &Registry,
    signers: &[(&str, Handle)],
    message: &[u8],
    chain_path: Option<&str>,
) -> Vec<Vec<u8>> {
    let key_id = registry.keyshare_key_id(signers[0].1).unwrap();
    let ids: Vec<&str> = signers.iter().map(|(n, _)| *n).collect();
    let setup_msg = setup::sign_setup_msg(&key_id, chain_path, Some(message), &ids).unwrap();

    let parties: Vec<RouterParty> = signers
        .iter()
        .map(|(name, share)| {
            let session = registry
                .sign_session_from_setup(&setup_msg, name, *share)
                .unwrap();
            RouterParty::new(*name, session)
        })
        .collect();

    run_protocol(registry, parties)
        .unwrap()
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Signature(sig) => sig,
            _ => panic!("signing must finish into signatures"),
        })
        .collect()
}

/// First signing phase only; returns each party's serialized presignature.
pub fn run_presign(registry: &Registry, signers: &[(&str, Handle)]) -> Vec<(String, Vec<u8>)> {
    let key_id = registry.keyshare_key_id(signers[0].1).unwrap();
    let ids: Vec<&str> = signers.iter().map(|(n, _)| *n).collect();
    let setup_msg = setup::sign_setup_msg(&key_id, None, None, &ids).unwrap();

    let parties: Vec<RouterParty> = signers
        .iter()
        .map(|(name, share)| {
            let session = registry
                .sign_session_from_setup(&setup_msg, name, *share)
                .unwrap();
            RouterParty::new(*name, session)
        })
        .collect();

    run_protocol(registry, parties)
        .unwrap()
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Presignature(bytes) => (o.name, bytes),
            _ => panic!("pre-signing must finish into presignatures"),
        })
        .collect()
}

/// Second signing phase over previously registered presignature handles.
pub fn run_finish(
    registry: &Registry,
    presigns: &[(&str, Handle)],
    message: &[u8],
) -> Vec<Vec<u8>> {
    let session_id = registry.presignature_session_id(presigns[0].1).unwrap();
    let ids: Vec<&str> = presigns.iter().map(|(n, _)| *n).collect();
    let setup_msg = setup::finish_setup_msg(&session_id, message, &ids).unwrap();

    let parties: Vec<RouterParty> = presigns
        .iter()
        .map(|(name, presig)| {
            let session = registry
                .sign_session_from_setup(&setup_msg, name, *presig)
                .unwrap();
            RouterParty::new(*name, session)
        })
        .collect();

    run_protocol(registry, parties)
        .unwrap()
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Signature(sig) => sig,
            _ => panic!("finish signing must produce signatures"),
        })
        .collect()
}

fn decode_point(bytes: &[u8]) -> ProjectivePoint {
    let encoded = k256::EncodedPoint::from_bytes(bytes).expect("valid SEC1 encoding");
    let affine: AffinePoint =
        Option::from(AffinePoint::from_encoded_point(&encoded)).expect("valid curve point");
    ProjectivePoint::from(affine)
}

fn reduce_scalar(bytes: &[u8]) -> Scalar {
    let array: [u8; 32] = bytes.try_into().expect("32-byte scalar");
    <Scalar as Reduce<U256>>::reduce_bytes(&array.into())
}

/// Schnorr verification, done consumer-side: s*G == R + e*P with
/// e = SHA-256(R || P || m).
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != 65 {
        return false;
    }
    let (r_bytes, s_bytes) = signature.split_at(33);
    let big_r = decode_point(r_bytes);
    let s = reduce_scalar(s_bytes);
    let public = decode_point(public_key);

    let mut hasher = Sha256::new();
    hasher.update(r_bytes);
    hasher.update(public_key);
    hasher.update(message);
    let e = reduce_scalar(&hasher.finalize());

    ProjectivePoint::GENERATOR * s == big_r + public * e
}
