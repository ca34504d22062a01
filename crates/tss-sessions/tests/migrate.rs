//! Key migration scenarios

mod common;

use common::{run_sign, verify_signature};
use k256::{
    elliptic_curve::{sec1::ToEncodedPoint, Field},
    ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use tss_sessions::{router::run_protocol, setup, Error, FinishResult, Registry, RouterParty};

/// Splits a random private key into three additive coefficients and
/// migrates them into native keyshares.
fn migrate_fixture(registry: &Registry) -> (Vec<u8>, [u8; 32], Vec<tss_sessions::Handle>) {
    let secret = Scalar::random(&mut OsRng);
    let c1 = Scalar::random(&mut OsRng);
    let c2 = Scalar::random(&mut OsRng);
    let c3 = secret - c1 - c2;

    let public_key = (ProjectivePoint::GENERATOR * secret)
        .to_affine()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let chain = [7u8; 32];

    let ids = ["p1", "p2", "p3"];
    let setup_msg = setup::keygen_setup_msg(2, None, &ids).unwrap();

    let parties: Vec<RouterParty> = ids
        .iter()
        .zip([c1, c2, c3])
        .map(|(id, coefficient)| {
            let session = registry
                .key_migration_session_from_setup(
                    &setup_msg,
                    id,
                    &public_key,
                    Some(&chain),
                    &coefficient.to_bytes(),
                )
                .unwrap();
            RouterParty::new(*id, session)
        })
        .collect();

    let mut outcomes = run_protocol(registry, parties).unwrap();
    outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    let shares = outcomes
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Keyshare(h) => h,
            _ => panic!("migration must finish into keyshares"),
        })
        .collect();

    (public_key, chain, shares)
}

#[test]
fn migrated_shares_reproduce_the_external_key() {
    let registry = Registry::new();
    let (public_key, chain, shares) = migrate_fixture(&registry);
    assert_eq!(shares.len(), 3);

    for &share in &shares {
        assert_eq!(registry.keyshare_public_key(share).unwrap(), public_key);
        assert_eq!(registry.keyshare_chain_code(share).unwrap(), Some(chain));
    }

    // all parties agree on the derived key id
    let key_id = registry.keyshare_key_id(shares[0]).unwrap();
    for &share in &shares[1..] {
        assert_eq!(registry.keyshare_key_id(share).unwrap(), key_id);
    }

    let message = [4u8; 32];
    let signatures = run_sign(
        &registry,
        &[("p2", shares[1]), ("p3", shares[2])],
        &message,
        None,
    );
    assert!(signatures
        .iter()
        .all(|sig| verify_signature(&public_key, &message, sig)));
}

#[test]
fn migration_aborts_on_inconsistent_public_keys() {
    let registry = Registry::new();

    let secret = Scalar::random(&mut OsRng);
    let c1 = Scalar::random(&mut OsRng);
    let c2 = secret - c1;

    let honest_key = (ProjectivePoint::GENERATOR * secret)
        .to_affine()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();
    let other_key = (ProjectivePoint::GENERATOR * Scalar::random(&mut OsRng))
        .to_affine()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec();

    let setup_msg = setup::keygen_setup_msg(2, None, &["p1", "p2"]).unwrap();
    let s1 = registry
        .key_migration_session_from_setup(&setup_msg, "p1", &honest_key, None, &c1.to_bytes())
        .unwrap();
    let s2 = registry
        .key_migration_session_from_setup(&setup_msg, "p2", &other_key, None, &c2.to_bytes())
        .unwrap();

    let parties = vec![RouterParty::new("p1", s1), RouterParty::new("p2", s2)];
    assert!(matches!(
        run_protocol(&registry, parties),
        Err(Error::Abort { .. })
    ));
}

#[test]
fn migration_validates_its_inputs() {
    let registry = Registry::new();
    let setup_msg = setup::keygen_setup_msg(2, None, &["p1", "p2"]).unwrap();

    assert!(matches!(
        registry.key_migration_session_from_setup(&setup_msg, "p1", &[], None, &[1u8; 32]),
        Err(Error::NullInput)
    ));
    assert!(matches!(
        registry.key_migration_session_from_setup(&setup_msg, "p1", &[2u8; 33], None, &[1u8; 16]),
        Err(Error::InvalidBufferSize)
    ));
    assert!(matches!(
        registry.key_migration_session_from_setup(
            &setup_msg,
            "p1",
            &[2u8; 33],
            Some(&[1u8; 8]),
            &[1u8; 32]
        ),
        Err(Error::InvalidBufferSize)
    ));
}
