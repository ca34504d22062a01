//! Two-phase signing: presignature generation, finish, and single-use

mod common;

use common::{run_finish, run_keygen, run_presign, run_sign, verify_signature};
use tss_sessions::{setup, Error, Registry};

#[test]
fn presign_then_finish_verifies_like_full_sign() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);
    let public_key = registry.keyshare_public_key(shares[0]).unwrap();
    let message = [42u8; 32];

    // phase one, before the message exists
    let presigns = run_presign(&registry, &[("p1", shares[0]), ("p2", shares[1])]);
    assert_eq!(presigns.len(), 2);

    let handles: Vec<(&str, tss_sessions::Handle)> = presigns
        .iter()
        .map(|(name, bytes)| {
            (
                name.as_str(),
                registry.presignature_from_bytes(bytes).unwrap(),
            )
        })
        .collect();

    // every party derived the same session id
    let session_id = registry.presignature_session_id(handles[0].1).unwrap();
    assert_eq!(
        registry.presignature_session_id(handles[1].1).unwrap(),
        session_id
    );

    let signatures = run_finish(&registry, &handles, &message);
    for signature in &signatures {
        assert!(verify_signature(&public_key, &message, signature));
    }

    // the two paths agree on the verifying key
    let full = run_sign(
        &registry,
        &[("p1", shares[0]), ("p2", shares[1])],
        &message,
        None,
    );
    assert!(full
        .iter()
        .all(|sig| verify_signature(&public_key, &message, sig)));
}

#[test]
fn presignature_bytes_round_trip() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 2);

    let presigns = run_presign(&registry, &[("p1", shares[0]), ("p2", shares[1])]);
    let handle = registry.presignature_from_bytes(&presigns[0].1).unwrap();

    let bytes = registry.presignature_to_bytes(handle).unwrap();
    assert_eq!(bytes, presigns[0].1);

    let restored = registry.presignature_from_bytes(&bytes).unwrap();
    assert_eq!(
        registry.presignature_session_id(restored).unwrap(),
        registry.presignature_session_id(handle).unwrap()
    );
}

#[test]
fn consumed_presignature_cannot_enter_a_second_session() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 2);
    let message = [5u8; 32];

    let presigns = run_presign(&registry, &[("p1", shares[0]), ("p2", shares[1])]);
    let handles: Vec<(&str, tss_sessions::Handle)> = presigns
        .iter()
        .map(|(name, bytes)| {
            (
                name.as_str(),
                registry.presignature_from_bytes(bytes).unwrap(),
            )
        })
        .collect();

    let signatures = run_finish(&registry, &handles, &message);
    assert_eq!(signatures.len(), 2);

    // the finish sessions consumed the presignatures
    let session_id = registry.presignature_session_id(handles[0].1).unwrap();
    let setup_msg = setup::finish_setup_msg(&session_id, &message, &["p1", "p2"]).unwrap();
    assert!(matches!(
        registry.sign_session_from_setup(&setup_msg, "p1", handles[0].1),
        Err(Error::HandleInUse)
    ));

    // freeing a consumed presignature is still legal
    registry.presignature_free(handles[0].1).unwrap();
    assert!(matches!(
        registry.presignature_free(handles[0].1),
        Err(Error::InvalidHandle)
    ));
}

#[test]
fn finish_setup_must_match_the_presignature_session() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 2);

    let presigns = run_presign(&registry, &[("p1", shares[0]), ("p2", shares[1])]);
    let handle = registry.presignature_from_bytes(&presigns[0].1).unwrap();

    let setup_msg = setup::finish_setup_msg(&[0u8; 32], &[5u8; 32], &["p1", "p2"]).unwrap();
    assert!(matches!(
        registry.sign_session_from_setup(&setup_msg, "p1", handle),
        Err(Error::SetupMessage(_))
    ));

    // the failed creation must not have burned the presignature
    let session_id = registry.presignature_session_id(handle).unwrap();
    let good = setup::finish_setup_msg(&session_id, &[5u8; 32], &["p1", "p2"]).unwrap();
    assert!(registry.sign_session_from_setup(&good, "p1", handle).is_ok());
}
