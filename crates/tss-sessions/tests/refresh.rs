//! Key refresh scenarios

mod common;

use common::{run_keygen, run_sign, verify_signature};
use tss_sessions::{router::run_protocol, setup, Error, FinishResult, Handle, Registry, RouterParty};

fn run_refresh(registry: &Registry, old_shares: &[Handle]) -> Vec<Handle> {
    let key_id = registry.keyshare_key_id(old_shares[0]).unwrap();
    let ids = ["p1", "p2", "p3"];
    let setup_msg = setup::keygen_setup_msg(2, Some(&key_id), &ids).unwrap();

    // p1 refreshes from its live keyshare, the others from the
    // re-encoded refresh-share format
    let inputs: Vec<Handle> = old_shares
        .iter()
        .enumerate()
        .map(|(i, &share)| {
            if i == 0 {
                share
            } else {
                let bytes = registry.keyshare_to_refresh_bytes(share).unwrap();
                registry.refresh_share_from_bytes(&bytes).unwrap()
            }
        })
        .collect();

    let parties: Vec<RouterParty> = ids
        .iter()
        .zip(&inputs)
        .map(|(id, &input)| {
            let session = registry
                .key_refresh_session_from_setup(&setup_msg, id, input)
                .unwrap();
            RouterParty::new(*id, session)
        })
        .collect();

    let mut outcomes = run_protocol(registry, parties).unwrap();
    outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    outcomes
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Keyshare(h) => h,
            _ => panic!("refresh must finish into keyshares"),
        })
        .collect()
}

#[test]
fn refresh_preserves_key_material_but_rerandomizes_shares() {
    let registry = Registry::new();
    let old_shares = run_keygen(&registry, 2, 3);
    let public_key = registry.keyshare_public_key(old_shares[0]).unwrap();
    let key_id = registry.keyshare_key_id(old_shares[0]).unwrap();
    let chain_code = registry.keyshare_chain_code(old_shares[0]).unwrap();

    let new_shares = run_refresh(&registry, &old_shares);
    assert_eq!(new_shares.len(), 3);

    for (&old, &new) in old_shares.iter().zip(&new_shares) {
        assert_eq!(registry.keyshare_public_key(new).unwrap(), public_key);
        assert_eq!(registry.keyshare_key_id(new).unwrap(), key_id);
        assert_eq!(registry.keyshare_chain_code(new).unwrap(), chain_code);
        // the secret material must actually have moved
        assert_ne!(
            registry.keyshare_to_bytes(old).unwrap(),
            registry.keyshare_to_bytes(new).unwrap()
        );
    }

    let message = [3u8; 32];
    let signatures = run_sign(
        &registry,
        &[("p1", new_shares[0]), ("p3", new_shares[2])],
        &message,
        None,
    );
    assert!(signatures
        .iter()
        .all(|sig| verify_signature(&public_key, &message, sig)));
}

#[test]
fn old_and_new_shares_cannot_sign_together() {
    let registry = Registry::new();
    let old_shares = run_keygen(&registry, 2, 3);
    let new_shares = run_refresh(&registry, &old_shares);

    let key_id = registry.keyshare_key_id(old_shares[0]).unwrap();
    let setup_msg =
        setup::sign_setup_msg(&key_id, None, Some(&[8u8; 32]), &["p1", "p2"]).unwrap();

    let s1 = registry
        .sign_session_from_setup(&setup_msg, "p1", old_shares[0])
        .unwrap();
    let s2 = registry
        .sign_session_from_setup(&setup_msg, "p2", new_shares[1])
        .unwrap();

    let parties = vec![RouterParty::new("p1", s1), RouterParty::new("p2", s2)];
    // the cross-generation partial fails verification and is attributed
    let result = run_protocol(&registry, parties);
    assert!(matches!(result, Err(Error::Abort { .. })));
}

#[test]
fn refresh_share_bytes_round_trip() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);

    let bytes = registry.keyshare_to_refresh_bytes(shares[0]).unwrap();
    let handle = registry.refresh_share_from_bytes(&bytes).unwrap();
    assert_eq!(registry.refresh_share_to_bytes(handle).unwrap(), bytes);

    // the refresh format is not a keyshare buffer
    assert!(registry.keyshare_from_bytes(&bytes).is_err());
    // and carries a distinct registry type
    assert!(matches!(
        registry.keyshare_public_key(handle),
        Err(Error::InvalidHandleType)
    ));

    registry.keyshare_free(handle).unwrap();
}

#[test]
fn refresh_rejects_a_mismatched_setup() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);

    // wrong key id pinned in the setup
    let setup_msg = setup::keygen_setup_msg(2, Some(&[9u8; 32]), &["p1", "p2", "p3"]).unwrap();
    assert!(matches!(
        registry.key_refresh_session_from_setup(&setup_msg, "p1", shares[0]),
        Err(Error::SetupMessage(_))
    ));

    // wrong party count for the old quorum
    let key_id = registry.keyshare_key_id(shares[0]).unwrap();
    let smaller = setup::keygen_setup_msg(2, Some(&key_id), &["p1", "p2"]).unwrap();
    assert!(matches!(
        registry.key_refresh_session_from_setup(&smaller, "p1", shares[0]),
        Err(Error::SetupMessage(_))
    ));
}
