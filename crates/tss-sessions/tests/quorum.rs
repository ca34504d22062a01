//! Quorum change scenarios

mod common;

use common::{run_keygen, run_sign, verify_signature};
use tss_sessions::{router::run_protocol, Error, FinishResult, Handle, Registry, RouterParty};

/// Old quorum {p1,p2} (T=2) hands the key to {p2,p3,p4}; p1 departs,
/// p3 and p4 join with no secret input.
#[test]
fn quorum_change_preserves_the_public_key() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);
    let public_key = registry.keyshare_public_key(shares[0]).unwrap();
    let key_id = registry.keyshare_key_id(shares[0]).unwrap();
    let chain_code = registry.keyshare_chain_code(shares[0]).unwrap();

    let ids = ["p1", "p2", "p3", "p4"];
    let setup_msg = registry
        .qc_setup_msg_new(shares[0], 2, &ids, &[0, 1], &[1, 2, 3])
        .unwrap();

    let sessions = [
        ("p1", shares[0]),
        ("p2", shares[1]),
        ("p3", Handle::NULL),
        ("p4", Handle::NULL),
    ]
    .map(|(name, share)| {
        let session = registry.qc_session_from_setup(&setup_msg, name, share).unwrap();
        RouterParty::new(name, session)
    });

    let outcomes = run_protocol(&registry, sessions.into_iter().collect()).unwrap();
    assert_eq!(outcomes.len(), 4);

    let mut new_shares: Vec<(String, Handle)> = Vec::new();
    for outcome in outcomes {
        let FinishResult::Keyshare(handle) = outcome.result else {
            panic!("quorum change must finish into keyshares");
        };
        if outcome.name == "p1" {
            // the departing party receives nothing
            assert!(handle.is_null());
        } else {
            assert!(!handle.is_null());
            new_shares.push((outcome.name, handle));
        }
    }
    assert_eq!(new_shares.len(), 3);

    for (_, share) in &new_shares {
        assert_eq!(registry.keyshare_public_key(*share).unwrap(), public_key);
        assert_eq!(registry.keyshare_key_id(*share).unwrap(), key_id);
        assert_eq!(registry.keyshare_chain_code(*share).unwrap(), chain_code);
    }

    // the reshared key still signs, verified against the original key
    new_shares.sort_by(|a, b| a.0.cmp(&b.0));
    let message = [1u8; 32];
    let signatures = run_sign(
        &registry,
        &[
            (new_shares[1].0.as_str(), new_shares[1].1),
            (new_shares[2].0.as_str(), new_shares[2].1),
        ],
        &message,
        None,
    );
    assert!(signatures
        .iter()
        .all(|sig| verify_signature(&public_key, &message, sig)));
}

#[test]
fn quorum_change_can_raise_the_threshold() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);
    let public_key = registry.keyshare_public_key(shares[0]).unwrap();

    let ids = ["p1", "p2", "p3", "p4"];
    let setup_msg = registry
        .qc_setup_msg_new(shares[0], 3, &ids, &[0, 1], &[0, 1, 2, 3])
        .unwrap();

    let sessions = [
        ("p1", shares[0]),
        ("p2", shares[1]),
        ("p3", Handle::NULL),
        ("p4", Handle::NULL),
    ]
    .map(|(name, share)| {
        let session = registry.qc_session_from_setup(&setup_msg, name, share).unwrap();
        RouterParty::new(name, session)
    });

    let outcomes = run_protocol(&registry, sessions.into_iter().collect()).unwrap();

    let mut new_shares: Vec<(String, Handle)> = outcomes
        .into_iter()
        .map(|o| match o.result {
            FinishResult::Keyshare(h) => (o.name, h),
            _ => panic!("quorum change must finish into keyshares"),
        })
        .collect();
    new_shares.sort_by(|a, b| a.0.cmp(&b.0));
    assert!(new_shares.iter().all(|(_, h)| !h.is_null()));

    // now three signers are needed
    let message = [2u8; 32];
    let signatures = run_sign(
        &registry,
        &[
            (new_shares[0].0.as_str(), new_shares[0].1),
            (new_shares[2].0.as_str(), new_shares[2].1),
            (new_shares[3].0.as_str(), new_shares[3].1),
        ],
        &message,
        None,
    );
    assert!(signatures
        .iter()
        .all(|sig| verify_signature(&public_key, &message, sig)));
}

#[test]
fn joining_party_must_not_carry_a_keyshare() {
    let registry = Registry::new();
    let shares = run_keygen(&registry, 2, 3);

    let ids = ["p1", "p2", "p3"];
    let setup_msg = registry
        .qc_setup_msg_new(shares[0], 2, &ids, &[0, 1], &[1, 2])
        .unwrap();

    // p3 joins fresh: supplying a share is a setup violation
    assert!(matches!(
        registry.qc_session_from_setup(&setup_msg, "p3", shares[2]),
        Err(Error::SetupMessage(_))
    ));
    // and an old party cannot join empty-handed
    assert!(matches!(
        registry.qc_session_from_setup(&setup_msg, "p1", Handle::NULL),
        Err(Error::SetupMessage(_))
    ));
}
