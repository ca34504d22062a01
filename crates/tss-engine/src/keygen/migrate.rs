//! Key migration driver
//!
//! Re-encodes externally supplied additive shares into native keyshares.
//! Every party arrives holding a coefficient s_i such that the sum over
//! all parties equals the private key; the exchange reshards those
//! coefficients into Shamir form and checks the result against the
//! expected public key. Nothing fresh is generated.

use std::collections::BTreeMap;

use k256::ProjectivePoint;
use tracing::{debug, info};

use super::dkg::assemble_keyshare;
use super::messages::{MigrateRound1, MigrateRound2};
use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::Keyshare;
use crate::proto::{
    decode_commitments, decode_payload, decode_point, feldman_verify, scalar_from_bytes,
    SecretPolynomial, SessionCore,
};
use crate::setup::{SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_COMMIT: u8 = 1;
const ROUND_SHARE: u8 = 2;

pub struct MigrationSession {
    core: SessionCore,
    poly: SecretPolynomial,
    expected_key: Vec<u8>,
    chain_code: Option<[u8; 32]>,
    commitments: BTreeMap<u16, Vec<ProjectivePoint>>,
    result: Option<Keyshare>,
}

impl MigrationSession {
    /// `secret_coefficient` is this party's additive share s_i with
    /// sum(s_i) = sk; `public_key` is the key the migrated shares must
    /// reproduce.
    pub fn from_setup(
        setup: SetupMessage,
        id: &str,
        public_key: &[u8],
        root_chain_code: Option<[u8; 32]>,
        secret_coefficient: &[u8],
    ) -> Result<Self> {
        let mut core = SessionCore::new(setup, id, SetupKind::Keygen)?;

        // reject garbage early; the round-1 consistency check only covers peers
        decode_point(public_key)
            .map_err(|_| Error::SetupMessage("expected public key is not a valid point".into()))?;
        let coefficient = scalar_from_bytes(secret_coefficient)
            .map_err(|_| Error::SetupMessage("secret coefficient is not a valid scalar".into()))?;

        let t = core.setup.threshold() as usize;
        let poly = SecretPolynomial::random(t - 1, Some(coefficient));
        let commitment_bytes = poly.commitments();

        core.push_broadcast(
            ROUND_COMMIT,
            &MigrateRound1 {
                commitments: commitment_bytes.clone(),
                public_key: public_key.to_vec(),
                chain_code: root_chain_code,
            },
        )?;

        let mut commitments = BTreeMap::new();
        commitments.insert(core.me, decode_commitments(&commitment_bytes)?);

        info!(
            party = %id,
            public_key = %hex::encode(public_key),
            "key migration session created"
        );

        Ok(Self {
            core,
            poly,
            expected_key: public_key.to_vec(),
            chain_code: root_chain_code,
            commitments,
            result: None,
        })
    }

    fn advance(&mut self) -> Result<()> {
        let others = self.core.others();
        let t = self.core.setup.threshold() as usize;

        if self.commitments.len() == 1 && self.core.ledger.round_complete(ROUND_COMMIT, &others) {
            let round = self.core.ledger.take_round(ROUND_COMMIT);
            for (&from, payload) in &round {
                let msg: MigrateRound1 = decode_payload(payload).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                if msg.commitments.len() != t
                    || msg.public_key != self.expected_key
                    || msg.chain_code != self.chain_code
                {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                let points = decode_commitments(&msg.commitments).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                self.commitments.insert(from, points);
            }

            debug!(party = self.core.me, "migration commitments complete, sending shares");
            for &to in &others {
                let share = self.poly.evaluate(to as u64 + 1);
                self.core.push_direct(
                    ROUND_SHARE,
                    to,
                    &MigrateRound2 {
                        share: share.to_bytes().to_vec(),
                    },
                )?;
            }
        }

        if self.commitments.len() == self.core.setup.party_count()
            && self.core.ledger.round_complete(ROUND_SHARE, &others)
        {
            let round = self.core.ledger.take_round(ROUND_SHARE);
            let my_point = self.core.me as u64 + 1;
            let mut secret = self.poly.evaluate(my_point);

            for &from in &others {
                let msg: MigrateRound2 =
                    decode_payload(&round[&from]).map_err(|_| Error::Abort {
                        party: from as usize,
                    })?;
                let share = scalar_from_bytes(&msg.share).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                if !feldman_verify(&share, my_point, &self.commitments[&from]) {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                secret += share;
            }

            let mut share = assemble_keyshare(
                &self.core.setup,
                self.core.me,
                secret,
                &self.commitments,
                None,
            )?;

            if share.public_key != self.expected_key {
                return Err(Error::Keygen(format!(
                    "migrated key {} does not match the expected public key",
                    hex::encode(&share.public_key)
                )));
            }
            share.chain_code = self.chain_code;

            self.result = Some(share);
            self.core.complete = true;

            info!(party = self.core.me, "key migration session finished");
        }

        Ok(())
    }
}

impl ProtocolDriver for MigrationSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.core.pop_output()
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        self.core.receiver(message, index)
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        self.core.accept(message, ROUND_SHARE)?;
        match self.advance() {
            Ok(()) => Ok(self.core.complete),
            Err(e) => Err(self.core.record_failure(e)),
        }
    }

    fn finish(&mut self) -> Result<SessionOutput> {
        self.core.finalize()?;
        if let Some(error) = self.core.failure.take() {
            return Err(error);
        }
        match self.result.take() {
            Some(share) => Ok(SessionOutput::Keyshare(Box::new(share))),
            None => Err(Error::InvalidSessionState),
        }
    }
}
