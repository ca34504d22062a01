//! Generic message router
//!
//! Drives any set of local sessions to completion: drain every running
//! session's outbound queue, enumerate each message's recipients, append
//! to per-name mailboxes, feed mailboxes back in order, and finish+free
//! each session exactly once as it completes. Works for every protocol
//! because fan-out is discovered per message, never assumed.
//!
//! A full pass that moves nothing while sessions are still running means
//! the driven set can never complete (e.g. fewer signers than the
//! threshold requires); that surfaces as [`Error::Stalled`] instead of a
//! silent hang.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::registry::{Handle, Registry};
use crate::session::FinishResult;
use crate::{Error, Result};

/// One locally driven party: its name in the setup message and its
/// session handle.
pub struct RouterParty {
    pub name: String,
    pub session: Handle,
}

impl RouterParty {
    pub fn new(name: impl Into<String>, session: Handle) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }
}

/// A finished party's result.
pub struct SessionOutcome {
    pub name: String,
    pub result: FinishResult,
}

/// Runs the drain/deliver loop until every given session has finished,
/// finishing and freeing each exactly once. Outcomes are returned in
/// completion order.
pub fn run_protocol(registry: &Registry, parties: Vec<RouterParty>) -> Result<Vec<SessionOutcome>> {
    let expected = parties.len();
    let mut live: Vec<RouterParty> = parties;
    let mut mailbox: HashMap<String, VecDeque<Vec<u8>>> = HashMap::new();
    let mut outcomes: Vec<SessionOutcome> = Vec::new();

    while outcomes.len() != expected {
        let mut progressed = false;

        // drain every running session and route its messages
        for party in &live {
            loop {
                let Some(message) = registry.session_output(party.session)? else {
                    break;
                };
                progressed = true;
                deliver(registry, party, &message, &mut mailbox)?;
            }
        }

        // feed each party its queued messages, in arrival order
        let mut still_live = Vec::with_capacity(live.len());
        for party in live {
            let queue = mailbox.entry(party.name.clone()).or_default();
            let mut finished = false;

            while let Some(message) = queue.pop_front() {
                progressed = true;
                if registry.session_input(party.session, &message)? {
                    finished = true;
                    break;
                }
            }

            if finished {
                if let Some(queue) = mailbox.get(&party.name) {
                    if !queue.is_empty() {
                        warn!(party = %party.name, left = queue.len(), "messages queued past completion");
                    }
                }

                let result = registry.session_finish(party.session)?;
                registry.session_free(party.session)?;
                debug!(party = %party.name, "party finished");
                outcomes.push(SessionOutcome {
                    name: party.name,
                    result,
                });
            } else {
                still_live.push(party);
            }
        }
        live = still_live;

        if !progressed && outcomes.len() != expected {
            return Err(Error::Stalled);
        }
    }

    Ok(outcomes)
}

fn deliver(
    registry: &Registry,
    sender: &RouterParty,
    message: &[u8],
    mailbox: &mut HashMap<String, VecDeque<Vec<u8>>>,
) -> Result<()> {
    for index in 0.. {
        let Some(receiver) = registry.session_message_receiver(sender.session, message, index)?
        else {
            break;
        };
        mailbox
            .entry(receiver)
            .or_default()
            .push_back(message.to_vec());
    }
    Ok(())
}
