//! Last-write-wins reconciliation between the local and durable candidates.
//!
//! The same function runs at startup and for every incoming change, so it
//! must stay free of clock and network access.

use super::model::SessionRecord;

/// Outcome of reconciling two candidate records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The record that should be live everywhere, if any.
    pub winner: Option<SessionRecord>,
    /// The local store lacks (or holds a losing copy of) the winner.
    pub propagate_to_local: bool,
    /// The durable store lacks (or holds a losing copy of) the winner.
    pub propagate_to_durable: bool,
}

impl Reconciliation {
    fn none() -> Self {
        Self {
            winner: None,
            propagate_to_local: false,
            propagate_to_durable: false,
        }
    }

    /// True when neither store needs a write.
    pub fn is_settled(&self) -> bool {
        !self.propagate_to_local && !self.propagate_to_durable
    }
}

/// Picks the winner between `local` and `durable`.
///
/// Greater `updated_at` wins. Equal stamps resolve to `local`, which also
/// means nothing is propagated.
pub fn reconcile(
    local: Option<&SessionRecord>,
    durable: Option<&SessionRecord>,
) -> Reconciliation {
    match (local, durable) {
        (None, None) => Reconciliation::none(),
        (Some(local), None) => Reconciliation {
            winner: Some(local.clone()),
            propagate_to_local: false,
            propagate_to_durable: true,
        },
        (None, Some(durable)) => Reconciliation {
            winner: Some(durable.clone()),
            propagate_to_local: true,
            propagate_to_durable: false,
        },
        (Some(local), Some(durable)) => {
            if durable.updated_at > local.updated_at {
                Reconciliation {
                    winner: Some(durable.clone()),
                    propagate_to_local: true,
                    propagate_to_durable: false,
                }
            } else if local.updated_at > durable.updated_at {
                Reconciliation {
                    winner: Some(local.clone()),
                    propagate_to_local: false,
                    propagate_to_durable: true,
                }
            } else {
                Reconciliation {
                    winner: Some(local.clone()),
                    propagate_to_local: false,
                    propagate_to_durable: false,
                }
            }
        }
    }
}
