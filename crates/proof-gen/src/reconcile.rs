//! Deposit Reconciliation
//!
//! Splits the strategy contract's pending deposits into those still queued on
//! the beacon chain and those the beacon chain has already processed.

use crate::types::{to_hex, Hash256, PendingDepositRecord};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("pending deposit root {root} appears at beacon queue positions {first} and {second}")]
    Collision { root: String, first: u32, second: u32 },

    #[error("beacon pending deposit queue is longer than u32::MAX")]
    QueueTooLong,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Still in the beacon queue, with their queue position
    pub matched: Vec<(PendingDepositRecord, u32)>,
    /// No longer in the beacon queue
    pub processed: Vec<PendingDepositRecord>,
}

impl Reconciliation {
    #[must_use]
    pub fn all_matched(&self) -> bool {
        self.processed.is_empty()
    }
}

pub struct DepositReconciler;

impl DepositReconciler {
    /// Classify each contract deposit by whether its content hash is present
    /// in `beacon_queue`.
    ///
    /// The queue is indexed once; input order is preserved in both outputs.
    /// A root appearing twice in the queue is only an error when a contract
    /// deposit refers to it.
    pub fn reconcile(
        contract_deposits: &[PendingDepositRecord],
        beacon_queue: &[Hash256],
    ) -> Result<Reconciliation, ReconcileError> {
        let mut positions: HashMap<&Hash256, Result<u32, (u32, u32)>> =
            HashMap::with_capacity(beacon_queue.len());
        for (i, root) in beacon_queue.iter().enumerate() {
            let i = u32::try_from(i).map_err(|_| ReconcileError::QueueTooLong)?;
            match positions.entry(root) {
                Entry::Vacant(slot) => {
                    slot.insert(Ok(i));
                }
                Entry::Occupied(mut slot) => {
                    if let Ok(first) = *slot.get() {
                        slot.insert(Err((first, i)));
                    }
                }
            }
        }

        let mut result = Reconciliation::default();
        for deposit in contract_deposits {
            match positions.get(&deposit.deposit_root) {
                Some(Ok(index)) => result.matched.push((*deposit, *index)),
                Some(Err((first, second))) => {
                    return Err(ReconcileError::Collision {
                        root: to_hex(&deposit.deposit_root),
                        first: *first,
                        second: *second,
                    })
                }
                None => result.processed.push(*deposit),
            }
        }

        debug!(
            contract = contract_deposits.len(),
            queue = beacon_queue.len(),
            matched = result.matched.len(),
            processed = result.processed.len(),
            "Reconciled pending deposits"
        );
        Ok(result)
    }
}
