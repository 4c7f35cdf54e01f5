//! Key-Partitioned Parallel Aggregation

use crate::aggregator::{observe, AccountKey, AccountRole};
use crate::window::WindowQueue;
use crate::{OrderingError, VelocityFeatures};
use data_validator::Transaction;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Compute velocity features with one sequential pass per account-role key,
/// keys running in parallel.
///
/// Results are merged back by input index, so the output equals
/// `VelocityAggregator::advance_all` on the same input.
pub fn aggregate_partitioned(
    txs: &[Transaction],
    window_size: u32,
) -> Result<Vec<VelocityFeatures>, OrderingError> {
    check_order(txs)?;

    let mut partitions: HashMap<AccountKey, Vec<usize>> = HashMap::new();
    for (idx, tx) in txs.iter().enumerate() {
        for key in AccountKey::for_transaction(tx) {
            partitions.entry(key).or_default().push(idx);
        }
    }
    debug!(
        transactions = txs.len(),
        partitions = partitions.len(),
        "Aggregating velocity by account-role partition"
    );

    let partials: Vec<(AccountRole, Vec<(usize, u32, f64)>)> = partitions
        .into_par_iter()
        .map(|(key, indices)| {
            let mut queue = WindowQueue::new();
            let seen = indices
                .into_iter()
                .map(|idx| {
                    let tx = &txs[idx];
                    let (count, amount) = observe(&mut queue, window_size, tx.step, tx.amount);
                    (idx, count, amount)
                })
                .collect();
            (key.role, seen)
        })
        .collect();

    let mut features = vec![VelocityFeatures::default(); txs.len()];
    for (role, seen) in partials {
        for (idx, count, amount) in seen {
            let slot = &mut features[idx];
            match role {
                AccountRole::Origin => {
                    slot.orig_count = count;
                    slot.orig_amount = amount;
                }
                AccountRole::Destination => {
                    slot.dest_count = count;
                    slot.dest_amount = amount;
                }
            }
        }
    }
    Ok(features)
}

fn check_order(txs: &[Transaction]) -> Result<(), OrderingError> {
    match txs.windows(2).find(|pair| pair[1].step < pair[0].step) {
        Some(pair) => Err(OrderingError {
            transaction_id: pair[1].transaction_id.clone(),
            previous_step: pair[0].step,
            step: pair[1].step,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VelocityAggregator;
    use data_validator::TransactionType;
    use proptest::prelude::*;

    fn txn(id: usize, step: u32, orig: usize, dest: usize, amount: f64) -> Transaction {
        Transaction {
            transaction_id: format!("t{id}"),
            step,
            txn_type: TransactionType::Payment,
            amount,
            name_orig: format!("C{orig}"),
            oldbalance_orig: 0.0,
            newbalance_orig: 0.0,
            name_dest: format!("C{dest}"),
            oldbalance_dest: 0.0,
            newbalance_dest: 0.0,
            is_fraud: None,
            is_flagged_fraud: None,
        }
    }

    #[test]
    fn test_rejects_disorder() {
        let txs = vec![txn(0, 3, 1, 2, 1.0), txn(1, 2, 1, 2, 1.0)];
        let err = aggregate_partitioned(&txs, 1).unwrap_err();
        assert_eq!(err.transaction_id, "t1");
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_partitioned(&[], 1).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_matches_sequential(
            rows in prop::collection::vec((0u32..3, 0usize..5, 0usize..5, 1u32..10_000), 0..80),
            window in 0u32..3,
        ) {
            let mut step = 0;
            let txs: Vec<Transaction> = rows
                .iter()
                .enumerate()
                .map(|(i, &(gap, orig, dest, amount))| {
                    step += gap;
                    txn(i, step, orig, dest, amount as f64 / 100.0)
                })
                .collect();

            let sequential = VelocityAggregator::new(window).advance_all(&txs).unwrap();
            let parallel = aggregate_partitioned(&txs, window).unwrap();
            prop_assert_eq!(sequential, parallel);
        }
    }
}
