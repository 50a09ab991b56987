// Copyright 2019 The vault713 Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::ring::ProcessedRing;
use super::types::{ProcessedRecord, TxnCommand};

pub struct ApplyOutcome {
	pub balance: i64,
	pub inserted: bool,
	pub record: ProcessedRecord,
}

/// Deterministic delta application atop a balance and a ring. A replayed
/// txn id leaves the balance untouched and returns the original record;
/// the delta inside a replay envelope is ignored even if it differs.
/// Never touches persistence.
pub fn apply(
	current_balance: i64,
	command: &TxnCommand,
	ring: &mut ProcessedRing,
	now_ms: i64,
) -> ApplyOutcome {
	let candidate = ProcessedRecord {
		txn_id: command.txn_id.clone(),
		delta: command.delta,
		balance_after: current_balance + command.delta,
		actor: command.actor.clone(),
		source: command.source,
		reason: command.reason.clone(),
		processed_at: now_ms,
	};
	let (inserted, record) = ring.record(candidate);
	let balance = if inserted {
		record.balance_after
	} else {
		current_balance
	};
	ApplyOutcome {
		balance,
		inserted,
		record,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ledger::ring::RING_CAPACITY;
	use crate::ledger::types::CommandSource;

	fn command(txn_id: &str, delta: i64) -> TxnCommand {
		TxnCommand {
			txn_id: txn_id.to_string(),
			user_id: "U".to_string(),
			delta,
			actor: "ops".to_string(),
			source: CommandSource::Discord,
			reason: None,
			issued_at: None,
		}
	}

	#[test]
	fn applies_credit_over_balance() {
		let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
		let outcome = apply(0, &command("A", 10), &mut ring, 1);
		assert!(outcome.inserted);
		assert_eq!(outcome.balance, 10);
		assert_eq!(outcome.record.balance_after, 10);
		assert_eq!(outcome.record.processed_at, 1);
	}

	#[test]
	fn applies_debit_below_zero() {
		let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
		let outcome = apply(5, &command("A", -8), &mut ring, 1);
		assert!(outcome.inserted);
		assert_eq!(outcome.balance, -3);
	}

	#[test]
	fn replay_is_a_no_op() {
		let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
		let first = apply(0, &command("A", 10), &mut ring, 1);
		let replay = apply(first.balance, &command("A", 10), &mut ring, 2);
		assert!(!replay.inserted);
		assert_eq!(replay.balance, 10);
		assert_eq!(replay.record, first.record);
	}

	#[test]
	fn replay_with_differing_delta_keeps_first_record() {
		let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
		let first = apply(0, &command("A", 10), &mut ring, 1);
		let replay = apply(first.balance, &command("A", 999), &mut ring, 2);
		assert!(!replay.inserted);
		assert_eq!(replay.balance, 10);
		assert_eq!(replay.record.delta, 10);
		assert_eq!(replay.record.processed_at, 1);
	}

	#[test]
	fn balance_conserves_sum_of_distinct_deltas() {
		let mut ring = ProcessedRing::new(RING_CAPACITY).unwrap();
		let mut balance = 0;
		for i in 0..10 {
			let outcome = apply(balance, &command(&format!("T{}", i), i + 1), &mut ring, i);
			balance = outcome.balance;
		}
		// replays of half of them change nothing
		for i in 0..5 {
			let outcome = apply(balance, &command(&format!("T{}", i), i + 1), &mut ring, 99);
			assert!(!outcome.inserted);
			balance = outcome.balance;
		}
		assert_eq!(balance, (1..=10).sum::<i64>());
	}
}
