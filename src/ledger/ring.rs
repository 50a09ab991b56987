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

use super::types::ProcessedRecord;
use crate::common::{ErrorKind, Result};
use std::collections::{HashMap, VecDeque};

pub const RING_CAPACITY: usize = 64;

/// Bounded FIFO map of recently processed transaction records. The ring is
/// the only replay-exactness mechanism: a txn id evicted before its replay
/// arrives will be re-applied. Not thread-safe; callers hold the session's
/// exclusive lock.
pub struct ProcessedRing {
	capacity: usize,
	order: VecDeque<String>,
	records: HashMap<String, ProcessedRecord>,
}

impl ProcessedRing {
	pub fn new(capacity: usize) -> Result<Self> {
		if capacity == 0 {
			Err(ErrorKind::InvalidRingCapacity)?;
		}
		Ok(Self {
			capacity,
			order: VecDeque::with_capacity(capacity),
			records: HashMap::with_capacity(capacity),
		})
	}

	/// Seed records are applied in order, oldest first.
	pub fn with_seed(capacity: usize, seed: &[ProcessedRecord]) -> Result<Self> {
		let mut ring = ProcessedRing::new(capacity)?;
		for record in seed {
			ring.record(record.clone());
		}
		Ok(ring)
	}

	/// First writer wins: if the txn id is already resident the stored
	/// record is returned untouched and nothing mutates.
	pub fn record(&mut self, record: ProcessedRecord) -> (bool, ProcessedRecord) {
		if let Some(existing) = self.records.get(&record.txn_id) {
			return (false, existing.clone());
		}
		if self.order.len() == self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.records.remove(&oldest);
			}
		}
		self.order.push_back(record.txn_id.clone());
		self.records.insert(record.txn_id.clone(), record.clone());
		(true, record)
	}

	pub fn get(&self, txn_id: &str) -> Option<&ProcessedRecord> {
		self.records.get(txn_id)
	}

	pub fn list_newest_first(&self) -> Vec<ProcessedRecord> {
		self.order
			.iter()
			.rev()
			.filter_map(|id| self.records.get(id).cloned())
			.collect()
	}

	/// Persistence order: oldest first, matching `WalletProfile.processed`.
	pub fn snapshot(&self) -> Vec<ProcessedRecord> {
		self.order
			.iter()
			.filter_map(|id| self.records.get(id).cloned())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ledger::types::CommandSource;

	fn record(txn_id: &str, delta: i64) -> ProcessedRecord {
		ProcessedRecord {
			txn_id: txn_id.to_string(),
			delta,
			balance_after: delta,
			actor: "ops".to_string(),
			source: CommandSource::Discord,
			reason: None,
			processed_at: 0,
		}
	}

	#[test]
	fn rejects_zero_capacity() {
		assert!(ProcessedRing::new(0).is_err());
	}

	#[test]
	fn records_and_looks_up() {
		let mut ring = ProcessedRing::new(4).unwrap();
		let (inserted, stored) = ring.record(record("A", 1));
		assert!(inserted);
		assert_eq!(stored.txn_id, "A");
		assert_eq!(ring.get("A").unwrap().delta, 1);
		assert!(ring.get("B").is_none());
	}

	#[test]
	fn duplicate_returns_first_record() {
		let mut ring = ProcessedRing::new(4).unwrap();
		ring.record(record("A", 1));
		let mut replay = record("A", 99);
		replay.balance_after = 99;
		let (inserted, stored) = ring.record(replay);
		assert!(!inserted);
		assert_eq!(stored.delta, 1);
		assert_eq!(ring.len(), 1);
	}

	#[test]
	fn evicts_oldest_when_full() {
		let mut ring = ProcessedRing::new(3).unwrap();
		for id in vec!["A", "B", "C"] {
			ring.record(record(id, 1));
		}
		ring.record(record("D", 1));
		assert_eq!(ring.len(), 3);
		assert!(ring.get("A").is_none());
		assert!(ring.get("B").is_some());
		assert!(ring.get("D").is_some());
	}

	#[test]
	fn evicted_id_can_be_recorded_again() {
		let mut ring = ProcessedRing::new(2).unwrap();
		ring.record(record("A", 1));
		ring.record(record("B", 1));
		ring.record(record("C", 1));
		let (inserted, _) = ring.record(record("A", 1));
		assert!(inserted);
		assert!(ring.get("B").is_none());
	}

	#[test]
	fn listing_orders_newest_first() {
		let mut ring = ProcessedRing::new(4).unwrap();
		for id in vec!["A", "B", "C"] {
			ring.record(record(id, 1));
		}
		let ids: Vec<String> = ring
			.list_newest_first()
			.into_iter()
			.map(|r| r.txn_id)
			.collect();
		assert_eq!(ids, vec!["C", "B", "A"]);
		let snapshot: Vec<String> = ring.snapshot().into_iter().map(|r| r.txn_id).collect();
		assert_eq!(snapshot, vec!["A", "B", "C"]);
	}

	#[test]
	fn seed_preserves_order_and_caps_length() {
		let seed: Vec<ProcessedRecord> =
			(0..5).map(|i| record(&format!("T{}", i), 1)).collect();
		let ring = ProcessedRing::with_seed(3, &seed).unwrap();
		assert_eq!(ring.len(), 3);
		let snapshot: Vec<String> = ring.snapshot().into_iter().map(|r| r.txn_id).collect();
		assert_eq!(snapshot, vec!["T2", "T3", "T4"]);
	}
}
