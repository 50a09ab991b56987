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

use crate::common::{ErrorKind, Result};
use crate::ledger::CommandSource;
use crate::storage::lmdb::Store;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_QUERY_LIMIT: usize = 100;
pub const DEFAULT_QUERY_LIMIT: usize = 20;

const DB_DIR: &str = "audit";
const SEQ_KEY: &[u8] = b"s:seq";

/// Immutable audit log entry, keyed by txn id; `created_at` is server-set.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditRow {
	#[serde(rename = "txnId")]
	pub txn_id: String,
	#[serde(rename = "userId")]
	pub user_id: String,
	pub delta: i64,
	pub actor: String,
	pub source: CommandSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(rename = "createdAt")]
	pub created_at: String,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IngestOutcome {
	Accepted,
	/// Same idempotency key, same payload hash: the earlier delivery wins.
	Deduped,
	/// Same idempotency key, different payload hash.
	KeyConflict,
}

/// Durable audit log. Deliveries are deduplicated by idempotency key plus
/// payload hash; audit rows are create-only and keyed by txn id, with an
/// insertion-ordered sequence for newest-first queries.
pub struct AuditSink {
	store: Store,
}

fn row_key(seq: u64) -> Vec<u8> {
	format!("a:{:016}", seq).into_bytes()
}

fn txn_key(txn_id: &str) -> Vec<u8> {
	format!("t:{}", txn_id).into_bytes()
}

fn delivery_key(key: &str) -> Vec<u8> {
	format!("d:{}", key).into_bytes()
}

impl AuditSink {
	pub fn new(data_path: &Path) -> Result<Self> {
		let store = Store::new(&data_path.join(DB_DIR))?;
		Ok(Self { store })
	}

	/// One write transaction: delivery-record insert, then create-only row
	/// upsert. A deduped delivery skips the row entirely, a key conflict
	/// aborts with nothing written.
	pub fn ingest(
		&self,
		idempotency_key: &str,
		payload_hash: &str,
		row: AuditRow,
	) -> Result<IngestOutcome> {
		self.store.transact(|batch| {
			if !batch.put_if_absent(&delivery_key(idempotency_key), payload_hash.as_bytes())? {
				let existing = batch.get(&delivery_key(idempotency_key))?.unwrap_or_default();
				return Ok(if existing == payload_hash.as_bytes() {
					IngestOutcome::Deduped
				} else {
					IngestOutcome::KeyConflict
				});
			}
			if batch.get(&txn_key(&row.txn_id))?.is_none() {
				let seq = match batch.get(SEQ_KEY)? {
					Some(bytes) => std::str::from_utf8(&bytes)
						.ok()
						.and_then(|s| s.parse::<u64>().ok())
						.ok_or(ErrorKind::CorruptedRow)?,
					None => 0,
				};
				batch.put_ser(&row_key(seq), &row)?;
				batch.put(&txn_key(&row.txn_id), seq.to_string().as_bytes())?;
				batch.put(SEQ_KEY, (seq + 1).to_string().as_bytes())?;
			}
			Ok(IngestOutcome::Accepted)
		})
	}

	/// Latest rows first, optionally filtered by user. Rows are immutable
	/// and the sequence only grows, so walking backwards from the current
	/// sequence is consistent enough without a read snapshot.
	pub fn query(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<AuditRow>> {
		let seq = match self.store.get(SEQ_KEY)? {
			Some(bytes) => std::str::from_utf8(&bytes)
				.ok()
				.and_then(|s| s.parse::<u64>().ok())
				.ok_or(ErrorKind::CorruptedRow)?,
			None => 0,
		};
		let mut rows = Vec::new();
		for i in (0..seq).rev() {
			if rows.len() >= limit {
				break;
			}
			let row: AuditRow = match self.store.get_ser(&row_key(i))? {
				Some(row) => row,
				None => Err(ErrorKind::CorruptedRow)?,
			};
			if let Some(user_id) = user_id {
				if row.user_id != user_id {
					continue;
				}
			}
			rows.push(row);
		}
		Ok(rows)
	}
}
