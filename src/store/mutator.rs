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

use super::LedgerStore;
use crate::common::{Arc, ErrorKind, Result};
use crate::ledger::{applier, ProcessedRecord, ProcessedRing, TxnCommand, WalletProfile, RING_CAPACITY};
use chrono::Utc;

pub enum MutateOutcome {
	/// First apply: the profile was written and side effects should run.
	Applied { balance: i64, record: ProcessedRecord },
	/// The txn id was still resident in the ring; nothing changed.
	Replayed { balance: i64, record: ProcessedRecord },
}

/// Emulates a transactional read-modify-write over a store that only
/// offers optimistic concurrency. On a version conflict the profile is
/// re-read and the ring rebuilt from the fresh `processed` sequence, so a
/// competing writer's records are never double-accounted.
pub struct ProfileMutator {
	store: Arc<dyn LedgerStore>,
	max_retries: u32,
}

impl ProfileMutator {
	pub fn new(store: Arc<dyn LedgerStore>, max_retries: u32) -> Self {
		Self { store, max_retries }
	}

	pub fn apply_command(&self, command: &TxnCommand) -> Result<MutateOutcome> {
		let mut attempt = 0;
		loop {
			attempt += 1;
			let entry = self.store.read_profile(&command.user_id)?;
			let version = entry.version;
			let profile = entry.profile.unwrap_or_default();
			let mut ring = ProcessedRing::with_seed(RING_CAPACITY, &profile.processed)?;
			let outcome = applier::apply(
				profile.balance,
				command,
				&mut ring,
				Utc::now().timestamp_millis(),
			);
			if !outcome.inserted {
				return Ok(MutateOutcome::Replayed {
					balance: outcome.balance,
					record: outcome.record,
				});
			}
			let updated = WalletProfile {
				balance: outcome.balance,
				processed: ring.snapshot(),
			};
			match self.store.write_profile(
				&command.user_id,
				&updated,
				version.as_ref().map(|v| &**v),
			) {
				Ok(_) => {
					return Ok(MutateOutcome::Applied {
						balance: outcome.balance,
						record: outcome.record,
					});
				}
				Err(e) => {
					let conflict = e
						.downcast_ref::<ErrorKind>()
						.map(|kind| *kind == ErrorKind::VersionConflict)
						.unwrap_or(false);
					if !conflict {
						return Err(e);
					}
					if attempt >= self.max_retries {
						return Err(ErrorKind::TransientFailure(format!(
							"version conflicts exhausted for user {}",
							command.user_id
						))
						.into());
					}
					debug!(
						"version conflict for user [{}], retrying ({}/{})",
						command.user_id, attempt, self.max_retries
					);
				}
			}
		}
	}
}
