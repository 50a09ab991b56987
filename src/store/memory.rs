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

use super::{LedgerStore, ProfileEntry};
use crate::common::{ErrorKind, Mutex, Result};
use crate::ledger::WalletProfile;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Lease {
	holder: String,
	expires_at: Instant,
}

/// In-process store backend with the same versioned-write and lease
/// semantics as the fabric. Useful for single-node deployments and tests.
pub struct MemoryLedgerStore {
	entries: Mutex<HashMap<String, (WalletProfile, u64)>>,
	leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLedgerStore {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			leases: Mutex::new(HashMap::new()),
		}
	}
}

impl LedgerStore for MemoryLedgerStore {
	fn read_profile(&self, user_id: &str) -> Result<ProfileEntry> {
		let entries = self.entries.lock();
		Ok(match entries.get(user_id) {
			Some((profile, version)) => ProfileEntry {
				profile: Some(profile.clone()),
				version: Some(version.to_string()),
			},
			None => ProfileEntry {
				profile: None,
				version: None,
			},
		})
	}

	fn write_profile(
		&self,
		user_id: &str,
		profile: &WalletProfile,
		match_version: Option<&str>,
	) -> Result<String> {
		let mut entries = self.entries.lock();
		let next = match (entries.get(user_id), match_version) {
			(Some((_, current)), Some(expected)) if expected == current.to_string() => current + 1,
			(None, None) => 1,
			_ => Err(ErrorKind::VersionConflict)?,
		};
		entries.insert(user_id.to_string(), (profile.clone(), next));
		Ok(next.to_string())
	}

	fn acquire_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
		let mut leases = self.leases.lock();
		let now = Instant::now();
		match leases.get(user_id) {
			Some(lease) if lease.expires_at > now && lease.holder != holder => Ok(false),
			_ => {
				leases.insert(
					user_id.to_string(),
					Lease {
						holder: holder.to_string(),
						expires_at: now + ttl,
					},
				);
				Ok(true)
			}
		}
	}

	fn renew_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
		let mut leases = self.leases.lock();
		let now = Instant::now();
		match leases.get_mut(user_id) {
			Some(lease) if lease.holder == holder && lease.expires_at > now => {
				lease.expires_at = now + ttl;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	fn release_session(&self, user_id: &str, holder: &str) -> Result<()> {
		let mut leases = self.leases.lock();
		if let Some(lease) = leases.get(user_id) {
			if lease.holder == holder {
				leases.remove(user_id);
			}
		}
		Ok(())
	}
}
