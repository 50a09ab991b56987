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

pub mod fabric;
pub mod memory;
pub mod mutator;

pub use self::fabric::FabricLedgerStore;
pub use self::memory::MemoryLedgerStore;
pub use self::mutator::{MutateOutcome, ProfileMutator};

use crate::common::Result;
use crate::ledger::WalletProfile;
use std::time::Duration;

/// A profile read. A missing entry is `profile: None`, never an error.
pub struct ProfileEntry {
	pub profile: Option<WalletProfile>,
	pub version: Option<String>,
}

/// Seam to the versioned key/value + lease fabric. Reads return an opaque
/// version token; conditional writes fail with `ErrorKind::VersionConflict`
/// on a stale token. Session leases enforce the single writer per user.
pub trait LedgerStore: Send + Sync {
	fn read_profile(&self, user_id: &str) -> Result<ProfileEntry>;

	fn write_profile(
		&self,
		user_id: &str,
		profile: &WalletProfile,
		match_version: Option<&str>,
	) -> Result<String>;

	fn acquire_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool>;

	fn renew_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool>;

	fn release_session(&self, user_id: &str, holder: &str) -> Result<()>;
}

pub fn profile_key(user_id: &str) -> String {
	format!("wallet:{}", user_id)
}
