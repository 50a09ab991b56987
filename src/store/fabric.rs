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

use super::{profile_key, LedgerStore, ProfileEntry};
use crate::common::client::{self, HttpResponse};
use crate::common::{ErrorKind, Result};
use crate::ledger::WalletProfile;
use serde::Deserialize;
use std::time::Duration;

/// Client for the external versioned key/value + lease fabric.
#[derive(Clone)]
pub struct FabricLedgerStore {
	base_url: String,
	timeout: Duration,
	max_retries: u32,
}

impl FabricLedgerStore {
	pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> Self {
		Self {
			base_url: base_url.trim_end_matches('/').to_string(),
			timeout,
			max_retries,
		}
	}

	fn entry_url(&self, key: &str) -> String {
		format!("{}/v1/entries/{}", self.base_url, key)
	}

	fn lease_url(&self, key: &str, op: &str) -> String {
		format!("{}/v1/leases/{}/{}", self.base_url, key, op)
	}

	fn lease_request(
		&self,
		user_id: &str,
		op: &str,
		holder: &str,
		ttl: Option<Duration>,
	) -> Result<HttpResponse> {
		let url = self.lease_url(&profile_key(user_id), op);
		let body = json!({
			"holder": holder,
			"ttlSecs": ttl.map(|t| t.as_secs()),
		});
		client::request_with_retries(self.max_retries, || {
			client::post_json(&url, &[], self.timeout, &body)
		})
	}
}

#[derive(Deserialize)]
struct EntryBody {
	data: WalletProfile,
	version: String,
}

#[derive(Deserialize)]
struct VersionBody {
	version: String,
}

#[derive(Deserialize)]
struct LeaseBody {
	granted: bool,
}

impl LedgerStore for FabricLedgerStore {
	fn read_profile(&self, user_id: &str) -> Result<ProfileEntry> {
		let url = self.entry_url(&profile_key(user_id));
		let resp = client::request_with_retries(self.max_retries, || {
			client::get(&url, &[], self.timeout)
		})?;
		if resp.status == 404 {
			return Ok(ProfileEntry {
				profile: None,
				version: None,
			});
		}
		if !resp.is_success() {
			return Err(request_failure(&url, &resp));
		}
		let body: EntryBody = serde_json::from_slice(&resp.body)
			.map_err(|_| ErrorKind::CorruptedEntry(user_id.to_string()))?;
		Ok(ProfileEntry {
			profile: Some(body.data),
			version: Some(body.version),
		})
	}

	fn write_profile(
		&self,
		user_id: &str,
		profile: &WalletProfile,
		match_version: Option<&str>,
	) -> Result<String> {
		let url = self.entry_url(&profile_key(user_id));
		let body = json!({
			"data": profile,
			"matchVersion": match_version,
		});
		let resp = client::request_with_retries(self.max_retries, || {
			client::post_json(&url, &[], self.timeout, &body)
		})?;
		if resp.status == 409 {
			Err(ErrorKind::VersionConflict)?;
		}
		if !resp.is_success() {
			return Err(request_failure(&url, &resp));
		}
		let body: VersionBody = serde_json::from_slice(&resp.body)
			.map_err(|_| ErrorKind::CorruptedEntry(user_id.to_string()))?;
		Ok(body.version)
	}

	fn acquire_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
		let resp = self.lease_request(user_id, "acquire", holder, Some(ttl))?;
		if resp.status == 409 {
			return Ok(false);
		}
		if !resp.is_success() {
			return Err(request_failure("lease acquire", &resp));
		}
		let body: LeaseBody = serde_json::from_slice(&resp.body)
			.map_err(|_| ErrorKind::CorruptedEntry(user_id.to_string()))?;
		Ok(body.granted)
	}

	fn renew_session(&self, user_id: &str, holder: &str, ttl: Duration) -> Result<bool> {
		let resp = self.lease_request(user_id, "renew", holder, Some(ttl))?;
		if resp.status == 409 {
			return Ok(false);
		}
		if !resp.is_success() {
			return Err(request_failure("lease renew", &resp));
		}
		let body: LeaseBody = serde_json::from_slice(&resp.body)
			.map_err(|_| ErrorKind::CorruptedEntry(user_id.to_string()))?;
		Ok(body.granted)
	}

	fn release_session(&self, user_id: &str, holder: &str) -> Result<()> {
		let resp = self.lease_request(user_id, "release", holder, None)?;
		if !resp.is_success() {
			return Err(request_failure("lease release", &resp));
		}
		Ok(())
	}
}

fn request_failure(what: &str, resp: &HttpResponse) -> failure::Error {
	if resp.is_transient() {
		ErrorKind::TransientFailure(format!(
			"store request {} failed with status {}",
			what, resp.status
		))
		.into()
	} else {
		ErrorKind::PermanentFailure(format!(
			"store request {} failed with status {}",
			what, resp.status
		))
		.into()
	}
}
