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

use crate::broker::protocol::UpdatePayload;
use crate::common::client;
use crate::common::crypto;
use crate::common::{ErrorKind, Result};
use std::time::Duration;

/// Posts processed transactions to the audit sink. The signature is
/// HMAC-SHA-256 over the canonical payload bytes; the idempotency key is
/// `{nodeId}-{txnId}` so retries from the same node dedupe while distinct
/// nodes remain distinguishable deliveries. Callers treat failures as
/// warnings; the ledger stays authoritative and there is no replay queue.
pub struct AuditClient {
	api_url: String,
	secret: Vec<u8>,
	node_id: String,
	timeout: Duration,
	max_retries: u32,
}

impl AuditClient {
	pub fn new(
		api_url: &str,
		secret: &str,
		node_id: &str,
		timeout: Duration,
		max_retries: u32,
	) -> Self {
		Self {
			api_url: api_url.trim_end_matches('/').to_string(),
			secret: secret.as_bytes().to_vec(),
			node_id: node_id.to_string(),
			timeout,
			max_retries,
		}
	}

	pub fn post_transaction(&self, payload: &UpdatePayload) -> Result<()> {
		let canonical = crypto::canonical_json(payload)?;
		let signature = crypto::sign_payload(&self.secret, canonical.as_bytes())?;
		let idempotency_key = format!("{}-{}", self.node_id, payload.txn_id);
		let body = json!({ "payload": payload });
		let url = format!("{}/log/transactions", self.api_url);
		let resp = client::request_with_retries(self.max_retries, || {
			client::post_json(
				&url,
				&[
					("x-signature", signature.clone()),
					("idempotency-key", idempotency_key.clone()),
				],
				self.timeout,
				&body,
			)
		})?;
		if !resp.is_success() {
			if resp.is_transient() {
				Err(ErrorKind::TransientFailure(format!(
					"audit sink rejected transaction [{}] with status {}",
					payload.txn_id, resp.status
				)))?;
			} else {
				Err(ErrorKind::PermanentFailure(format!(
					"audit sink rejected transaction [{}] with status {}",
					payload.txn_id, resp.status
				)))?;
			}
		}
		Ok(())
	}
}
