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

use crate::api::error::SinkError;
use crate::api::router::SinkApi;
use crate::audit::{AuditRow, IngestOutcome, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::common::crypto;
use crate::ledger::CommandSource;
use chrono::Utc;
use futures::{future, Future, Stream};
use gotham::handler::{HandlerFuture, IntoHandlerError};
use gotham::helpers::http::response::create_response;
use gotham::state::{FromState, State};
use hyper::body::Chunk;
use hyper::{Body, HeaderMap, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

pub fn health(state: State) -> (State, Response<Body>) {
	let body = json!({
		"status": "ok",
		"timestamp": Utc::now().to_rfc3339(),
	});
	let res = create_response(
		&state,
		StatusCode::OK,
		mime::APPLICATION_JSON,
		body.to_string(),
	);
	(state, res)
}

#[derive(Deserialize, StateData, StaticResponseExtender)]
pub struct TransactionsQueryParams {
	#[serde(rename = "userId")]
	user_id: Option<String>,
	limit: Option<usize>,
}

pub fn list_transactions(state: State) -> (State, Response<Body>) {
	let res = match handle_list_transactions(&state) {
		Ok(res) => res,
		Err(e) => e.into_response(&state),
	};
	(state, res)
}

fn handle_list_transactions(state: &State) -> Result<Response<Body>, SinkError> {
	let &TransactionsQueryParams { ref user_id, limit } =
		TransactionsQueryParams::borrow_from(&state);
	let api = SinkApi::borrow_from(&state);
	let limit = std::cmp::min(limit.unwrap_or(DEFAULT_QUERY_LIMIT), MAX_QUERY_LIMIT);
	let rows = api
		.sink
		.query(user_id.as_ref().map(|x| &**x), limit)
		.map_err(SinkError::internal)?;
	let body = serde_json::to_string(&rows).map_err(|e| SinkError::internal(e.into()))?;
	Ok(create_response(
		state,
		StatusCode::OK,
		mime::APPLICATION_JSON,
		body,
	))
}

pub fn ingest_transaction(mut state: State) -> Box<HandlerFuture> {
	let future = Body::take_from(&mut state)
		.concat2()
		.then(|body| match body {
			Ok(body) => {
				let res = match handle_ingest_transaction(&state, &body) {
					Ok(res) => res,
					Err(e) => e.into_response(&state),
				};
				future::ok((state, res))
			}
			Err(e) => future::err((state, e.into_handler_error())),
		});

	Box::new(future)
}

fn handle_ingest_transaction(state: &State, body: &Chunk) -> Result<Response<Body>, SinkError> {
	let api = SinkApi::borrow_from(&state);
	let headers = HeaderMap::borrow_from(&state);

	let request: Value = serde_json::from_slice(&body.to_vec()[..])
		.map_err(|_| SinkError::bad_request("Malformed request body"))?;
	let payload = match request.get("payload") {
		Some(payload) if payload.is_object() => payload.clone(),
		_ => Err(SinkError::bad_request("Missing payload"))?,
	};
	let idempotency_key =
		header_or_field(headers, "idempotency-key", &request, "idempotencyKey")
			.ok_or_else(|| SinkError::bad_request("Missing idempotency key"))?;
	let signature = header_or_field(headers, "x-signature", &request, "signature")
		.ok_or_else(|| SinkError::unauthorized("Missing signature"))?;

	let canonical = crypto::canonical_json(&payload).map_err(SinkError::internal)?;
	if !crypto::verify_signature(&api.secret, canonical.as_bytes(), &signature) {
		debug!("rejecting delivery [{}] with bad signature", idempotency_key);
		Err(SinkError::unauthorized("Invalid signature"))?;
	}

	let row = audit_row_from_payload(&payload)
		.ok_or_else(|| SinkError::bad_request("Malformed payload"))?;
	let payload_hash = crypto::payload_hash(canonical.as_bytes());

	match api
		.sink
		.ingest(&idempotency_key, &payload_hash, row)
		.map_err(SinkError::internal)?
	{
		IngestOutcome::Accepted => Ok(create_response(
			state,
			StatusCode::OK,
			mime::APPLICATION_JSON,
			json!({ "accepted": true, "deduped": false }).to_string(),
		)),
		IngestOutcome::Deduped => Ok(create_response(
			state,
			StatusCode::OK,
			mime::APPLICATION_JSON,
			json!({ "accepted": true, "deduped": true }).to_string(),
		)),
		IngestOutcome::KeyConflict => Err(SinkError::conflict("Idempotency key conflict")),
	}
}

fn header_or_field(
	headers: &HeaderMap,
	header: &str,
	request: &Value,
	field: &str,
) -> Option<String> {
	headers
		.get(header)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.to_string())
		.or_else(|| {
			request
				.get(field)
				.and_then(|v| v.as_str())
				.map(|v| v.to_string())
		})
		.filter(|v| !v.is_empty())
}

fn audit_row_from_payload(payload: &Value) -> Option<AuditRow> {
	let txn_id = payload.get("txnId")?.as_str()?;
	let user_id = payload.get("userId")?.as_str()?;
	if txn_id.is_empty() || user_id.is_empty() {
		return None;
	}
	let delta = payload.get("delta")?.as_i64()?;
	let actor = payload.get("actor")?.as_str()?;
	let source: CommandSource = serde_json::from_value(payload.get("source")?.clone()).ok()?;
	let reason = payload
		.get("reason")
		.and_then(|v| v.as_str())
		.map(|v| v.to_string());
	Some(AuditRow {
		txn_id: txn_id.to_string(),
		user_id: user_id.to_string(),
		delta,
		actor: actor.to_string(),
		source,
		reason,
		created_at: Utc::now().to_rfc3339(),
	})
}
