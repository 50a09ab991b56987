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

use crate::ledger::{CommandSource, ProcessedRecord, TxnCommand};
use chrono::{TimeZone, Utc};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Serialize, Deserialize, Debug)]
pub enum ProtocolError {
	UnknownError,
	InvalidRequest,
	UnknownTopic,
	TooManySubscriptions,
}

impl Display for ProtocolError {
	fn fmt(&self, f: &mut Formatter) -> Result {
		match *self {
			ProtocolError::UnknownError => write!(f, "{}", "unknown error!"),
			ProtocolError::InvalidRequest => write!(f, "{}", "invalid request!"),
			ProtocolError::UnknownTopic => write!(f, "{}", "unknown topic!"),
			ProtocolError::TooManySubscriptions => write!(f, "{}", "too many subscriptions!"),
		}
	}
}

/// Frames a node sends to the fabric over the websocket.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ProtocolRequest {
	Subscribe { topic: String },
	Unsubscribe { topic: String },
}

impl Display for ProtocolRequest {
	fn fmt(&self, f: &mut Formatter) -> Result {
		match *self {
			ProtocolRequest::Subscribe { ref topic } => write!(
				f,
				"{} to {}",
				"Subscribe".bright_purple(),
				topic.bright_green()
			),
			ProtocolRequest::Unsubscribe { ref topic } => write!(
				f,
				"{} from {}",
				"Unsubscribe".bright_purple(),
				topic.bright_green()
			),
		}
	}
}

/// Frames the fabric sends back. `Delivery.message` is a serialized
/// envelope; `checksum`, when present, is the base64 MD5 of it.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ProtocolResponse {
	Ok,
	Error {
		kind: ProtocolError,
		description: String,
	},
	Delivery {
		topic: String,
		message: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		checksum: Option<String>,
	},
}

impl Display for ProtocolResponse {
	fn fmt(&self, f: &mut Formatter) -> Result {
		match *self {
			ProtocolResponse::Ok => write!(f, "{}", "Ok".cyan()),
			ProtocolResponse::Error {
				ref kind,
				description: _,
			} => write!(f, "{}: {}", "error".bright_red(), kind),
			ProtocolResponse::Delivery {
				ref topic,
				message: _,
				checksum: _,
			} => write!(f, "{} on {}", "Delivery".cyan(), topic.bright_green()),
		}
	}
}

/// Per-user state update event, broadcast after a successful mutation and
/// posted to the audit sink.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpdatePayload {
	#[serde(rename = "txnId")]
	pub txn_id: String,
	#[serde(rename = "userId")]
	pub user_id: String,
	pub delta: i64,
	pub balance: i64,
	pub actor: String,
	pub source: CommandSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(rename = "occurredAt")]
	pub occurred_at: String,
}

impl UpdatePayload {
	pub fn from_record(user_id: &str, record: &ProcessedRecord) -> Self {
		Self {
			txn_id: record.txn_id.clone(),
			user_id: user_id.to_string(),
			delta: record.delta,
			balance: record.balance_after,
			actor: record.actor.clone(),
			source: record.source,
			reason: record.reason.clone(),
			occurred_at: Utc.timestamp_millis(record.processed_at).to_rfc3339(),
		}
	}
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionEvent {
	#[serde(rename = "userId")]
	pub user_id: String,
}

/// Application envelopes routed over fabric topics.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
	#[serde(rename = "economy.command")]
	Command(TxnCommand),
	#[serde(rename = "economy.update")]
	Update(UpdatePayload),
	#[serde(rename = "session.join")]
	SessionJoin(SessionEvent),
	#[serde(rename = "session.leave")]
	SessionLeave(SessionEvent),
}

impl Display for Envelope {
	fn fmt(&self, f: &mut Formatter) -> Result {
		match *self {
			Envelope::Command(ref command) => write!(
				f,
				"{} [{}] for [{}]",
				"Command".bright_purple(),
				command.txn_id.bright_green(),
				command.user_id.bright_green()
			),
			Envelope::Update(ref update) => write!(
				f,
				"{} [{}] for [{}]",
				"Update".cyan(),
				update.txn_id.bright_green(),
				update.user_id.bright_green()
			),
			Envelope::SessionJoin(ref event) => write!(
				f,
				"{} [{}]",
				"Join".bright_blue(),
				event.user_id.bright_green()
			),
			Envelope::SessionLeave(ref event) => write!(
				f,
				"{} [{}]",
				"Leave".bright_blue(),
				event.user_id.bright_green()
			),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn can_parse_command_envelope() {
		let json = r#"{"type":"economy.command","payload":{"txnId":"A","userId":"U","delta":10,"actor":"mod","source":"discord"}}"#;
		match serde_json::from_str::<Envelope>(json).unwrap() {
			Envelope::Command(command) => {
				assert_eq!(command.txn_id, "A");
				assert_eq!(command.delta, 10);
			}
			_ => panic!("expected command envelope"),
		}
	}

	#[test]
	fn update_envelope_serializes_with_type_tag() {
		let update = UpdatePayload {
			txn_id: "A".to_string(),
			user_id: "U".to_string(),
			delta: 10,
			balance: 10,
			actor: "mod".to_string(),
			source: CommandSource::Game,
			reason: None,
			occurred_at: "2019-06-01T00:00:00+00:00".to_string(),
		};
		let value: serde_json::Value =
			serde_json::from_str(&serde_json::to_string(&Envelope::Update(update)).unwrap())
				.unwrap();
		assert_eq!(value["type"], "economy.update");
		assert_eq!(value["payload"]["balance"], 10);
		assert_eq!(value["payload"]["source"], "game");
		assert!(value["payload"].get("reason").is_none());
	}

	#[test]
	fn malformed_envelope_fails_decoding() {
		assert!(serde_json::from_str::<Envelope>(r#"{"type":"economy.command"}"#).is_err());
		assert!(serde_json::from_str::<Envelope>("not json").is_err());
	}

	#[test]
	fn update_payload_derives_from_record() {
		let record = ProcessedRecord {
			txn_id: "A".to_string(),
			delta: -4,
			balance_after: 6,
			actor: "mod".to_string(),
			source: CommandSource::Discord,
			reason: Some("fine".to_string()),
			processed_at: 1_560_000_000_000,
		};
		let update = UpdatePayload::from_record("U", &record);
		assert_eq!(update.balance, 6);
		assert_eq!(update.delta, -4);
		assert!(update.occurred_at.starts_with("2019-06-08T"));
	}
}
