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
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
	Discord,
	Game,
}

impl fmt::Display for CommandSource {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			CommandSource::Discord => write!(f, "discord"),
			CommandSource::Game => write!(f, "game"),
		}
	}
}

/// An administrative credit or debit, as published by a front-end.
/// Consumed immutably; `txn_id` is the unit of idempotence.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TxnCommand {
	#[serde(rename = "txnId")]
	pub txn_id: String,
	#[serde(rename = "userId")]
	pub user_id: String,
	pub delta: i64,
	pub actor: String,
	pub source: CommandSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(rename = "issuedAt", skip_serializing_if = "Option::is_none")]
	pub issued_at: Option<String>,
}

impl TxnCommand {
	pub fn validate(&self) -> Result<()> {
		let re = Regex::new(r"^[a-zA-Z0-9_\-:\.]{1,64}$").unwrap();
		if !re.is_match(&self.txn_id) {
			Err(ErrorKind::InvalidCommand(format!(
				"malformed txnId `{}`",
				self.txn_id
			)))?;
		}
		if !re.is_match(&self.user_id) {
			Err(ErrorKind::InvalidCommand(format!(
				"malformed userId `{}`",
				self.user_id
			)))?;
		}
		if self.delta == 0 {
			Err(ErrorKind::InvalidCommand("zero delta".to_string()))?;
		}
		Ok(())
	}
}

/// The outcome of the first successful apply of a command. Immutable once
/// created; replays of the same `txn_id` return this record unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ProcessedRecord {
	#[serde(rename = "txnId")]
	pub txn_id: String,
	pub delta: i64,
	#[serde(rename = "balanceAfter")]
	pub balance_after: i64,
	pub actor: String,
	pub source: CommandSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(rename = "processedAt")]
	pub processed_at: i64,
}

/// Per-user ledger state as persisted under `wallet:{userId}`. `balance`
/// reflects every delta ever applied, not only those still in `processed`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct WalletProfile {
	pub balance: i64,
	pub processed: Vec<ProcessedRecord>,
}

#[cfg(test)]
mod test {
	use super::*;

	fn command(txn_id: &str, user_id: &str, delta: i64) -> TxnCommand {
		TxnCommand {
			txn_id: txn_id.to_string(),
			user_id: user_id.to_string(),
			delta,
			actor: "ops".to_string(),
			source: CommandSource::Discord,
			reason: None,
			issued_at: None,
		}
	}

	#[test]
	fn accepts_well_formed_commands() {
		assert!(command("txn-1", "user_42", 10).validate().is_ok());
		assert!(command("a:b.c", "77", -3).validate().is_ok());
	}

	#[test]
	fn rejects_empty_or_odd_identifiers() {
		assert!(command("", "user", 1).validate().is_err());
		assert!(command("txn 1", "user", 1).validate().is_err());
		assert!(command("txn", "", 1).validate().is_err());
		assert!(command("txn", "user!", 1).validate().is_err());
	}

	#[test]
	fn rejects_zero_delta() {
		assert!(command("txn", "user", 0).validate().is_err());
	}

	#[test]
	fn command_wire_format_round_trips() {
		let json = r#"{"txnId":"A","userId":"U","delta":-5,"actor":"mod","source":"discord","reason":"refund"}"#;
		let command: TxnCommand = serde_json::from_str(json).unwrap();
		assert_eq!(command.txn_id, "A");
		assert_eq!(command.delta, -5);
		assert_eq!(command.source, CommandSource::Discord);
		let back: serde_json::Value = serde_json::from_str(&serde_json::to_string(&command).unwrap()).unwrap();
		assert_eq!(back["userId"], "U");
		assert_eq!(back["source"], "discord");
		assert!(back.get("issuedAt").is_none());
	}
}
