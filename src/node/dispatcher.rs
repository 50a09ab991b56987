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

use super::emitter::UpdateEmitter;
use crate::audit::AuditClient;
use crate::broker::protocol::{Envelope, UpdatePayload};
use crate::broker::{CloseReason, SubscriptionHandler, TOPIC_COMMANDS};
use crate::cli_message;
use crate::common::{Arc, Result};
use crate::ledger::TxnCommand;
use crate::session::{Claim, SessionRegistry};
use crate::store::{MutateOutcome, ProfileMutator};
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::thread;
use std::time::Duration;

/// Per-node runtime wiring the dispatcher pipeline together: session
/// ownership, the idempotent mutator, the update broadcast and the audit
/// webhook.
pub struct Node {
	pub sessions: Arc<SessionRegistry>,
	mutator: ProfileMutator,
	emitter: UpdateEmitter,
	audit: AuditClient,
	command_max_age: Option<Duration>,
}

impl Node {
	pub fn new(
		sessions: Arc<SessionRegistry>,
		mutator: ProfileMutator,
		emitter: UpdateEmitter,
		audit: AuditClient,
		command_max_age: Option<Duration>,
	) -> Self {
		Self {
			sessions,
			mutator,
			emitter,
			audit,
			command_max_age,
		}
	}

	/// Freshness window over the optional `issuedAt` field. Commands
	/// without the field always pass.
	pub fn is_stale(&self, command: &TxnCommand) -> bool {
		let max_age = match self.command_max_age {
			Some(max_age) => max_age,
			None => return false,
		};
		let issued_at = match command.issued_at.as_ref() {
			Some(issued_at) => issued_at,
			None => return false,
		};
		match DateTime::parse_from_rfc3339(issued_at) {
			Ok(issued_at) => {
				let age = Utc::now().signed_duration_since(issued_at.with_timezone(&Utc));
				age.num_seconds() > max_age.as_secs() as i64
			}
			Err(_) => false,
		}
	}

	pub fn handle_command(&self, command: TxnCommand) {
		if let Err(e) = self.process_command(&command) {
			error!(
				"failed processing transaction [{}] for [{}]: {}",
				command.txn_id, command.user_id, e
			);
		}
	}

	fn process_command(&self, command: &TxnCommand) -> Result<()> {
		let opportunistic = match self.sessions.claim(&command.user_id)? {
			Claim::NotOwner => {
				debug!(
					"not the session owner for [{}], skipping transaction [{}]",
					command.user_id, command.txn_id
				);
				return Ok(());
			}
			Claim::Owned { opportunistic } => opportunistic,
		};

		let result = self.run_mutation(command);

		if opportunistic {
			if let Err(e) = self.sessions.release(&command.user_id) {
				warn!("could not release session for [{}]: {}", command.user_id, e);
			}
		}
		result
	}

	fn run_mutation(&self, command: &TxnCommand) -> Result<()> {
		match self.mutator.apply_command(command)? {
			MutateOutcome::Applied { balance, record } => {
				cli_message!(
					"transaction [{}] applied for [{}], balance now [{}]",
					record.txn_id.bright_green(),
					command.user_id.bright_green(),
					balance.to_string().bright_green()
				);
				let update = UpdatePayload::from_record(&command.user_id, &record);
				if let Err(e) = self.emitter.broadcast(&update) {
					warn!(
						"could not broadcast update for [{}]: {}",
						command.user_id, e
					);
				}
				if let Err(e) = self.audit.post_transaction(&update) {
					warn!(
						"could not deliver audit webhook for [{}]: {}",
						record.txn_id, e
					);
				}
			}
			MutateOutcome::Replayed { record, .. } => {
				debug!(
					"transaction [{}] already processed for [{}], skipping side effects",
					record.txn_id, command.user_id
				);
			}
		}
		Ok(())
	}
}

/// Subscription handler feeding the per-user queues. Every decoded command
/// is serialized through its user's queue; one worker thread drains a
/// user's queue at a time while distinct users proceed in parallel.
pub struct Controller {
	node: Arc<Node>,
}

impl Controller {
	pub fn new(node: Arc<Node>) -> Self {
		Self { node }
	}
}

impl SubscriptionHandler for Controller {
	fn on_open(&self) {
		cli_message!("fabric listener started");
	}

	fn on_envelope(&self, topic: &str, envelope: Envelope) {
		match envelope {
			Envelope::Command(command) => {
				if topic != TOPIC_COMMANDS {
					debug!("ignoring command envelope on topic [{}]", topic);
					return;
				}
				if let Err(e) = command.validate() {
					debug!("discarding envelope: {}", e);
					return;
				}
				if self.node.is_stale(&command) {
					debug!(
						"discarding stale transaction [{}] for [{}]",
						command.txn_id, command.user_id
					);
					return;
				}
				let user_id = command.user_id.clone();
				if self.node.sessions.enqueue(command) {
					let node = self.node.clone();
					thread::spawn(move || {
						while let Some(command) = node.sessions.next_queued(&user_id) {
							node.handle_command(command);
						}
					});
				}
			}
			Envelope::SessionJoin(event) => {
				let node = self.node.clone();
				thread::spawn(move || {
					if let Err(e) = node.sessions.player_joined(&event.user_id) {
						warn!("could not open session for [{}]: {}", event.user_id, e);
					}
				});
			}
			Envelope::SessionLeave(event) => {
				let node = self.node.clone();
				thread::spawn(move || {
					if let Err(e) = node.sessions.player_left(&event.user_id) {
						warn!("could not close session for [{}]: {}", event.user_id, e);
					}
				});
			}
			Envelope::Update(_) => {
				// nodes publish updates, they never consume them
			}
		}
	}

	fn on_close(&self, reason: CloseReason) {
		match reason {
			CloseReason::Normal => cli_message!("fabric listener stopped"),
			CloseReason::Abnormal(_) => cli_message!(
				"{}: fabric listener stopped unexpectedly",
				"ERROR".bright_red()
			),
		}
	}

	fn on_dropped(&self) {
		cli_message!("{}: fabric listener lost connection. it will keep trying to restore connection in the background.", "WARNING".bright_yellow())
	}

	fn on_reestablished(&self) {
		cli_message!(
			"{}: fabric listener reestablished connection.",
			"INFO".bright_blue()
		)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::broker::Publisher;
	use crate::common::Mutex;
	use crate::ledger::{CommandSource, RING_CAPACITY};
	use crate::store::{LedgerStore, MemoryLedgerStore};

	struct RecordingPublisher {
		published: Arc<Mutex<Vec<(String, Envelope)>>>,
	}

	impl Publisher for RecordingPublisher {
		fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
			self.published
				.lock()
				.push((topic.to_string(), envelope.clone()));
			Ok(())
		}
	}

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

	fn node_over(
		store: Arc<MemoryLedgerStore>,
		node_id: &str,
	) -> (Node, Arc<Mutex<Vec<(String, Envelope)>>>) {
		let published = Arc::new(Mutex::new(Vec::new()));
		let sessions = Arc::new(SessionRegistry::new(node_id, store.clone(), 1));
		let mutator = ProfileMutator::new(store, 4);
		let emitter = UpdateEmitter::new(Box::new(RecordingPublisher {
			published: published.clone(),
		}));
		// port 9 is discard; the webhook warning path is non-fatal by design
		let audit = AuditClient::new(
			"http://127.0.0.1:9",
			"secret",
			node_id,
			Duration::from_millis(100),
			1,
		);
		let node = Node::new(sessions, mutator, emitter, audit, None);
		(node, published)
	}

	#[test]
	fn credit_applies_and_broadcasts() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (node, published) = node_over(store.clone(), "n1");
		node.handle_command(command("A", "U", 10));
		let profile = store.read_profile("U").unwrap().profile.unwrap();
		assert_eq!(profile.balance, 10);
		let published = published.lock();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].0, "events:U");
	}

	#[test]
	fn replay_skips_side_effects() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (node, published) = node_over(store.clone(), "n1");
		node.handle_command(command("A", "U", 10));
		node.handle_command(command("A", "U", 10));
		let profile = store.read_profile("U").unwrap().profile.unwrap();
		assert_eq!(profile.balance, 10);
		assert_eq!(profile.processed.len(), 1);
		assert_eq!(published.lock().len(), 1);
	}

	#[test]
	fn opportunistic_session_is_released_after_command() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (node, _) = node_over(store.clone(), "n1");
		node.handle_command(command("A", "U", 10));
		// lease free again: another node can claim it
		assert!(store
			.acquire_session("U", "n2", Duration::from_secs(30))
			.unwrap());
	}

	#[test]
	fn contending_node_applies_exactly_once() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (n1, _) = node_over(store.clone(), "n1");
		let (n2, published2) = node_over(store.clone(), "n2");
		n1.sessions.player_joined("U").unwrap();

		// both nodes observe the same command; only the resident owner applies
		n1.handle_command(command("A", "U", 10));
		n2.handle_command(command("A", "U", 10));

		let profile = store.read_profile("U").unwrap().profile.unwrap();
		assert_eq!(profile.balance, 10);
		assert_eq!(profile.processed.len(), 1);
		assert_eq!(published2.lock().len(), 0);
	}

	#[test]
	fn ring_eviction_boundary_reapplies() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (node, _) = node_over(store.clone(), "n1");
		for i in 1..=(RING_CAPACITY as i64 + 1) {
			node.handle_command(command(&format!("T{}", i), "U", 1));
		}
		node.handle_command(command("T1", "U", 1));
		let profile = store.read_profile("U").unwrap().profile.unwrap();
		assert_eq!(profile.balance, RING_CAPACITY as i64 + 2);
	}

	#[test]
	fn stale_commands_are_detected_only_with_window() {
		let store = Arc::new(MemoryLedgerStore::new());
		let (node, _) = node_over(store, "n1");
		let mut old = command("A", "U", 10);
		old.issued_at = Some("2019-01-01T00:00:00+00:00".to_string());
		assert!(!node.is_stale(&old));

		let sessions = node.sessions.clone();
		let store = Arc::new(MemoryLedgerStore::new());
		let windowed = Node::new(
			sessions,
			ProfileMutator::new(store.clone(), 4),
			UpdateEmitter::new(Box::new(RecordingPublisher {
				published: Arc::new(Mutex::new(Vec::new())),
			})),
			AuditClient::new("http://127.0.0.1:9", "s", "n1", Duration::from_millis(100), 1),
			Some(Duration::from_secs(300)),
		);
		assert!(windowed.is_stale(&old));
		let mut fresh = command("B", "U", 10);
		fresh.issued_at = Some(Utc::now().to_rfc3339());
		assert!(!windowed.is_stale(&fresh));
	}
}
