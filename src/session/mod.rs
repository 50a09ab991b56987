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

use crate::common::{Arc, Mutex, Result};
use crate::ledger::TxnCommand;
use crate::store::LedgerStore;
use std::collections::{HashMap, VecDeque};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub const LEASE_TTL_SECS: u64 = 30;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;
const ACQUIRE_RETRY_DELAY_MS: u64 = 250;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SessionState {
	Idle,
	LoadRequested,
	Owned,
	NotOwner,
	Released,
	LostLease,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Claim {
	/// This node holds the lease. An opportunistic claim must be released
	/// once the triggering command is processed.
	Owned { opportunistic: bool },
	NotOwner,
}

struct SessionEntry {
	state: SessionState,
	resident: bool,
	queue: VecDeque<TxnCommand>,
	draining: bool,
}

impl Default for SessionEntry {
	fn default() -> Self {
		Self {
			state: SessionState::Idle,
			resident: false,
			queue: VecDeque::new(),
			draining: false,
		}
	}
}

/// Per-node registry enforcing the single writer per user. Cross-node
/// exclusion comes from the store lease; within the node, each user's
/// commands drain through one FIFO queue while distinct users proceed in
/// parallel. The registry map is the explicit session/profile link; entries
/// are dropped again once a user is neither resident nor queued.
pub struct SessionRegistry {
	node_id: String,
	store: Arc<dyn LedgerStore>,
	sessions: Mutex<HashMap<String, SessionEntry>>,
	acquire_retries: u32,
}

impl SessionRegistry {
	pub fn new(node_id: &str, store: Arc<dyn LedgerStore>, acquire_retries: u32) -> Self {
		Self {
			node_id: node_id.to_string(),
			store,
			sessions: Mutex::new(HashMap::new()),
			acquire_retries,
		}
	}

	/// A resident player keeps the lease across commands until they leave.
	pub fn player_joined(&self, user_id: &str) -> Result<()> {
		{
			let mut sessions = self.sessions.lock();
			let entry = sessions.entry(user_id.to_string()).or_default();
			entry.resident = true;
			if entry.state == SessionState::Owned {
				return Ok(());
			}
			entry.state = SessionState::LoadRequested;
		}
		if self.try_acquire(user_id)? {
			self.set_state(user_id, SessionState::Owned);
			debug!("session for [{}] owned by this node", user_id);
		} else {
			self.set_state(user_id, SessionState::NotOwner);
			warn!("player [{}] joined but another node holds the session", user_id);
		}
		Ok(())
	}

	pub fn player_left(&self, user_id: &str) -> Result<()> {
		let was_owned = {
			let mut sessions = self.sessions.lock();
			match sessions.get_mut(user_id) {
				Some(entry) => {
					entry.resident = false;
					let was_owned = entry.state == SessionState::Owned;
					entry.state = SessionState::Released;
					was_owned
				}
				None => false,
			}
		};
		if was_owned {
			self.store.release_session(user_id, &self.node_id)?;
		}
		self.drop_if_idle(user_id);
		Ok(())
	}

	/// Ownership gate for a command. Resident-and-owned sessions answer
	/// immediately; otherwise an opportunistic acquisition is attempted
	/// with bounded retries before giving up for this envelope.
	pub fn claim(&self, user_id: &str) -> Result<Claim> {
		let resident = {
			let mut sessions = self.sessions.lock();
			let entry = sessions.entry(user_id.to_string()).or_default();
			if entry.state == SessionState::Owned {
				return Ok(Claim::Owned {
					opportunistic: false,
				});
			}
			entry.state = SessionState::LoadRequested;
			entry.resident
		};
		if self.try_acquire(user_id)? {
			self.set_state(user_id, SessionState::Owned);
			Ok(Claim::Owned {
				opportunistic: !resident,
			})
		} else {
			self.set_state(user_id, SessionState::NotOwner);
			if !resident {
				self.drop_if_idle(user_id);
			}
			Ok(Claim::NotOwner)
		}
	}

	pub fn release(&self, user_id: &str) -> Result<()> {
		self.store.release_session(user_id, &self.node_id)?;
		self.set_state(user_id, SessionState::Released);
		self.drop_if_idle(user_id);
		Ok(())
	}

	/// Renews every owned lease; a failed renew is a lost lease and the
	/// session is treated as released.
	pub fn heartbeat(&self) {
		let owned: Vec<String> = {
			let sessions = self.sessions.lock();
			sessions
				.iter()
				.filter(|(_, entry)| entry.state == SessionState::Owned)
				.map(|(user_id, _)| user_id.clone())
				.collect()
		};
		for user_id in owned {
			let renewed = self.store.renew_session(
				&user_id,
				&self.node_id,
				Duration::from_secs(LEASE_TTL_SECS),
			);
			match renewed {
				Ok(true) => {}
				Ok(false) => {
					warn!("lost session lease for [{}]", user_id);
					self.set_state(&user_id, SessionState::LostLease);
					self.drop_if_idle(&user_id);
				}
				Err(e) => {
					warn!("could not renew session lease for [{}]: {}", user_id, e);
					self.set_state(&user_id, SessionState::LostLease);
					self.drop_if_idle(&user_id);
				}
			}
		}
	}

	pub fn start_heartbeat(registry: Arc<SessionRegistry>) -> JoinHandle<()> {
		thread::spawn(move || loop {
			thread::sleep(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
			registry.heartbeat();
		})
	}

	/// Graceful shutdown: hand every owned lease back so other nodes can
	/// take over without waiting out the lease timeout.
	pub fn release_all(&self) {
		let owned: Vec<String> = {
			let sessions = self.sessions.lock();
			sessions
				.iter()
				.filter(|(_, entry)| entry.state == SessionState::Owned)
				.map(|(user_id, _)| user_id.clone())
				.collect()
		};
		for user_id in owned {
			if let Err(e) = self.store.release_session(&user_id, &self.node_id) {
				warn!("could not release session for [{}]: {}", user_id, e);
			}
		}
		self.sessions.lock().clear();
	}

	/// Returns true when the caller should spawn a drain worker for this
	/// user; at most one worker drains a user's queue at a time.
	pub fn enqueue(&self, command: TxnCommand) -> bool {
		let mut sessions = self.sessions.lock();
		let entry = sessions.entry(command.user_id.clone()).or_default();
		entry.queue.push_back(command);
		if entry.draining {
			false
		} else {
			entry.draining = true;
			true
		}
	}

	pub fn next_queued(&self, user_id: &str) -> Option<TxnCommand> {
		let mut sessions = self.sessions.lock();
		if let Some(entry) = sessions.get_mut(user_id) {
			if let Some(command) = entry.queue.pop_front() {
				return Some(command);
			}
			entry.draining = false;
			if !entry.resident && entry.state != SessionState::Owned {
				sessions.remove(user_id);
			}
		}
		None
	}

	fn try_acquire(&self, user_id: &str) -> Result<bool> {
		for attempt in 1..=self.acquire_retries {
			if self.store.acquire_session(
				user_id,
				&self.node_id,
				Duration::from_secs(LEASE_TTL_SECS),
			)? {
				return Ok(true);
			}
			if attempt < self.acquire_retries {
				thread::sleep(Duration::from_millis(ACQUIRE_RETRY_DELAY_MS));
			}
		}
		Ok(false)
	}

	fn set_state(&self, user_id: &str, state: SessionState) {
		let mut sessions = self.sessions.lock();
		if let Some(entry) = sessions.get_mut(user_id) {
			entry.state = state;
		}
	}

	fn drop_if_idle(&self, user_id: &str) {
		let mut sessions = self.sessions.lock();
		if let Some(entry) = sessions.get(user_id) {
			if !entry.resident && entry.queue.is_empty() && !entry.draining {
				sessions.remove(user_id);
			}
		}
	}

	#[cfg(test)]
	pub fn state_of(&self, user_id: &str) -> Option<SessionState> {
		self.sessions.lock().get(user_id).map(|entry| entry.state)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ledger::CommandSource;
	use crate::store::MemoryLedgerStore;

	fn command(txn_id: &str, user_id: &str) -> TxnCommand {
		TxnCommand {
			txn_id: txn_id.to_string(),
			user_id: user_id.to_string(),
			delta: 1,
			actor: "ops".to_string(),
			source: CommandSource::Discord,
			reason: None,
			issued_at: None,
		}
	}

	fn registry(node_id: &str, store: Arc<MemoryLedgerStore>) -> SessionRegistry {
		SessionRegistry::new(node_id, store, 1)
	}

	#[test]
	fn resident_session_claims_without_release_obligation() {
		let store = Arc::new(MemoryLedgerStore::new());
		let sessions = registry("n1", store);
		sessions.player_joined("U").unwrap();
		assert_eq!(sessions.state_of("U"), Some(SessionState::Owned));
		assert_eq!(
			sessions.claim("U").unwrap(),
			Claim::Owned {
				opportunistic: false
			}
		);
	}

	#[test]
	fn non_resident_claim_is_opportunistic() {
		let store = Arc::new(MemoryLedgerStore::new());
		let sessions = registry("n1", store);
		assert_eq!(
			sessions.claim("U").unwrap(),
			Claim::Owned {
				opportunistic: true
			}
		);
		sessions.release("U").unwrap();
		assert_eq!(sessions.state_of("U"), None);
	}

	#[test]
	fn second_node_is_not_owner_while_lease_held() {
		let store = Arc::new(MemoryLedgerStore::new());
		let n1 = registry("n1", store.clone());
		let n2 = registry("n2", store);
		n1.player_joined("U").unwrap();
		assert_eq!(n2.claim("U").unwrap(), Claim::NotOwner);
		// the skipped envelope leaves no entry behind on the loser
		assert_eq!(n2.state_of("U"), None);
	}

	#[test]
	fn leaving_releases_the_lease_to_other_nodes() {
		let store = Arc::new(MemoryLedgerStore::new());
		let n1 = registry("n1", store.clone());
		let n2 = registry("n2", store);
		n1.player_joined("U").unwrap();
		n1.player_left("U").unwrap();
		assert_eq!(n1.state_of("U"), None);
		assert_eq!(
			n2.claim("U").unwrap(),
			Claim::Owned {
				opportunistic: true
			}
		);
	}

	#[test]
	fn heartbeat_drops_sessions_whose_lease_was_taken() {
		let store = Arc::new(MemoryLedgerStore::new());
		let n1 = registry("n1", store.clone());
		n1.player_joined("U").unwrap();
		// simulate expiry plus takeover by another node
		store.release_session("U", "n1").unwrap();
		store
			.acquire_session("U", "n2", Duration::from_secs(30))
			.unwrap();
		n1.heartbeat();
		assert_eq!(n1.state_of("U"), Some(SessionState::LostLease));
	}

	#[test]
	fn release_all_frees_every_owned_lease() {
		let store = Arc::new(MemoryLedgerStore::new());
		let n1 = registry("n1", store.clone());
		let n2 = registry("n2", store.clone());
		n1.player_joined("U").unwrap();
		n1.player_joined("V").unwrap();
		n1.release_all();
		assert_eq!(n1.state_of("U"), None);
		assert!(store
			.acquire_session("U", "n2", Duration::from_secs(30))
			.unwrap());
		assert_eq!(
			n2.claim("V").unwrap(),
			Claim::Owned {
				opportunistic: true
			}
		);
	}

	#[test]
	fn queue_serializes_per_user() {
		let store = Arc::new(MemoryLedgerStore::new());
		let sessions = registry("n1", store);
		assert!(sessions.enqueue(command("A", "U")));
		assert!(!sessions.enqueue(command("B", "U")));
		assert!(sessions.enqueue(command("C", "V")));
		assert_eq!(sessions.next_queued("U").unwrap().txn_id, "A");
		assert_eq!(sessions.next_queued("U").unwrap().txn_id, "B");
		assert!(sessions.next_queued("U").is_none());
		// drained queue hands the worker role to the next enqueuer
		assert!(sessions.enqueue(command("D", "U")));
	}
}
