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

use crate::broker::protocol::{Envelope, UpdatePayload};
use crate::broker::{events_topic, Publisher};
use crate::common::Result;

/// Publishes `economy.update` events to the user's topic after a
/// successful mutation. Best-effort: by the time this runs the profile is
/// already durable, so the next reader observes the new balance either way.
pub struct UpdateEmitter {
	publisher: Box<dyn Publisher>,
}

impl UpdateEmitter {
	pub fn new(publisher: Box<dyn Publisher>) -> Self {
		Self { publisher }
	}

	pub fn broadcast(&self, update: &UpdatePayload) -> Result<()> {
		self.publisher.publish(
			&events_topic(&update.user_id),
			&Envelope::Update(update.clone()),
		)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ledger::CommandSource;
	use parking_lot::Mutex;
	use std::sync::Arc;

	pub struct RecordingPublisher {
		pub published: Arc<Mutex<Vec<(String, Envelope)>>>,
	}

	impl Publisher for RecordingPublisher {
		fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
			self.published
				.lock()
				.push((topic.to_string(), envelope.clone()));
			Ok(())
		}
	}

	fn update(txn_id: &str, user_id: &str) -> UpdatePayload {
		UpdatePayload {
			txn_id: txn_id.to_string(),
			user_id: user_id.to_string(),
			delta: 10,
			balance: 10,
			actor: "ops".to_string(),
			source: CommandSource::Discord,
			reason: None,
			occurred_at: "2019-06-08T13:20:00+00:00".to_string(),
		}
	}

	#[test]
	fn broadcasts_to_the_user_topic() {
		let published = Arc::new(Mutex::new(Vec::new()));
		let emitter = UpdateEmitter::new(Box::new(RecordingPublisher {
			published: published.clone(),
		}));
		emitter.broadcast(&update("A", "U")).unwrap();
		let published = published.lock();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].0, "events:U");
		match &published[0].1 {
			Envelope::Update(update) => assert_eq!(update.txn_id, "A"),
			_ => panic!("expected update envelope"),
		}
	}
}
