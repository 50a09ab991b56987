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

use super::protocol::Envelope;
use crate::common::{Error, Result};

pub enum CloseReason {
	Normal,
	Abnormal(Error),
}

/// Typed publish onto a fabric topic. Implementations are shared across
/// tasks and must be concurrency-safe.
pub trait Publisher: Send + Sync {
	fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()>;
}

/// Subscription over the fabric. `start` blocks on the connection loop
/// until `stop` is called.
pub trait Subscriber {
	fn start(&mut self, handler: Box<dyn SubscriptionHandler + Send>) -> Result<()>;
	fn stop(&self);
	fn is_running(&self) -> bool;
}

/// Delivery is at-least-once and unordered across users; handlers dedupe
/// through the ledger ring, never through the transport.
pub trait SubscriptionHandler: Send {
	fn on_open(&self);
	fn on_envelope(&self, topic: &str, envelope: Envelope);
	fn on_close(&self, reason: CloseReason);
	fn on_dropped(&self);
	fn on_reestablished(&self);
}
