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

mod fabric;
pub mod protocol;
mod types;

pub use self::fabric::{FabricPublisher, FabricSubscriber};
pub use self::types::{CloseReason, Publisher, Subscriber, SubscriptionHandler};

/// Global topic carrying administrative commands and session events.
pub const TOPIC_COMMANDS: &str = "commands";

/// Per-user topic carrying outbound state updates.
pub fn events_topic(user_id: &str) -> String {
	format!("events:{}", user_id)
}
