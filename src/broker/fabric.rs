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

use super::protocol::{Envelope, ProtocolRequest, ProtocolResponse};
use super::types::{CloseReason, Publisher, Subscriber, SubscriptionHandler};
use crate::cli_message;
use crate::common::client;
use crate::common::crypto::content_md5;
use crate::common::{Arc, ErrorKind, Mutex, Result};
use colored::Colorize;
use log::error;
use std::time::Duration;
use ws::util::Token;
use ws::{
	connect, CloseCode, Error as WsError, ErrorKind as WsErrorKind, Handler, Handshake, Message,
	Result as WsResult, Sender,
};

const KEEPALIVE_TOKEN: Token = Token(1);
const KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Publishes envelopes to fabric topics over its HTTP ingestion endpoint.
/// Each message body carries a base64 MD5 content hash; 429/5xx responses
/// are retried with backoff and any `Retry-After` hint is honored.
#[derive(Clone)]
pub struct FabricPublisher {
	api_url: String,
	timeout: Duration,
	max_retries: u32,
}

impl FabricPublisher {
	pub fn new(api_url: &str, timeout: Duration, max_retries: u32) -> Self {
		Self {
			api_url: api_url.trim_end_matches('/').to_string(),
			timeout,
			max_retries,
		}
	}
}

impl Publisher for FabricPublisher {
	fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
		let message = serde_json::to_string(envelope)?;
		let body = json!({ "message": message });
		let checksum = content_md5(serde_json::to_string(&body)?.as_bytes());
		let url = format!("{}/v1/topics/{}/messages", self.api_url, topic);
		let resp = client::request_with_retries(self.max_retries, || {
			client::post_json(&url, &[("content-md5", checksum.clone())], self.timeout, &body)
		})?;
		if !resp.is_success() {
			if resp.is_transient() {
				Err(ErrorKind::TransientFailure(format!(
					"publish to {} failed with status {}",
					topic, resp.status
				)))?;
			} else {
				Err(ErrorKind::PermanentFailure(format!(
					"publish to {} failed with status {}",
					topic, resp.status
				)))?;
			}
		}
		Ok(())
	}
}

#[derive(Clone)]
pub struct FabricSubscriber {
	ws_url: String,
	topics: Vec<String>,
	broker: FabricBroker,
}

impl FabricSubscriber {
	pub fn new(ws_url: &str, topics: Vec<String>) -> Result<Self> {
		Ok(Self {
			ws_url: ws_url.to_string(),
			topics,
			broker: FabricBroker::new()?,
		})
	}
}

impl Subscriber for FabricSubscriber {
	fn start(&mut self, handler: Box<dyn SubscriptionHandler + Send>) -> Result<()> {
		self.broker
			.subscribe(&self.ws_url, &self.topics, handler)?;
		Ok(())
	}

	fn stop(&self) {
		self.broker.stop();
	}

	fn is_running(&self) -> bool {
		self.broker.is_running()
	}
}

#[derive(Clone)]
struct FabricBroker {
	inner: Arc<Mutex<Option<Sender>>>,
}

struct ConnectionMetadata {
	retries: u32,
	connected_at_least_once: bool,
}

impl ConnectionMetadata {
	pub fn new() -> Self {
		Self {
			retries: 0,
			connected_at_least_once: false,
		}
	}
}

impl FabricBroker {
	fn new() -> Result<Self> {
		Ok(Self {
			inner: Arc::new(Mutex::new(None)),
		})
	}

	fn subscribe(
		&mut self,
		url: &str,
		topics: &[String],
		handler: Box<dyn SubscriptionHandler + Send>,
	) -> Result<()> {
		let handler = Arc::new(Mutex::new(handler));
		let url = url.to_string();
		let topics = topics.to_vec();
		let cloned_inner = self.inner.clone();
		let cloned_handler = handler.clone();
		let connection_meta_data = Arc::new(Mutex::new(ConnectionMetadata::new()));
		loop {
			let cloned_topics = topics.clone();
			let cloned_handler = cloned_handler.clone();
			let cloned_cloned_inner = cloned_inner.clone();
			let cloned_connection_meta_data = connection_meta_data.clone();
			let result = connect(url.clone(), |sender| {
				{
					let mut guard = cloned_cloned_inner.lock();
					*guard = Some(sender.clone());
				}

				FabricClient {
					sender,
					handler: cloned_handler.clone(),
					topics: cloned_topics.clone(),
					connection_meta_data: cloned_connection_meta_data.clone(),
				}
			});

			let is_stopped = cloned_inner.lock().is_none();

			if is_stopped {
				match result {
					Err(_) => handler.lock().on_close(CloseReason::Abnormal(
						ErrorKind::FabricWebsocketAbnormalTermination.into(),
					)),
					_ => handler.lock().on_close(CloseReason::Normal),
				}
				break;
			} else {
				let mut guard = connection_meta_data.lock();
				if guard.retries == 0 && guard.connected_at_least_once {
					handler.lock().on_dropped();
				}
				let secs = std::cmp::min(32, 2u64.pow(guard.retries));
				let duration = std::time::Duration::from_secs(secs);
				std::thread::sleep(duration);
				guard.retries += 1;
			}
		}
		let mut guard = cloned_inner.lock();
		*guard = None;
		Ok(())
	}

	fn stop(&self) {
		let mut guard = self.inner.lock();
		if let Some(ref sender) = *guard {
			let _ = sender.close(CloseCode::Normal);
		}
		*guard = None;
	}

	fn is_running(&self) -> bool {
		let guard = self.inner.lock();
		guard.is_some()
	}
}

struct FabricClient {
	sender: Sender,
	handler: Arc<Mutex<Box<dyn SubscriptionHandler + Send>>>,
	topics: Vec<String>,
	connection_meta_data: Arc<Mutex<ConnectionMetadata>>,
}

impl FabricClient {
	fn subscribe_topics(&self) -> Result<()> {
		for topic in &self.topics {
			let request = ProtocolRequest::Subscribe {
				topic: topic.clone(),
			};
			self.send(&request)?;
		}
		Ok(())
	}

	fn send(&self, request: &ProtocolRequest) -> Result<()> {
		let request = serde_json::to_string(&request)?;
		self.sender.send(request)?;
		Ok(())
	}
}

impl Handler for FabricClient {
	fn on_open(&mut self, _shake: Handshake) -> WsResult<()> {
		let mut guard = self.connection_meta_data.lock();

		if guard.connected_at_least_once {
			self.handler.lock().on_reestablished();
		} else {
			self.handler.lock().on_open();
			guard.connected_at_least_once = true;
		}

		guard.retries = 0;

		self.subscribe_topics()
			.map_err(|_| WsError::new(WsErrorKind::Protocol, "error subscribing to topics!"))?;
		self.sender
			.timeout(KEEPALIVE_INTERVAL_MS, KEEPALIVE_TOKEN)?;
		Ok(())
	}

	fn on_timeout(&mut self, event: Token) -> WsResult<()> {
		match event {
			KEEPALIVE_TOKEN => {
				self.sender.ping(vec![])?;
				self.sender.timeout(KEEPALIVE_INTERVAL_MS, KEEPALIVE_TOKEN)
			}
			_ => Err(WsError::new(
				WsErrorKind::Internal,
				"Invalid timeout token encountered!",
			)),
		}
	}

	fn on_message(&mut self, msg: Message) -> WsResult<()> {
		let response = match serde_json::from_str::<ProtocolResponse>(&msg.to_string()) {
			Ok(x) => x,
			Err(_) => {
				cli_message!("{} Could not parse response", "ERROR:".bright_red());
				return Ok(());
			}
		};

		match response {
			ProtocolResponse::Delivery {
				topic,
				message,
				checksum,
			} => {
				if let Some(checksum) = checksum {
					if content_md5(message.as_bytes()) != checksum {
						warn!("dropping delivery on [{}] with bad checksum", topic);
						return Ok(());
					}
				}
				match serde_json::from_str::<Envelope>(&message) {
					Ok(envelope) => self.handler.lock().on_envelope(&topic, envelope),
					Err(e) => {
						debug!("dropping undecodable delivery on [{}]: {}", topic, e);
					}
				}
			}
			ProtocolResponse::Error {
				kind: _,
				description: _,
			} => {
				cli_message!("{} {}", "ERROR:".bright_red(), response);
			}
			_ => {}
		}
		Ok(())
	}

	fn on_error(&mut self, err: WsError) {
		// Ignore connection reset errors by default
		if let WsErrorKind::Io(ref err) = err.kind {
			if let Some(104) = err.raw_os_error() {
				return;
			}
		}

		error!("{:?}", err);
	}
}
