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

use crate::api::handlers;
use crate::audit::AuditSink;
use crate::common::Arc;
use gotham::handler::HandlerFuture;
use gotham::middleware::{Middleware, NewMiddleware};
use gotham::pipeline::new_pipeline;
use gotham::pipeline::single::single_pipeline;
use gotham::router::builder::*;
use gotham::router::Router;
use gotham::state::State;
use std::panic::RefUnwindSafe;

/// Shared sink state injected into every request.
#[derive(Clone, StateData)]
pub struct SinkApi {
	pub sink: Arc<AuditSink>,
	pub secret: Vec<u8>,
}

pub struct SinkMiddleware {
	api: SinkApi,
}

impl RefUnwindSafe for SinkMiddleware {}

impl SinkMiddleware {
	fn new(api: SinkApi) -> Self {
		Self { api }
	}
}

impl Middleware for SinkMiddleware {
	fn call<Chain>(self, mut state: State, chain: Chain) -> Box<HandlerFuture>
	where
		Chain: FnOnce(State) -> Box<HandlerFuture>,
	{
		state.put(self.api);
		chain(state)
	}
}

impl NewMiddleware for SinkMiddleware {
	type Instance = Self;

	fn new_middleware(&self) -> std::io::Result<Self::Instance> {
		Ok(Self {
			api: self.api.clone(),
		})
	}
}

pub fn build_sink_api_router(api: SinkApi) -> Router {
	let (chain, pipelines) = single_pipeline(new_pipeline().add(SinkMiddleware::new(api)).build());

	build_router(chain, pipelines, |route| {
		route.post("/log/transactions").to(handlers::ingest_transaction);
		route
			.get("/log/transactions")
			.with_query_string_extractor::<handlers::TransactionsQueryParams>()
			.to(handlers::list_transactions);
		route.get("/health").to(handlers::health);
	})
}
