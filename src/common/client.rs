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

use super::{Error, ErrorKind, Result};
use futures::{Future, Stream};
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Request};
use hyper_rustls::HttpsConnector;
use rand::{thread_rng, Rng};
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::timer::Timeout;

const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_JITTER_MS: u64 = 100;

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub struct HttpResponse {
	pub status: u16,
	pub retry_after: Option<Duration>,
	pub body: Vec<u8>,
}

impl HttpResponse {
	pub fn is_success(&self) -> bool {
		self.status >= 200 && self.status < 300
	}

	/// 429 and 5xx are worth another attempt; everything else is final.
	pub fn is_transient(&self) -> bool {
		self.status == 429 || self.status >= 500
	}
}

pub fn post_json<IN>(
	url: &str,
	headers: &[(&'static str, String)],
	timeout: Duration,
	input: &IN,
) -> Result<HttpResponse>
where
	IN: Serialize,
{
	let body = serde_json::to_string(input)?;
	let req = build_request("POST", url, headers, Some(body))?;
	send(req, url, timeout)
}

pub fn get(url: &str, headers: &[(&'static str, String)], timeout: Duration) -> Result<HttpResponse> {
	let req = build_request("GET", url, headers, None)?;
	send(req, url, timeout)
}

fn build_request(
	method: &str,
	url: &str,
	headers: &[(&'static str, String)],
	body: Option<String>,
) -> Result<Request<Body>> {
	let uri: hyper::Uri = url
		.parse()
		.map_err(|_| ErrorKind::UrlParsingError(url.to_owned()))?;
	let mut builder = Request::builder();
	builder.method(method).uri(uri);
	builder.header(CONTENT_TYPE, "application/json");
	for (name, value) in headers {
		builder.header(*name, value.as_str());
	}
	let body = match body {
		Some(body) => Body::from(body),
		None => Body::empty(),
	};
	builder
		.body(body)
		.map_err(|e| ErrorKind::GenericError(format!("could not build request: {}", e)).into())
}

fn send(req: Request<Body>, url: &str, timeout: Duration) -> Result<HttpResponse> {
	let https = HttpsConnector::new(1);
	let client = Client::builder().build::<_, Body>(https);
	let task = client.request(req).and_then(|resp| {
		let status = resp.status().as_u16();
		let retry_after = resp
			.headers()
			.get("retry-after")
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.trim().parse::<u64>().ok())
			.map(Duration::from_secs);
		resp.into_body().concat2().map(move |body| HttpResponse {
			status,
			retry_after,
			body: body.to_vec(),
		})
	});
	let task = Timeout::new(task, timeout);

	let mut runtime = Runtime::new()?;
	runtime.block_on(task).map_err(|e| -> Error {
		if e.is_elapsed() {
			ErrorKind::RequestTimeout(url.to_owned()).into()
		} else {
			match e.into_inner() {
				Some(e) => {
					ErrorKind::TransientFailure(format!("request to {} failed: {}", url, e)).into()
				}
				None => ErrorKind::TransientFailure(format!("request to {} failed", url)).into(),
			}
		}
	})
}

/// Exponential backoff, base 250 ms doubling per attempt, plus uniform
/// jitter from [0, 100 ms).
pub fn backoff_delay(attempt: u32) -> Duration {
	let shift = attempt.saturating_sub(1).min(10);
	let base = BACKOFF_BASE_MS << shift;
	Duration::from_millis(base + thread_rng().gen_range(0, BACKOFF_JITTER_MS))
}

/// Drives `request` up to `max_retries` attempts, sleeping between
/// transient failures. A server-advertised `Retry-After` overrides the
/// computed wait. The final response or error is returned as observed.
pub fn request_with_retries<F>(max_retries: u32, mut request: F) -> Result<HttpResponse>
where
	F: FnMut() -> Result<HttpResponse>,
{
	let mut attempt = 0;
	loop {
		attempt += 1;
		match request() {
			Ok(ref resp) if resp.is_transient() && attempt < max_retries => {
				let wait = resp.retry_after.unwrap_or_else(|| backoff_delay(attempt));
				thread::sleep(wait);
			}
			Ok(resp) => return Ok(resp),
			Err(e) => {
				if attempt >= max_retries || !is_transient_error(&e) {
					return Err(e);
				}
				thread::sleep(backoff_delay(attempt));
			}
		}
	}
}

pub fn is_transient_error(e: &Error) -> bool {
	match e.downcast_ref::<ErrorKind>() {
		Some(ErrorKind::TransientFailure(_)) | Some(ErrorKind::RequestTimeout(_)) => true,
		_ => false,
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn response(status: u16, retry_after: Option<Duration>) -> HttpResponse {
		HttpResponse {
			status,
			retry_after,
			body: vec![],
		}
	}

	#[test]
	fn backoff_doubles_with_bounded_jitter() {
		for (attempt, base) in vec![(1u32, 250u64), (2, 500), (3, 1000), (4, 2000)] {
			let delay = backoff_delay(attempt).as_millis() as u64;
			assert!(delay >= base && delay < base + 100, "attempt {}", attempt);
		}
	}

	#[test]
	fn retries_stop_on_success() {
		let mut calls = 0;
		let resp = request_with_retries(4, || {
			calls += 1;
			Ok(response(if calls < 3 { 500 } else { 200 }, Some(Duration::from_millis(1))))
		})
		.unwrap();
		assert_eq!(calls, 3);
		assert_eq!(resp.status, 200);
	}

	#[test]
	fn permanent_status_is_not_retried() {
		let mut calls = 0;
		let resp = request_with_retries(4, || {
			calls += 1;
			Ok(response(404, None))
		})
		.unwrap();
		assert_eq!(calls, 1);
		assert_eq!(resp.status, 404);
	}

	#[test]
	fn retry_budget_is_bounded() {
		let mut calls = 0;
		let resp = request_with_retries(4, || {
			calls += 1;
			Ok(response(429, Some(Duration::from_millis(1))))
		})
		.unwrap();
		assert_eq!(calls, 4);
		assert_eq!(resp.status, 429);
	}
}
