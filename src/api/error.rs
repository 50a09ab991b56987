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

use crate::common::Error;
use gotham::helpers::http::response::create_response;
use gotham::state::State;
use hyper::{Body, Response, StatusCode};
use std::error::Error as StdError;
use std::fmt;

/// Rejection of a sink request, carrying the status the caller should
/// see. Internal failures keep their cause for the log; everything else
/// surfaces only its message.
#[derive(Debug)]
pub struct SinkError {
	status: StatusCode,
	message: String,
	cause: Option<Error>,
}

impl SinkError {
	pub fn bad_request(message: &str) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			message: message.to_string(),
			cause: None,
		}
	}

	pub fn unauthorized(message: &str) -> Self {
		Self {
			status: StatusCode::UNAUTHORIZED,
			message: message.to_string(),
			cause: None,
		}
	}

	pub fn conflict(message: &str) -> Self {
		Self {
			status: StatusCode::CONFLICT,
			message: message.to_string(),
			cause: None,
		}
	}

	pub fn internal(cause: Error) -> Self {
		Self {
			status: StatusCode::INTERNAL_SERVER_ERROR,
			message: "Internal failure".to_string(),
			cause: Some(cause),
		}
	}

	pub fn status(&self) -> StatusCode {
		self.status
	}

	pub fn into_response(self, state: &State) -> Response<Body> {
		if let Some(ref cause) = self.cause {
			error!("sink request failed: {}", cause);
		}
		create_response(
			state,
			self.status,
			mime::APPLICATION_JSON,
			json!({ "error": self.message }).to_string(),
		)
	}
}

impl StdError for SinkError {}

impl fmt::Display for SinkError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} ({})", self.message, self.status)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::common::ErrorKind;

	#[test]
	fn statuses_match_rejection_kind() {
		assert_eq!(
			SinkError::bad_request("Missing payload").status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			SinkError::unauthorized("Invalid signature").status(),
			StatusCode::UNAUTHORIZED
		);
		assert_eq!(
			SinkError::conflict("Idempotency key conflict").status(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			SinkError::internal(ErrorKind::CorruptedRow.into()).status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
	}

	#[test]
	fn internal_errors_hide_their_cause() {
		let error = SinkError::internal(ErrorKind::CorruptedRow.into());
		assert_eq!(format!("{}", error), "Internal failure (500 Internal Server Error)");
	}
}
