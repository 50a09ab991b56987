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

use failure::Fail;

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	#[fail(display = "Ring capacity must be positive")]
	InvalidRingCapacity,
	#[fail(display = "Invalid transaction command: {}", 0)]
	InvalidCommand(String),
	#[fail(display = "Version conflict on conditional write")]
	VersionConflict,
	#[fail(display = "{}", 0)]
	TransientFailure(String),
	#[fail(display = "{}", 0)]
	PermanentFailure(String),
	#[fail(display = "Request to {} timed out", 0)]
	RequestTimeout(String),
	#[fail(display = "Could not parse '{}' to a url", 0)]
	UrlParsingError(String),
	#[fail(display = "Fabric websocket terminated unexpectedly")]
	FabricWebsocketAbnormalTermination,
	#[fail(display = "Corrupted store entry for '{}'", 0)]
	CorruptedEntry(String),
	#[fail(display = "Corrupted audit row")]
	CorruptedRow,
	#[fail(display = "Missing configuration value for `{}`!", 0)]
	ConfigMissingValue(String),
	#[fail(display = "could not load config!")]
	LoadConfig,
	#[fail(display = "{}", 0)]
	GenericError(String),
}
