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

use super::client::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use super::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const LEDGER713_HOME: &str = ".ledger713";
const LEDGER713_DEFAULT_CONFIG_FILENAME: &str = "ledger713.toml";

const DEFAULT_CONFIG: &str = r#"
	ledger713_data_path = "ledger713_data"
	store_backend = "fabric"
"#;

/// Bridge configuration. Every value can come from the TOML config file or
/// from a `LEDGER713_*` environment variable; the environment wins. Values
/// required by an enabled role must be present at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ledger713Config {
	pub ledger713_data_path: String,
	pub node: Option<bool>,
	pub sink: Option<bool>,
	pub node_id: Option<String>,
	pub fabric_ws_url: Option<String>,
	pub fabric_api_url: Option<String>,
	pub store_backend: Option<String>,
	pub store_api_url: Option<String>,
	pub audit_api_url: Option<String>,
	pub hmac_secret: Option<String>,
	pub sink_listen_address: Option<String>,
	pub max_retries: Option<u32>,
	pub http_timeout_secs: Option<u64>,
	pub command_max_age_secs: Option<u64>,
	#[serde(skip)]
	pub config_home: Option<String>,
}

impl Ledger713Config {
	pub fn exists(config_path: Option<&str>) -> Result<bool> {
		let default_path_buf = Ledger713Config::default_config_path()?;
		let default_path = default_path_buf.to_str().unwrap();
		let config_path = config_path.unwrap_or(default_path);
		Ok(Path::new(config_path).exists())
	}

	pub fn from_file(config_path: Option<&str>) -> Result<Ledger713Config> {
		let default_path_buf = Ledger713Config::default_config_path()?;
		let default_path = default_path_buf.to_str().unwrap();
		let config_path = config_path.unwrap_or(default_path);
		let mut file = File::open(config_path)?;
		let mut toml_str = String::new();
		file.read_to_string(&mut toml_str)?;
		let mut config: Ledger713Config =
			toml::from_str(&toml_str[..]).map_err(|_| ErrorKind::LoadConfig)?;
		config.config_home = Some(config_path.to_string());
		config.apply_env_overrides();
		Ok(config)
	}

	pub fn default_config_path() -> Result<PathBuf> {
		let mut path = Ledger713Config::default_home_path()?;
		path.push(LEDGER713_DEFAULT_CONFIG_FILENAME);
		Ok(path)
	}

	pub fn default_home_path() -> Result<PathBuf> {
		let mut path = match dirs::home_dir() {
			Some(home) => home,
			None => env::current_dir()?,
		};
		path.push(LEDGER713_HOME);
		std::fs::create_dir_all(path.as_path())?;
		Ok(path)
	}

	pub fn default() -> Result<Ledger713Config> {
		let mut config: Ledger713Config =
			toml::from_str(DEFAULT_CONFIG).map_err(|_| ErrorKind::LoadConfig)?;
		config.apply_env_overrides();
		Ok(config)
	}

	/// `LEDGER713_*` environment variables override file values.
	pub fn apply_env_overrides(&mut self) {
		if let Some(v) = env_var("LEDGER713_DATA_PATH") {
			self.ledger713_data_path = v;
		}
		if let Some(v) = env_var("LEDGER713_NODE_ID") {
			self.node_id = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_FABRIC_WS_URL") {
			self.fabric_ws_url = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_FABRIC_API_URL") {
			self.fabric_api_url = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_STORE_BACKEND") {
			self.store_backend = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_STORE_API_URL") {
			self.store_api_url = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_AUDIT_API_URL") {
			self.audit_api_url = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_HMAC_SECRET") {
			self.hmac_secret = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_SINK_LISTEN_ADDRESS") {
			self.sink_listen_address = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_MAX_RETRIES").and_then(|v| v.parse().ok()) {
			self.max_retries = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
			self.http_timeout_secs = Some(v);
		}
		if let Some(v) = env_var("LEDGER713_COMMAND_MAX_AGE_SECS").and_then(|v| v.parse().ok()) {
			self.command_max_age_secs = Some(v);
		}
	}

	/// Fail fast on anything an enabled role cannot run without.
	pub fn check(&self, node_enabled: bool, sink_enabled: bool) -> Result<()> {
		if node_enabled {
			require_url(&self.fabric_ws_url, "fabric_ws_url")?;
			require_url(&self.fabric_api_url, "fabric_api_url")?;
			require_url(&self.audit_api_url, "audit_api_url")?;
			require(&self.hmac_secret, "hmac_secret")?;
			if self.store_backend() != "memory" {
				require_url(&self.store_api_url, "store_api_url")?;
			}
		}
		if sink_enabled {
			require(&self.hmac_secret, "hmac_secret")?;
		}
		Ok(())
	}

	pub fn node(&self) -> bool {
		self.node.unwrap_or(false)
	}

	pub fn sink(&self) -> bool {
		self.sink.unwrap_or(false)
	}

	/// Stable for the lifetime of the process; generated once when the
	/// config does not pin one.
	pub fn resolve_node_id(&mut self) -> String {
		match self.node_id.clone() {
			Some(id) => id,
			None => {
				let id = Uuid::new_v4().to_string();
				self.node_id = Some(id.clone());
				id
			}
		}
	}

	pub fn store_backend(&self) -> String {
		self.store_backend
			.clone()
			.unwrap_or_else(|| "fabric".to_string())
	}

	pub fn fabric_ws_url(&self) -> Result<String> {
		required_value(&self.fabric_ws_url, "fabric_ws_url")
	}

	pub fn fabric_api_url(&self) -> Result<String> {
		required_value(&self.fabric_api_url, "fabric_api_url")
	}

	pub fn store_api_url(&self) -> Result<String> {
		required_value(&self.store_api_url, "store_api_url")
	}

	pub fn audit_api_url(&self) -> Result<String> {
		required_value(&self.audit_api_url, "audit_api_url")
	}

	pub fn hmac_secret(&self) -> Result<String> {
		required_value(&self.hmac_secret, "hmac_secret")
	}

	pub fn sink_listen_address(&self) -> String {
		self.sink_listen_address
			.clone()
			.unwrap_or_else(|| String::from("127.0.0.1:7430"))
	}

	pub fn max_retries(&self) -> u32 {
		self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
	}

	pub fn http_timeout(&self) -> Duration {
		Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
	}

	pub fn command_max_age(&self) -> Option<Duration> {
		self.command_max_age_secs.map(Duration::from_secs)
	}

	pub fn get_data_path(&self) -> Result<PathBuf> {
		let mut data_path = PathBuf::new();
		data_path.push(self.ledger713_data_path.clone());
		if data_path.is_absolute() {
			return Ok(data_path);
		}

		let mut data_path = PathBuf::new();
		data_path.push(
			self.config_home
				.clone()
				.unwrap_or(LEDGER713_DEFAULT_CONFIG_FILENAME.to_string()),
		);
		data_path.pop();
		data_path.push(self.ledger713_data_path.clone());
		Ok(data_path)
	}
}

fn env_var(name: &str) -> Option<String> {
	env::var(name).ok().filter(|v| !v.is_empty())
}

fn require(value: &Option<String>, name: &str) -> Result<()> {
	match value {
		Some(ref v) if !v.is_empty() => Ok(()),
		_ => Err(ErrorKind::ConfigMissingValue(name.to_string()).into()),
	}
}

fn require_url(value: &Option<String>, name: &str) -> Result<()> {
	require(value, name)?;
	let value = value.as_ref().unwrap();
	Url::parse(value).map_err(|_| ErrorKind::UrlParsingError(value.clone()))?;
	Ok(())
}

fn required_value(value: &Option<String>, name: &str) -> Result<String> {
	match value {
		Some(ref v) if !v.is_empty() => Ok(v.clone()),
		_ => Err(ErrorKind::ConfigMissingValue(name.to_string()).into()),
	}
}

impl fmt::Display for Ledger713Config {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"ledger713_data_path={}\nstore_backend={}\nfabric_api_url={}\nstore_api_url={}\naudit_api_url={}\nhmac_secret={}",
			self.ledger713_data_path,
			self.store_backend(),
			self.fabric_api_url.clone().unwrap_or(String::from("not set")),
			self.store_api_url.clone().unwrap_or(String::from("not set")),
			self.audit_api_url.clone().unwrap_or(String::from("not set")),
			"{...}"
		)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn base_config() -> Ledger713Config {
		let mut config = Ledger713Config::default().unwrap();
		config.fabric_ws_url = Some("wss://fabric.example:7720".to_string());
		config.fabric_api_url = Some("https://fabric.example".to_string());
		config.store_api_url = Some("https://store.example".to_string());
		config.audit_api_url = Some("https://audit.example".to_string());
		config.hmac_secret = Some("secret".to_string());
		config
	}

	#[test]
	fn complete_config_passes_checks() {
		let config = base_config();
		assert!(config.check(true, true).is_ok());
	}

	#[test]
	fn missing_secret_fails_fast() {
		let mut config = base_config();
		config.hmac_secret = None;
		assert!(config.check(false, true).is_err());
		assert!(config.check(true, false).is_err());
	}

	#[test]
	fn malformed_urls_fail_fast() {
		let mut config = base_config();
		config.fabric_api_url = Some("not a url".to_string());
		assert!(config.check(true, false).is_err());
	}

	#[test]
	fn memory_backend_does_not_require_store_url() {
		let mut config = base_config();
		config.store_backend = Some("memory".to_string());
		config.store_api_url = None;
		assert!(config.check(true, false).is_ok());
	}

	#[test]
	fn node_id_is_stable_once_resolved() {
		let mut config = base_config();
		let id = config.resolve_node_id();
		assert_eq!(id, config.resolve_node_id());
	}

	#[test]
	fn defaults_cover_tunables() {
		let config = Ledger713Config::default().unwrap();
		assert_eq!(config.max_retries(), 4);
		assert_eq!(config.http_timeout(), Duration::from_secs(10));
		assert_eq!(config.sink_listen_address(), "127.0.0.1:7430");
		assert_eq!(config.command_max_age(), None);
	}
}
