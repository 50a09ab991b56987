#[macro_use]
extern crate clap;
#[macro_use]
extern crate gotham_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_json;

use clap::{App, Arg, ArgMatches};
use colored::*;
use std::io::BufRead;
use std::thread;
use std::thread::JoinHandle;

#[macro_use]
mod common;
mod api;
mod audit;
mod broker;
mod ledger;
mod node;
mod session;
mod storage;
mod store;

use api::router::{build_sink_api_router, SinkApi};
use audit::{AuditClient, AuditSink};
use broker::{FabricPublisher, FabricSubscriber, Subscriber, TOPIC_COMMANDS};
use common::config::Ledger713Config;
use common::{Arc, Result, RuntimeMode};
use node::{Controller, Node, UpdateEmitter};
use session::SessionRegistry;
use store::{FabricLedgerStore, LedgerStore, MemoryLedgerStore, ProfileMutator};

const WELCOME_HEADER: &str = r#"
Welcome to ledger713
"#;

struct NodeHandle {
	subscriber: FabricSubscriber,
	sessions: Arc<SessionRegistry>,
	handle: JoinHandle<()>,
}

fn welcome(args: &ArgMatches, runtime_mode: &RuntimeMode) -> Result<Ledger713Config> {
	unsafe {
		common::set_runtime_mode(runtime_mode);
	};

	let config_path = args.value_of("config-path");
	let config = if Ledger713Config::exists(config_path)? {
		Ledger713Config::from_file(config_path)?
	} else {
		Ledger713Config::default()?
	};
	Ok(config)
}

fn start_sink(config: &Ledger713Config) -> Result<JoinHandle<()>> {
	let sink = Arc::new(AuditSink::new(&config.get_data_path()?)?);
	let api = SinkApi {
		sink,
		secret: config.hmac_secret()?.into_bytes(),
	};
	let router = build_sink_api_router(api);
	let address = config.sink_listen_address();
	cli_message!(
		"starting audit sink api on [{}]",
		address.bright_green()
	);
	Ok(thread::spawn(move || {
		gotham::start(address, router);
	}))
}

fn start_node(config: &Ledger713Config, node_id: &str) -> Result<NodeHandle> {
	let store: Arc<dyn LedgerStore> = match config.store_backend().as_str() {
		"memory" => Arc::new(MemoryLedgerStore::new()),
		_ => Arc::new(FabricLedgerStore::new(
			&config.store_api_url()?,
			config.http_timeout(),
			config.max_retries(),
		)),
	};

	let sessions = Arc::new(SessionRegistry::new(
		node_id,
		store.clone(),
		config.max_retries(),
	));
	SessionRegistry::start_heartbeat(sessions.clone());

	let publisher = FabricPublisher::new(
		&config.fabric_api_url()?,
		config.http_timeout(),
		config.max_retries(),
	);
	let mutator = ProfileMutator::new(store, config.max_retries());
	let emitter = UpdateEmitter::new(Box::new(publisher));
	let audit = AuditClient::new(
		&config.audit_api_url()?,
		&config.hmac_secret()?,
		node_id,
		config.http_timeout(),
		config.max_retries(),
	);
	let node = Arc::new(Node::new(
		sessions.clone(),
		mutator,
		emitter,
		audit,
		config.command_max_age(),
	));

	let subscriber =
		FabricSubscriber::new(&config.fabric_ws_url()?, vec![TOPIC_COMMANDS.to_string()])?;
	cli_message!(
		"starting fabric listener for node [{}]",
		node_id.bright_green()
	);
	let mut cloned_subscriber = subscriber.clone();
	let handle = thread::spawn(move || {
		let controller = Controller::new(node);
		cloned_subscriber
			.start(Box::new(controller))
			.expect("could not start fabric listener!");
	});
	Ok(NodeHandle {
		subscriber,
		sessions,
		handle,
	})
}

fn command_loop(node: Option<&NodeHandle>) {
	let stdin = std::io::stdin();
	for line in stdin.lock().lines() {
		let line = match line {
			Ok(line) => line,
			Err(_) => break,
		};
		match line.trim() {
			"" => {}
			"exit" => break,
			"status" => match node {
				Some(node) if node.subscriber.is_running() => {
					cli_message!("fabric listener is [{}]", "running".bright_green())
				}
				Some(_) => cli_message!("fabric listener is [{}]", "stopped".bright_red()),
				None => cli_message!("node is not enabled"),
			},
			command => cli_message!(
				"{}: command `{}` not implemented!",
				"ERROR".bright_red(),
				command.bright_green()
			),
		}
	}
}

fn stop_node(node: NodeHandle) {
	cli_message!("stopping fabric listener...");
	if node.subscriber.is_running() {
		node.subscriber.stop();
	}
	node.sessions.release_all();
	let _ = node.handle.join();
}

fn main() {
	let matches = App::new("ledger713")
		.version(crate_version!())
		.arg(Arg::from_usage("[config-path] -c, --config=<config-path> 'the path to the config file'"))
		.arg(Arg::from_usage("[node] -n, --node 'run the ledger node'"))
		.arg(Arg::from_usage("[sink] -s, --sink 'run the audit sink api'"))
		.arg(Arg::from_usage("[daemon] -d, --daemon 'run daemon'"))
		.get_matches();

	let runtime_mode = match matches.is_present("daemon") {
		true => RuntimeMode::Daemon,
		false => RuntimeMode::Cli,
	};

	env_logger::init();

	let mut config: Ledger713Config = welcome(&matches, &runtime_mode).unwrap_or_else(|e| {
		panic!(
			"{}: could not read or create config! {}",
			"ERROR".bright_red(),
			e
		);
	});

	let node_enabled = matches.is_present("node") || config.node();
	let sink_enabled = matches.is_present("sink") || config.sink();

	cli_message!("{}", WELCOME_HEADER.bright_yellow().bold());

	if !node_enabled && !sink_enabled {
		cli_message!(
			"{}: nothing to run! pass --node and/or --sink or enable them in the config.",
			"ERROR".bright_red()
		);
		std::process::exit(1);
	}

	if let Err(e) = config.check(node_enabled, sink_enabled) {
		cli_message!("{}: {}", "ERROR".bright_red(), e);
		std::process::exit(1);
	}

	let mut sink_handle: Option<JoinHandle<()>> = None;
	if sink_enabled {
		match start_sink(&config) {
			Ok(handle) => sink_handle = Some(handle),
			Err(e) => {
				cli_message!("{}: could not start audit sink! {}", "ERROR".bright_red(), e);
				std::process::exit(1);
			}
		}
	}

	let mut node_handle: Option<NodeHandle> = None;
	if node_enabled {
		let node_id = config.resolve_node_id();
		match start_node(&config, &node_id) {
			Ok(handle) => node_handle = Some(handle),
			Err(e) => {
				cli_message!("{}: could not start node! {}", "ERROR".bright_red(), e);
				std::process::exit(1);
			}
		}
	}

	match runtime_mode {
		RuntimeMode::Daemon => {
			// externally supervised: leases expire on their own if we
			// are killed without a graceful stop
			if let Some(node) = node_handle {
				let _ = node.handle.join();
			}
			if let Some(handle) = sink_handle {
				let _ = handle.join();
			}
		}
		RuntimeMode::Cli => {
			cli_message!("use `status` to inspect the listener or `exit` to stop");
			command_loop(node_handle.as_ref());
			if let Some(node) = node_handle {
				stop_node(node);
			}
		}
	}
}
