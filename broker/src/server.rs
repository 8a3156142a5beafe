// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Entry point of the broker process: parses argv, loads and validates the TOML
//! config, then spins up one acceptor task per `[[listeners]]` entry plus the
//! single dispatcher task and blocks on all of them.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use clap::Arg;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::acceptor;
use crate::config::Config;
use crate::constants;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind};
use crate::hooks::Hooks;
use crate::log::init_log;

/// Parse `-c/--config` from argv, load and validate the config file, initialize
/// logging, then run the broker until every listener task ends.
///
/// # Errors
/// Returns error if the config file cannot be read or fails validation, or if
/// the tokio runtime cannot be created.
pub fn run_server() -> Result<(), Error> {
    let matches = clap::Command::new("mqtt-broker")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Xu Shaohua <shaohua@biofan.org>")
        .about("A single-node MQTT v3.1.1 broker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("config_file")
                .help("Specify config file path"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .num_args(0)
                .help("Test config file and exit"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map_or(constants::DEFAULT_CONFIG, String::as_str);
    let config_content = std::fs::read_to_string(config_file)?;
    let config = Config::from_str(&config_content)?;
    config.validate(true).map_err(|err| {
        Error::from_string(
            ErrorKind::ConfigError,
            format!("Invalid config file {config_file}: {err}"),
        )
    })?;

    if matches.get_flag("test") {
        println!("The configuration file {config_file} syntax is Ok");
        return Ok(());
    }

    init_log(config.log())?;

    let runtime = Runtime::new()?;
    runtime.block_on(run_with_config(config, Arc::new(Hooks::default())))
}

/// Run the broker with an already-parsed config and a set of hooks, bypassing
/// argv and logging setup. Used by embedding programs that want their own CLI
/// and want to override `onClientConnect`/`onClientDisconnect`.
///
/// # Errors
/// Returns error if any listener address cannot be bound.
pub async fn run_with_config(config: Config, hooks: Arc<Hooks>) -> Result<(), Error> {
    let general = Arc::new(config.general().clone());
    let (inbound_tx, inbound_rx) = mpsc::channel(constants::CHANNEL_CAPACITY);
    let next_conn_id = Arc::new(AtomicU64::new(constants::FIRST_CONN_ID));

    let mut handles = Vec::new();
    for listener in config.listeners() {
        let listener = Arc::new(listener.clone());
        let general = Arc::clone(&general);
        let inbound_tx = inbound_tx.clone();
        let hooks = Arc::clone(&hooks);
        let next_conn_id = Arc::clone(&next_conn_id);
        handles.push(tokio::spawn(async move {
            if let Err(err) = acceptor::run(listener, general, inbound_tx, hooks, next_conn_id).await {
                log::error!("listener task exited: {err}");
            }
        }));
    }
    // The dispatcher is the sole owner of `inbound_tx`'s matching receiver; drop
    // our clone so the channel closes once every acceptor (and therefore every
    // connection it spawned) has gone away.
    drop(inbound_tx);

    let dispatcher = Dispatcher::new(general, hooks, inbound_rx);
    let dispatcher_handle = tokio::spawn(dispatcher.run_loop());
    handles.push(dispatcher_handle);

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
