// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Command-line surface over `davmirror::service::Service`. A thin,
//! stateless wrapper: every subcommand opens (or reopens) the store under
//! the resolved [`HostConfig`] and forwards to the facade.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use thiserror::Error;

use davmirror::config::{self, HostConfig};
use davmirror::remote::HttpClient;
use davmirror::service::{self, Service};

mod account;
mod sync;

const PROGRAM: &str = "davmirror";

fn command() -> Command {
    Command::new(PROGRAM)
        .about("Client-side mirror of a WebDAV-style remote file hierarchy")
        .arg(
            Arg::new("directory")
                .short('D')
                .long("directory")
                .global(true)
                .help("Root directory for all persisted state")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("bundle-identifier")
                .long("bundle-identifier")
                .global(true)
                .help("Namespace for background transfer sessions")
                .action(ArgAction::Set),
        )
        .arg_required_else_help(true)
        .subcommand(account::command())
        .subcommand(sync::command())
}

/// Resolve [`HostConfig`] from any persisted `config.yaml` merged with CLI
/// overrides, persisting the result back so subsequent invocations without
/// `-D`/`--bundle-identifier` reuse it.
async fn resolve_config(args: &clap::ArgMatches) -> HostConfig {
    let manager = config::Manager::user(PROGRAM);

    let loaded = match &manager {
        Some(manager) => manager.load::<HostConfig>().await,
        None => None,
    };

    let mut resolved = loaded.unwrap_or_else(|| HostConfig {
        directory: dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(PROGRAM),
        bundle_identifier: format!("dev.serpentos.{PROGRAM}"),
        shared_container_identifier: None,
    });

    if let Some(directory) = args.get_one::<PathBuf>("directory") {
        resolved.directory = directory.clone();
    }
    if let Some(bundle_identifier) = args.get_one::<String>("bundle-identifier") {
        resolved.bundle_identifier = bundle_identifier.clone();
    }

    if let Some(manager) = &manager {
        let _ = manager.save("config", &resolved).await;
    }

    resolved
}

/// Process all CLI arguments.
pub async fn process() -> Result<(), Error> {
    let matches = command().get_matches();

    let host_config = resolve_config(&matches).await;
    let service = Service::open(host_config, Arc::new(HttpClient::new()))?;

    match matches.subcommand() {
        Some(("account", args)) => account::handle(args, &service).await.map_err(Error::Account),
        Some(("sync", args)) => sync::handle(args, &service).await.map_err(Error::Sync),
        _ => unreachable!(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("service: {0}")]
    Service(#[from] service::Error),
    #[error("account command: {0}")]
    Account(#[from] account::Error),
    #[error("sync command: {0}")]
    Sync(#[from] sync::Error),
}
