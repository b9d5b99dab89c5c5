// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `davmirror sync` — demo subcommands that drive a single reconcile or
//! download through the engine, for manual testing against a real or stub
//! remote. Not the primary API surface; real hosts call `davmirror::service::Service`
//! directly.

use std::sync::Arc;
use std::time::Duration;

use clap::{arg, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use davmirror::account;
use davmirror::path::Path;
use davmirror::remote::HttpClient;
use davmirror::service::{self, Service};
use davmirror::transfer::TransferEvent;

pub fn command() -> Command {
    Command::new("sync")
        .about("Manually drive reconciliation or downloads for one account")
        .subcommand_required(true)
        .subcommand(
            Command::new("update-resource")
                .about("Reconcile one path against the remote and print the resulting change set")
                .arg(arg!(<ACCOUNT> "account identifier"))
                .arg(arg!([PATH] "slash-separated resource path").default_value("")),
        )
        .subcommand(
            Command::new("download")
                .about("Force a body download for one resource, showing progress")
                .arg(arg!(<ACCOUNT> "account identifier"))
                .arg(arg!(<PATH> "slash-separated resource path")),
        )
}

pub async fn handle(args: &ArgMatches, service: &Arc<Service<HttpClient>>) -> Result<(), Error> {
    match args.subcommand() {
        Some(("update-resource", a)) => {
            let account = account::Id::new(a.get_one::<String>("ACCOUNT").cloned().expect("required"))?;
            let path = parse_path(a.get_one::<String>("PATH").map(String::as_str).unwrap_or(""))?;
            update_resource(service, account, path).await
        }
        Some(("download", a)) => {
            let account = account::Id::new(a.get_one::<String>("ACCOUNT").cloned().expect("required"))?;
            let path = parse_path(a.get_one::<String>("PATH").expect("required"))?;
            download(service, account, path).await
        }
        _ => unreachable!(),
    }
}

fn parse_path(raw: &str) -> Result<Path, Error> {
    if raw.is_empty() {
        return Ok(Path::root());
    }
    Ok(Path::new(raw.split('/').map(String::from))?)
}

async fn update_resource(service: &Arc<Service<HttpClient>>, account: account::Id, path: Path) -> Result<(), Error> {
    let changes = service.update_resource(account, path).await?;

    for resource in &changes.inserted_or_updated {
        println!("+ {} (collection={}, version={:?}, dirty={})", resource.path, resource.is_collection, resource.version, resource.dirty);
    }
    for resource in &changes.deleted {
        println!("- {}", resource.path);
    }
    if changes.is_empty() {
        println!("no change");
    }

    Ok(())
}

async fn download(service: &Arc<Service<HttpClient>>, account: account::Id, path: Path) -> Result<(), Error> {
    let progress = service.download_resource(account.clone(), path.clone())?;
    let mut events = service.subscribe_transfer(&account).ok_or(Error::NoManager)?;

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template("{spinner} |{bar:20.cyan/blue}| {bytes}/{total_bytes}").expect("valid template"));

    loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                match event {
                    Ok(TransferEvent::DidFinish(id)) if id.path == path => {
                        bar.finish_with_message("done");
                        break;
                    }
                    Ok(TransferEvent::DidCancel(id)) if id.path == path => {
                        bar.abandon_with_message("cancelled");
                        break;
                    }
                    Ok(TransferEvent::DidFail(id, message)) if id.path == path => {
                        bar.abandon_with_message(format!("failed: {message}"));
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(150)) => {
                if let Some(total) = progress.total() {
                    bar.set_length(total);
                }
                bar.set_position(progress.completed());
            }
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("service: {0}")]
    Service(#[from] service::Error),
    #[error("account: {0}")]
    Account(#[from] account::Error),
    #[error("path: {0}")]
    Path(#[from] davmirror::path::Error),
    #[error("no manager for that account")]
    NoManager,
}
