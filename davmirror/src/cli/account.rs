// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `davmirror account` — CRUD over configured remote accounts, forwarded
//! directly to the `davmirror::service::Service` facade.

use clap::{arg, Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;
use url::Url;

use davmirror::account;
use davmirror::remote::HttpClient;
use davmirror::service::{self, Service};

enum Action {
    Add { url: Url, username: String, label: Option<String> },
    Update { id: String, label: Option<String> },
    Remove { id: String },
    List,
}

pub fn command() -> Command {
    Command::new("account")
        .about("Manage configured remote accounts")
        .long_about("Add, update, remove, and list the remote accounts this engine mirrors locally")
        .subcommand_required(true)
        .subcommand(
            Command::new("add")
                .about("Register a new remote account")
                .arg(arg!(<URL> "base URL of the remote root").value_parser(clap::value_parser!(Url)))
                .arg(arg!(<USERNAME> "account username").value_parser(clap::value_parser!(String)))
                .arg(
                    Arg::new("label")
                        .short('l')
                        .long("label")
                        .action(ArgAction::Set)
                        .help("human-readable label for this account"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Edit an account's label")
                .arg(arg!(<ID> "account identifier").value_parser(clap::value_parser!(String)))
                .arg(Arg::new("label").short('l').long("label").action(ArgAction::Set)),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an account and everything mirrored for it")
                .arg(arg!(<ID> "account identifier").value_parser(clap::value_parser!(String))),
        )
        .subcommand(Command::new("list").about("List configured accounts"))
}

pub async fn handle(args: &ArgMatches, service: &Service<HttpClient>) -> Result<(), Error> {
    let action = match args.subcommand() {
        Some(("add", a)) => Action::Add {
            url: a.get_one::<Url>("URL").cloned().expect("required"),
            username: a.get_one::<String>("USERNAME").cloned().expect("required"),
            label: a.get_one::<String>("label").cloned(),
        },
        Some(("update", a)) => Action::Update {
            id: a.get_one::<String>("ID").cloned().expect("required"),
            label: a.get_one::<String>("label").cloned(),
        },
        Some(("remove", a)) => Action::Remove {
            id: a.get_one::<String>("ID").cloned().expect("required"),
        },
        Some(("list", _)) => Action::List,
        _ => unreachable!(),
    };

    match action {
        Action::Add { url, username, label } => add(service, url, username, label),
        Action::Update { id, label } => update(service, id, label),
        Action::Remove { id } => remove(service, id),
        Action::List => list(service),
    }
}

fn add(service: &Service<HttpClient>, url: Url, username: String, label: Option<String>) -> Result<(), Error> {
    let account = service.add_account(url, username)?;
    let account = match label {
        Some(label) => service.update_account(&account.id, Some(label))?,
        None => account,
    };
    println!("added account {account} ({})", account.base_url);
    Ok(())
}

fn update(service: &Service<HttpClient>, id: String, label: Option<String>) -> Result<(), Error> {
    let id = account::Id::new(id)?;
    let account = service.update_account(&id, label)?;
    println!("updated {account}");
    Ok(())
}

fn remove(service: &Service<HttpClient>, id: String) -> Result<(), Error> {
    let id = account::Id::new(id)?;
    service.remove_account(&id)?;
    println!("removed account {id}");
    Ok(())
}

fn list(service: &Service<HttpClient>) -> Result<(), Error> {
    let accounts = service.accounts()?;

    if accounts.is_empty() {
        println!("no accounts configured yet");
        return Ok(());
    }

    for account in accounts {
        println!(" - {account} = {} [{}]", account.base_url, account.username);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("service: {0}")]
    Service(#[from] service::Error),
    #[error("account: {0}")]
    Account(#[from] account::Error),
}
