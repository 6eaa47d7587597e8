use std::collections::HashMap as Map;
use std::path::PathBuf;
use std::time::Duration;

use dkvs::message;
use structopt::StructOpt;

mod command;
mod server;
mod socket;

use crate::command::{Command, Execution};
use crate::server::Server;
use crate::socket::Connection;

#[derive(StructOpt)]
#[structopt(name = "harness")]
struct Opt {
    /// Path to the server binary
    #[structopt(short = "s", long = "server", parse(from_os_str))]
    server: PathBuf,

    /// Test script (JSON)
    #[structopt(short = "f", long = "file", parse(from_os_str))]
    file: PathBuf,

    /// How long to wait for each response (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "5000")]
    timeout: u64,

    /// Server log verbosity, repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("could not read test: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse test: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server {0} is not part of the cluster")]
    UnknownServer(usize),

    #[error("not connected to server {0}")]
    NotConnected(usize),

    #[error("connection to server {0} failed: {1}")]
    Connection(usize, tokio_util::codec::LinesCodecError),

    #[error("server {id} answered `{actual}`, expected `{expected}`")]
    Mismatch { id: usize, expected: String, actual: String },
}

async fn run(opt: Opt) -> Result<(), Failure> {

    // Test execution
    let execution: Execution = serde_json::from_reader(std::fs::File::open(&opt.file)?)?;
    let cluster: dkvs::Cluster = serde_json::from_reader(std::fs::File::open(&execution.cluster)?)?;
    let timeout = Duration::from_millis(opt.timeout);

    // TCP connections
    let mut connections: Map<usize, Connection> = Map::default();

    // Running servers
    let mut servers: Map<usize, Server> = Map::default();

    for command in execution.commands {
        println!("Executing command {:?}", command);
        let (id, request, expect) = match command {
        | Command::Start { id } => {
            let server = Server::new(&opt.server, id, &execution.cluster, opt.verbose)?;
            servers.insert(id, server);
            continue
        }
        | Command::Connect { id } => {
            let address = cluster.nodes.get(&id).ok_or(Failure::UnknownServer(id))?;
            connections.insert(id, Connection::connect(address).await?);
            continue
        }
        | Command::Disconnect { id } => {
            connections.remove(&id);
            continue
        }
        | Command::Crash { id } => {
            connections.remove(&id);
            servers.remove(&id);
            continue
        }
        | Command::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            continue
        }
        | Command::Get { id, key, expect } => (id, message::Command::Get { key }, expect),
        | Command::Set { id, key, value, expect } => (id, message::Command::Set { key, value }, expect),
        | Command::Delete { id, key, expect } => (id, message::Command::Delete { key }, expect),
        };

        let connection = connections.get_mut(&id).ok_or(Failure::NotConnected(id))?;
        let actual = connection.request(request, timeout)
            .await
            .map_err(|error| Failure::Connection(id, error))?
            .unwrap_or_default();
        println!("Server {} answered `{}`", id, actual);

        match expect {
        | Some(expected) if expected != actual => {
            return Err(Failure::Mismatch { id, expected, actual })
        }
        | _ => (),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    if let Err(failure) = run(opt).await {
        eprintln!("[FAILURE]: {}", failure);
        std::process::exit(1);
    }
}
