use std::io::{BufRead, Write};
use std::time::Duration;

use dkvs::message::{Request, Response};
use futures::{SinkExt, StreamExt};
use structopt::StructOpt;
use tokio_util::codec::{Framed, LinesCodec};

type Socket = Framed<tokio::net::TcpStream, LinesCodec>;

enum Command {
    /// Connect to the server at the given address
    Connect {
        address: String,
    },

    /// Disconnect from the current server
    Disconnect,

    /// Forward a request to the current server
    Request(Request),

    Help,
}

fn usage() {
    println!(
        "{}{}{}{}{}{}{}{}{}",
        "------------------------------------------------------------------\n",
        "Possible commands:\n",
        "connect <ADDR>   | c <ADDR>  -- Connect to server at <ADDR>\n",
        "disconnect       | d         -- Disconnect from current server\n",
        "get <KEY>                    -- Read <KEY>\n",
        "set <KEY> <VAL>              -- Write <VAL> to <KEY>\n",
        "delete <KEY>                 -- Remove <KEY>\n",
        "ping                         -- Check that the server is alive\n",
        "------------------------------------------------------------------",
    );
}

impl std::str::FromStr for Command {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut iter = s.trim().splitn(2, ' ');
        match iter.next() {
        | Some("help") | Some("h") => Ok(Command::Help),
        | Some("disconnect") | Some("d") => Ok(Command::Disconnect),
        | Some("connect") | Some("c") => {
            iter.next()
                .map(|address| address.trim().to_string())
                .filter(|address| !address.is_empty())
                .map(|address| Command::Connect { address })
                .ok_or(())
        }
        | _ => s.trim_start().parse().map(Command::Request).map_err(|_| ()),
        }
    }
}

async fn run(timeout: Duration) {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut socket: Option<Socket> = None;
    let mut lines = stdin.lock()
        .lines()
        .filter_map(|line| line.ok());

    // Main interaction loop
    loop {
        print!("> ");
        stdout.flush().ok();

        let line = match lines.next() {
        | Some(line) => line,
        | None => return,
        };

        if line.trim().is_empty() {
            continue
        }

        // Attempt to parse command from user input
        let command = match line.parse::<Command>() {
        | Ok(command) => command,
        | Err(()) => {
            println!("[ERROR]: could not parse command");
            continue
        }
        };

        match command {
        | Command::Connect { address } => {
            match tokio::net::TcpStream::connect(&address).await {
            | Ok(stream) => {
                println!("[RESPONSE]: connected to server at {}", address);
                socket = Some(Framed::new(stream, LinesCodec::new()));
            }
            | Err(error) => {
                println!("[ERROR]: failed to connect to server at {}: {}", address, error);
            }
            }
        }
        | Command::Disconnect => {
            socket = None;
        }
        | Command::Request(request) => {
            let connection = match socket.as_mut() {
            | Some(connection) => connection,
            | None => {
                println!("[ERROR]: not connected to a server");
                continue
            }
            };

            let sent = connection.send(request.to_string()).await;
            if let Err(error) = sent {
                println!("[ERROR]: failed to send request: {}", error);
                socket = None;
                continue
            }

            // Listen for response
            let received = tokio::time::timeout(timeout, connection.next()).await;
            match received {
            | Ok(Some(Ok(line))) => match line.parse::<Response>() {
                | Ok(response) => println!("[RESPONSE]: {}", response),
                | Err(_) => println!("[ERROR]: unexpected response `{}`", line),
            },
            | Ok(Some(Err(error))) => {
                println!("[ERROR]: failed to read response: {}", error);
                socket = None;
            }
            | Ok(None) => {
                println!("[ERROR]: server closed the connection");
                socket = None;
            }
            | Err(_) => println!("[ERROR]: no response within {:?}", timeout),
            }
        }
        | Command::Help => usage(),
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "dkvs-client")]
struct Opt {
    /// How long to wait for each response (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "5000")]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    run(Duration::from_millis(opt.timeout)).await
}
