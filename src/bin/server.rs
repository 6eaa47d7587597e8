use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "dkvs-server")]
struct Opt {
    /// Unique server ID
    #[structopt(short = "i", long = "id")]
    id: usize,

    /// Cluster description (JSON)
    #[structopt(short = "c", long = "cluster", parse(from_os_str))]
    cluster: PathBuf,

    /// Timeout between servers (in milliseconds), overrides the cluster file
    #[structopt(short = "t", long = "timeout")]
    timeout: Option<u64>,

    /// Log verbosity, repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn setup_logging(id: usize, verbose: u8) -> Result<(), fern::InitError> {
    let level = match verbose {
    | 0 => log::LevelFilter::Warn,
    | 1 => log::LevelFilter::Info,
    | 2 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                id,
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    if let Err(error) = setup_logging(opt.id, opt.verbose) {
        eprintln!("[ERROR]: could not set up logging: {}", error);
        std::process::exit(1);
    }

    let config = match dkvs::Config::from_file(&opt.cluster, opt.id) {
    | Ok(config) => config,
    | Err(error) => {
        eprintln!("[ERROR]: could not load {:?}: {}", opt.cluster, error);
        std::process::exit(1);
    }
    };

    let config = match opt.timeout {
    | Some(timeout) => config.with_timeout(Duration::from_millis(timeout)),
    | None => config,
    };

    if let Err(error) = config.run().await {
        eprintln!("[ERROR]: node {} stopped: {}", opt.id, error);
        std::process::exit(1);
    }
}
