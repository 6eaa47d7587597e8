use std::path::PathBuf;

use serde_derive::{Serialize, Deserialize};

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub struct Execution {
    /// Cluster file handed to every server
    pub cluster: PathBuf,

    /// Steps to run in order
    pub commands: Vec<Command>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
#[derive(Clone, Debug)]
pub enum Command {
    /// Start the given server
    Start {
        id: usize,
    },

    /// Connect to the given server
    Connect {
        id: usize,
    },

    /// Disconnect from the given server
    Disconnect {
        id: usize,
    },

    /// Send a GET request to the specified server
    Get {
        id: usize,
        key: String,
        #[serde(default)]
        expect: Option<String>,
    },

    /// Send a SET request to the specified server
    Set {
        id: usize,
        key: String,
        value: String,
        #[serde(default)]
        expect: Option<String>,
    },

    /// Send a DELETE request to the specified server
    Delete {
        id: usize,
        key: String,
        #[serde(default)]
        expect: Option<String>,
    },

    /// Crash the specified server
    Crash {
        id: usize,
    },

    /// Sleep the test harness for `ms` milliseconds
    Sleep {
        ms: u64,
    }
}
