#[macro_use]
extern crate log;

pub mod acceptor;
pub mod commander;
pub mod config;
pub mod error;
pub mod internal;
pub mod leader;
pub mod message;
pub mod node;
pub mod replica;
pub mod scout;
pub mod shared;
pub mod storage;
mod thread;

pub use crate::config::{Cluster, Config};
pub use crate::error::{Error, Result};
