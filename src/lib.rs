// ABOUTME: Library crate for ssh-muxer exposing the ssh command builder and connection multiplexer

#![allow(missing_docs)]

pub mod command;
pub mod error;
pub mod mux;
pub mod process;

pub use command::CommandSpec;
pub use error::{Result, SshError};
pub use mux::{Muxer, MuxerConfig};
pub use process::{ProcessOutcome, ProcessRunner};
