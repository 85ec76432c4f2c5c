//! runchat core library: authenticated backend client, run listing, and the run chat
//! session (streamed answers, agent progress, table previews) used by the CLI.

pub mod api;
pub mod chat;
pub mod config;
pub mod init;
pub mod runs;
pub mod session;
pub mod table;
