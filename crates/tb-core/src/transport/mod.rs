//! Messaging transport abstractions.
//!
//! The encrypted chat network (account, E2E encryption, group protocol,
//! verified invites) lives behind [`port::Transport`]; the core only reads
//! conversation snapshots and issues mutation requests.

pub mod notice;
pub mod port;
pub mod supervised;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
