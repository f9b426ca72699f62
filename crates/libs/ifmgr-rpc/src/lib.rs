//! RPC boundary for the interface configuration manager.
//!
//! Requests and responses are bare JSON objects written back to back on
//! a Unix stream socket. Method dispatch is an explicit static table
//! validating arity and argument types; reads go through short-lived
//! sessions, writes go through the interface manager as events, and
//! everything the upstream configuration daemon owns is proxied through
//! a per-connection client.

pub mod client;
pub mod conn;
pub mod dispatch;
mod group;
pub mod server;
pub mod types;

pub use client::{Client, ClientError};
pub use dispatch::{CallError, Db, Disp};
pub use server::{Config, Srv};
pub use types::{Request, Response};
