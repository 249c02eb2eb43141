//! Service endpoints: servers and clients.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::Service;
