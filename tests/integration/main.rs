//! Integration tests for the directory mirror

mod change_propagation;
mod coalescing;
mod daemon;
mod mutations;
mod rename_properties;
mod server_auth;
mod support;
