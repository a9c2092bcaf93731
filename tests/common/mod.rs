//! Shared fixtures for integration tests.
//!
//! Provides an echo registry, a client builder with heartbeats disabled, and a
//! helper to bind a TCP listener on an unused local port.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::net::{Ipv4Addr, SocketAddr};

use parley::{Body, Endpoint, EndpointBuilder, SessionRegistry, SessionRegistryBuilder};
use rstest::fixture;
use tokio::net::TcpListener;

/// Bind a TCP listener to a free local port.
pub async fn unused_listener() -> TcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    TcpListener::bind(addr).await.expect("failed to bind port")
}

/// Client configuration without heartbeats, so tests only see the frames they
/// provoke.
#[fixture]
pub fn client() -> EndpointBuilder { Endpoint::builder().heartbeat_interval(None) }

/// Registry configuration without heartbeats, answering `echo` asks with the
/// request body.
#[fixture]
pub fn echo_registry() -> SessionRegistryBuilder {
    SessionRegistry::builder()
        .heartbeat_interval(None)
        .on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })
        .expect("register echo")
}
