//! Client endpoint connected to a registry session over an in-memory stream.

use parley::{Endpoint, EndpointBuilder, SessionRegistry};
use tokio::io::duplex;

/// Duplex buffer size used by [`endpoint_pair`].
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Start `client` and a session of `registry` on opposite halves of a duplex
/// stream.
///
/// Returns `(client, session)`.
///
/// # Errors
///
/// Returns any error raised by the registry's per-session customiser.
pub fn endpoint_pair(
    client: EndpointBuilder,
    registry: &SessionRegistry,
) -> parley::Result<(Endpoint, Endpoint)> {
    endpoint_pair_with_capacity(client, registry, DEFAULT_CAPACITY)
}

/// As [`endpoint_pair`], with an explicit duplex buffer size.
///
/// # Errors
///
/// Returns any error raised by the registry's per-session customiser.
pub fn endpoint_pair_with_capacity(
    client: EndpointBuilder,
    registry: &SessionRegistry,
    capacity: usize,
) -> parley::Result<(Endpoint, Endpoint)> {
    let (client_io, server_io) = duplex(capacity);
    let session = registry.accept(server_io)?;
    Ok((client.spawn(client_io), session))
}
