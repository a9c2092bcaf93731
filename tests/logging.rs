//! Log output of endpoints, captured with `logtest`.

use log::Level;
use parley::{Body, EndpointBuilder, Message, SessionRegistryBuilder};
use parley_testing::{EventLog, LoggerHandle, RawPeer, TestResult, endpoint_pair, logger};
use rstest::rstest;
use serde_json::json;

mod common;
use common::{client, echo_registry};

#[rstest]
#[tokio::test]
async fn unhandled_functions_are_logged(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
    mut logger: LoggerHandle,
) -> TestResult {
    let registry = echo_registry.build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    client.ask("missing", ())?.await.expect_err("missing function");
    assert!(logger.contains(Level::Warn, "no handler registered: kind=ask, function=missing"));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn handler_panics_are_logged_with_the_function(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
    mut logger: LoggerHandle,
) -> TestResult {
    let registry = echo_registry
        .on_ask("fragile", |_endpoint, _body: Body| async move {
            if true {
                panic!("snapped");
            }
            Ok::<(), String>(())
        })?
        .build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    client.ask("fragile", ())?.await.expect_err("handler panicked");
    assert!(logger.contains(Level::Error, "handler panicked: function=fragile, panic=snapped"));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn protocol_failures_are_logged_as_warnings(
    client: EndpointBuilder,
    mut logger: LoggerHandle,
) -> TestResult {
    let (recorder, mut events) = EventLog::new();
    let (_endpoint, mut peer) = RawPeer::spawn(client.subscribe(recorder));

    peer.send_raw(&[0, 0, 0, 3, b'[', b'1', b']']).await?;
    events.next_terminal().await;
    assert!(logger.contains(Level::Warn, "endpoint failed"));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn malformed_asks_are_dropped_with_a_warning(
    client: EndpointBuilder,
    mut logger: LoggerHandle,
) -> TestResult {
    let (endpoint, mut peer) = RawPeer::spawn(client);

    let mut ask = Message::ask("1", "anything", Some(json!(1)));
    ask.function = None;
    peer.send(ask).await?;
    peer.send(Message::tell("still_reading", None)).await?;
    // The endpoint keeps reading after the dropped ask.
    let pending = endpoint.ask("status", ())?;
    let ask = peer.recv().await;
    peer.send(Message::reply(ask.id.unwrap_or_default(), Ok(None))).await?;
    assert_eq!(pending.await, Ok(None));

    assert!(logger.contains(Level::Warn, "dropping ask without id or function"));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn clean_shutdown_is_logged_at_info(
    client: EndpointBuilder,
    mut logger: LoggerHandle,
) -> TestResult {
    let (recorder, mut events) = EventLog::new();
    let (endpoint, mut peer) = RawPeer::spawn(client.subscribe(recorder));

    endpoint.close();
    peer.expect_eof().await;
    events.next_terminal().await;
    assert!(logger.contains(Level::Info, "endpoint closed"));
    Ok(())
}
