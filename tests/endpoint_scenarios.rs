//! End-to-end behaviour of a client endpoint talking to a registry session.

use std::time::Duration;

use parley::{
    Body,
    Endpoint,
    EndpointBuilder,
    EndpointEvent,
    Error,
    Message,
    ReplyError,
    SessionRegistry,
    SessionRegistryBuilder,
};
use parley_testing::{EventLog, RawPeer, TestResult, endpoint_pair, endpoint_pair_with_capacity};
use rstest::rstest;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod common;
use common::{client, echo_registry, unused_listener};

#[rstest]
#[tokio::test]
async fn echo_returns_the_request_body(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry.build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    assert_eq!(client.ask("echo", "hi")?.await?, Some(json!("hi")));
    assert_eq!(client.ask("echo", json!({"nested": [1, 2]}))?.await?, Some(json!({"nested": [1, 2]})));
    assert_eq!(client.ask("echo", ())?.await?, None);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn missing_functions_fail_with_peer_text(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry.build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    let outcome = client.ask("missing", ())?.await;
    assert_eq!(
        outcome,
        Err(ReplyError::Remote("function not understood: missing".into()))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn concurrent_asks_resolve_to_their_own_replies(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry
        .on_ask("delay", |_endpoint, body: Body| async move {
            let millis = body.as_ref().and_then(serde_json::Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, String>(body)
        })?
        .build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    let replies: Vec<_> = [30_u64, 10, 20, 0]
        .into_iter()
        .map(|millis| client.ask("delay", millis).map(|reply| (millis, reply)))
        .collect::<Result<_, _>>()?;
    for (millis, reply) in replies {
        assert_eq!(reply.await?, Some(json!(millis)));
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn either_side_may_ask(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let client = client.on_ask("whoami", |_endpoint, _body| async move {
        Ok::<_, String>("client")
    })?;
    let registry = echo_registry
        .on_ask("callback", |session: Endpoint, _body| async move {
            session.ask("whoami", ())?.await.map_err(Error::from)
        })?
        .build();
    let (client, session) = endpoint_pair(client, &registry)?;

    assert_eq!(session.ask("whoami", ())?.await?, Some(json!("client")));
    assert_eq!(client.ask("callback", ())?.await?, Some(json!("client")));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn tells_reach_handlers_without_replies(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let registry = echo_registry
        .on_tell("record", move |_endpoint, body: Body| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
            }
        })?
        .build();
    let (client, _session) = endpoint_pair(client, &registry)?;

    client.tell("record", 1)?;
    client.tell("record", 2)?;
    assert_eq!(rx.recv().await, Some(Some(json!(1))));
    assert_eq!(rx.recv().await, Some(Some(json!(2))));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unhandled_tells_are_reported_to_listeners(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let (recorder, mut events) = EventLog::new();
    let registry = echo_registry.subscribe(recorder).build();
    let (client, session) = endpoint_pair(client, &registry)?;

    client.tell("nobody_home", ())?;
    let (id, event) = events.next().await;
    assert!(matches!(event, EndpointEvent::Connected));
    assert_eq!(id, session.session_id());

    let (_, event) = events.next().await;
    let EndpointEvent::Unhandled { function, .. } = event else {
        panic!("expected unhandled event, got {event:?}");
    };
    assert_eq!(function, "nobody_home");
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn sessions_emit_heartbeats_and_echoing_clients_answer(client: EndpointBuilder) -> TestResult {
    let registry = SessionRegistry::builder().echo_heartbeats(false).build();
    let (_session, mut client_side) = RawPeer::accept(&registry)?;
    let started = tokio::time::Instant::now();
    assert_eq!(client_side.recv().await, Message::heartbeat());
    assert!(started.elapsed() >= Duration::from_secs(15));

    let (_client, mut server_side) = RawPeer::spawn(client.echo_heartbeats(true));
    server_side.send(Message::heartbeat()).await?;
    assert_eq!(server_side.recv().await, Message::heartbeat());
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn heartbeats_reach_no_listener_or_handler(client: EndpointBuilder) -> TestResult {
    let (server_recorder, mut server_events) = EventLog::new();
    let (client_recorder, mut client_events) = EventLog::new();
    let registry = SessionRegistry::builder()
        .echo_heartbeats(false)
        .subscribe(server_recorder)
        .build();
    let client = client.echo_heartbeats(true).subscribe(client_recorder);
    let (client, session) = endpoint_pair(client, &registry)?;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(client.is_connected() && session.is_connected());
    for events in [&mut server_events, &mut client_events] {
        let seen: Vec<_> = events.drain().into_iter().map(|(_, event)| event).collect();
        assert!(
            matches!(seen.as_slice(), [EndpointEvent::Connected]),
            "unexpected events: {seen:?}"
        );
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn reserved_names_fail_before_any_write(client: EndpointBuilder) {
    let (endpoint, mut peer) = RawPeer::spawn(client);

    for name in parley::RESERVED_FUNCTION_NAMES {
        assert!(matches!(endpoint.tell(name, ()), Err(Error::ReservedName(_))));
        assert!(matches!(endpoint.ask(name, ()), Err(Error::ReservedName(_))));
    }
    peer.assert_silent(Duration::from_millis(50)).await;
    assert!(endpoint.is_connected());
}

#[rstest]
#[tokio::test]
async fn unknown_reply_ids_do_not_disturb_pending_asks(client: EndpointBuilder) -> TestResult {
    let (endpoint, mut peer) = RawPeer::spawn(client);
    let pending = endpoint.ask("work", ())?;
    let ask = peer.recv().await;

    peer.send(Message::reply("not-an-id", Ok(Some(json!("bogus")))))
        .await?;
    peer.send(Message::reply(ask.id.clone().unwrap_or_default(), Ok(Some(json!("real")))))
        .await?;
    assert_eq!(pending.await?, Some(json!("real")));
    Ok(())
}

#[rstest]
#[case::none(0)]
#[case::one(1)]
#[case::many(8)]
#[tokio::test]
async fn teardown_fails_each_outstanding_ask_exactly_once(
    client: EndpointBuilder,
    #[case] k: usize,
) -> TestResult {
    let registry = SessionRegistry::builder()
        .heartbeat_interval(None)
        .on_ask("hang", |_endpoint, _body| async move {
            std::future::pending::<()>().await;
            Ok::<(), String>(())
        })?
        .on_ask("ping", |_endpoint, _body| async move { Ok::<_, String>("pong") })?
        .build();
    let (recorder, mut events) = EventLog::new();
    let (client, session) = endpoint_pair(client.subscribe(recorder), &registry)?;

    let pending = (0..k)
        .map(|_| client.ask("hang", ()))
        .collect::<Result<Vec<_>, _>>()?;
    // Frames are processed in order, so the pong proves every hang ask
    // reached the session before it closes.
    assert_eq!(client.ask("ping", ())?.await?, Some(json!("pong")));
    session.close();

    for reply in pending {
        assert_eq!(reply.await, Err(ReplyError::Closed));
    }
    let (_, event) = events.next_terminal().await;
    assert!(matches!(event, EndpointEvent::Closed));
    assert!(events.drain().is_empty(), "only one terminal event per endpoint");
    assert!(matches!(client.tell("late", ()), Err(Error::NotConnected)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn tells_sent_before_close_are_still_written(client: EndpointBuilder) -> TestResult {
    let (endpoint, mut peer) = RawPeer::spawn(client);

    endpoint.tell("log", 1)?;
    endpoint.tell("log", 2)?;
    endpoint.close();

    for expected in [1, 2] {
        let message = peer.recv().await;
        assert_eq!(message, Message::tell("log", Some(json!(expected))));
    }
    peer.expect_eof().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn large_simultaneous_asks_over_a_small_buffer_complete(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry.build();
    let client = client.on_ask("echo", |_endpoint, body: Body| async move { Ok::<_, String>(body) })?;
    let (client, session) = endpoint_pair_with_capacity(client, &registry, 1024)?;
    let payload = "x".repeat(64 * 1024);

    let asks = (0..4)
        .flat_map(|_| [client.ask("echo", &payload), session.ask("echo", &payload)])
        .collect::<Result<Vec<_>, _>>()?;
    let replies = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(asks))
        .await
        .expect("both sides keep reading while their writes are blocked");
    for reply in replies {
        assert_eq!(reply?, Some(json!(payload)));
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn protocol_errors_fail_pending_asks_with_the_reason(client: EndpointBuilder) -> TestResult {
    let (recorder, mut events) = EventLog::new();
    let (endpoint, mut peer) = RawPeer::spawn(client.on_error(|_, _| {}).subscribe(recorder));
    let pending = endpoint.ask("work", ())?;
    peer.recv().await;

    peer.send_raw(&[0, 0, 0, 2, b'{', b'{']).await?;

    let Err(ReplyError::ConnectionFailed(reason)) = pending.await else {
        panic!("expected connection failure");
    };
    assert!(reason.contains("codec error"), "reason: {reason}");
    let (_, event) = events.next_terminal().await;
    assert!(matches!(event, EndpointEvent::Failed(_)));
    peer.expect_eof().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn handler_failures_become_error_replies(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry
        .on_ask("divide", |_endpoint, body: Body| async move {
            let [a, b] = serde_json::from_value::<[i64; 2]>(body.unwrap_or_default())
                .map_err(|e| e.to_string())?;
            a.checked_div(b).ok_or_else(|| "division by zero".to_owned())
        })?
        .on_ask("explode", |_endpoint, _body| async move {
            let values: Vec<u8> = Vec::new();
            Ok::<_, String>(values[1])
        })?
        .build();
    let (client, session) = endpoint_pair(client, &registry)?;

    assert_eq!(client.ask("divide", [9, 3])?.await?, Some(json!(3)));
    assert_eq!(
        client.ask("divide", [1, 0])?.await,
        Err(ReplyError::Remote("division by zero".into()))
    );
    let Err(ReplyError::Remote(text)) = client.ask("explode", ())?.await else {
        panic!("expected remote failure");
    };
    assert!(text.starts_with("handler panicked: explode: "), "text: {text}");
    assert!(session.is_connected());
    assert_eq!(client.ask("echo", "still alive")?.await?, Some(json!("still alive")));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn registries_serve_tcp_clients(
    client: EndpointBuilder,
    echo_registry: SessionRegistryBuilder,
) -> TestResult {
    let registry = echo_registry.build();
    let listener = unused_listener().await;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        async move { registry.serve(listener, shutdown).await }
    });

    let endpoint = client.connect(addr).await?;
    assert_eq!(endpoint.ask("echo", "over tcp")?.await?, Some(json!("over tcp")));

    shutdown.cancel();
    server.await?;
    tokio::time::timeout(Duration::from_secs(5), endpoint.closed()).await?;
    assert!(registry.is_empty());
    Ok(())
}
