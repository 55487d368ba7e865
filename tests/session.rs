use std::sync::{Arc, Mutex};
use std::time::Duration;

use middleware_client::{
    //
    commands,
    create_memory_transport,
    ConnectionState,
    CorrelationId,
    DispatchMode,
    DispatcherState,
    Envelope,
    Error,
    MemoryPeer,
    MessageKind,
    RequestParams,
    Result,
    Session,
    SessionBuilder,
};

const POLL: Duration = Duration::from_millis(5);
const WAIT: Duration = Duration::from_secs(2);

/// Collects callback payloads so tests can assert on them.
#[derive(Clone, Default)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn sink(&self, tag: &'static str) -> impl FnOnce(String) + Send + 'static {
        let calls = self.0.clone();
        move |payload| calls.lock().unwrap().push(format!("{tag}:{payload}"))
    }

    fn get(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.0.lock().unwrap().len() < count {
                tokio::time::sleep(POLL).await;
            }
        })
        .await
        .expect("callbacks did not fire in time");
    }
}

async fn spawned_session() -> Result<(Session, MemoryPeer)> {
    // ---
    let (transport, peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .poll_period(POLL)
        .build()
        .await?;
    Ok((session, peer))
}

async fn wait_state(session: &Session, state: DispatcherState) {
    tokio::time::timeout(WAIT, async {
        while session.dispatcher_state() != state {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("dispatcher did not reach expected state");
}

#[tokio::test]
async fn test_send_request_success_reply() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    log::info!("starting success reply test");
    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    let id = session
        .send_request(
            RequestParams::new("TestChannel")
                .on_success(calls.sink("ok"))
                .on_error(calls.sink("err")),
            "hello",
        )
        .await?;

    let sent = tokio::time::timeout(WAIT, peer.next_sent_envelope())
        .await
        .expect("nothing sent")?;
    assert_eq!(sent.kind, MessageKind::Request);
    assert_eq!(sent.command, commands::SEND_REQUEST);
    assert_eq!(sent.channel, "TestChannel");
    assert_eq!(sent.payload, "hello");
    assert_eq!(sent.request_id, id.as_str());

    log::info!("delivering reply for {id}");
    peer.deliver(format!(
        r#"{{"Type":3,"RequestId":"{id}","Payload":"hello-reply"}}"#
    ));
    calls.wait_for(1).await;

    // A second reply for the same id is dropped.
    peer.deliver_envelope(&Envelope::response(id.as_str(), false, "late"))?;
    tokio::time::sleep(POLL * 4).await;

    assert_eq!(calls.get(), vec!["ok:hello-reply"]);
    assert_eq!(session.pending_count(), 0);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_error_reply_fires_only_matching_on_error() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    let a = session
        .publish_message(
            RequestParams::new("c")
                .on_success(calls.sink("a-ok"))
                .on_error(calls.sink("a-err")),
            "x",
        )
        .await?;
    let _b = session
        .publish_message(
            RequestParams::new("c")
                .on_success(calls.sink("b-ok"))
                .on_error(calls.sink("b-err")),
            "y",
        )
        .await?;

    peer.deliver_envelope(&Envelope::response(a.as_str(), false, "denied"))?;
    calls.wait_for(1).await;
    tokio::time::sleep(POLL * 4).await;

    assert_eq!(calls.get(), vec!["a-err:denied"]);
    assert_eq!(session.pending_count(), 1);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unsolicited_request_reaches_callback() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let seen = Arc::new(Mutex::new(Vec::<Envelope>::new()));

    let sink = seen.clone();
    session.register_message_callback(move |_session, envelope| {
        sink.lock().unwrap().push(envelope);
    });

    peer.deliver(
        r#"{"Type":0,"Command":"SENDREQUEST","Channel":"TestChannel","Payload":"hi","SourceId":"peer1"}"#,
    );
    peer.deliver_envelope(&Envelope::update(commands::PUBLISH_MESSAGE, "TestChannel", "tick"))?;

    tokio::time::timeout(WAIT, async {
        while seen.lock().unwrap().len() < 2 {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("unsolicited messages not delivered");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0].kind, MessageKind::Request);
    assert_eq!(seen[0].source_id, "peer1");
    assert_eq!(seen[0].payload, "hi");
    assert_eq!(seen[1].kind, MessageKind::Update);
    assert_eq!(seen[1].payload, "tick");

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_input_keeps_loop_running() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    let id = session
        .subscribe_to_channel(RequestParams::new("c").on_success(calls.sink("ok")))
        .await?;

    peer.deliver("{not json");
    peer.deliver(r#"{"Type":7,"RequestId":"x"}"#);
    peer.deliver(r#"{"Type":3,"Payload":"no id"}"#);
    peer.deliver(r#"[1,2,3]"#);
    peer.deliver_envelope(&Envelope::response(id.as_str(), true, "subscribed"))?;

    calls.wait_for(1).await;
    assert_eq!(calls.get(), vec!["ok:subscribed"]);
    assert_eq!(session.dispatcher_state(), DispatcherState::Running);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_request_id_rejected() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (transport, peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .poll_period(POLL)
        .id_generator(|| CorrelationId::from("same"))
        .build()
        .await?;
    let calls = Calls::default();

    session
        .send_request(RequestParams::new("c").on_success(calls.sink("ok")), "1")
        .await?;
    let second = session.send_request(RequestParams::new("c"), "2").await;
    assert!(matches!(second, Err(Error::DuplicateRequestId(id)) if id == "same"));

    // Only the first request went out.
    assert_eq!(peer.sent().len(), 1);

    // Once answered, the id is free again.
    peer.deliver_envelope(&Envelope::response("same", true, "done"))?;
    calls.wait_for(1).await;
    session.send_request(RequestParams::new("c"), "3").await?;
    assert_eq!(peer.sent().len(), 2);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_start_twice_rejected() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, _peer) = spawned_session().await?;

    assert!(matches!(
        session.start_dispatching(),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        session.run_dispatcher().await,
        Err(Error::InvalidState(_))
    ));

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_inline_dispatcher_returns_on_shutdown() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (transport, peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .poll_period(Duration::from_secs(60))
        .dispatch_mode(DispatchMode::Inline)
        .build()
        .await?;

    let runner = session.clone();
    let task = tokio::spawn(async move { runner.run_dispatcher().await });
    wait_state(&session, DispatcherState::Running).await;

    session.shutdown().await;

    tokio::time::timeout(WAIT, task)
        .await
        .expect("dispatcher did not return")
        .expect("dispatcher task panicked")?;

    assert_eq!(session.dispatcher_state(), DispatcherState::Stopped);
    assert_eq!(peer.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_operations_after_shutdown_fail() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    session.shutdown().await;

    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(matches!(
        session.add_channel_listener(RequestParams::new("c")).await,
        Err(Error::NoConnection)
    ));
    assert!(matches!(
        session.send_request(RequestParams::new("c"), "x").await,
        Err(Error::NoConnection)
    ));
    assert_eq!(session.pending_count(), 0);
    assert!(peer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_stops_dispatcher() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    session
        .send_request(RequestParams::new("c").on_error(calls.sink("err")), "x")
        .await?;

    log::info!("disconnecting peer");
    peer.disconnect();
    wait_state(&session, DispatcherState::Stopped).await;

    // Disconnects do not fail pending requests.
    assert!(calls.get().is_empty());
    assert_eq!(session.pending_count(), 1);
    assert!(matches!(
        session.publish_message(RequestParams::new("c"), "y").await,
        Err(Error::NoConnection)
    ));

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_send_message_requires_destination() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;

    let res = session
        .send_message_to_channel(RequestParams::new("c"), "p", "")
        .await;
    assert!(matches!(res, Err(Error::InvalidArgument(_))));

    session
        .send_message_to_channel(RequestParams::new("c"), "p", "peer7")
        .await?;
    let sent = peer.next_sent_envelope().await?;
    assert_eq!(sent.command, commands::SEND_MESSAGE);
    assert_eq!(sent.destination_id, "peer7");

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reply_to_routes_to_source() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;

    // Answer every inbound request from inside the callback.
    session.register_message_callback(|session, envelope| {
        if envelope.kind != MessageKind::Request {
            return;
        }
        let session = session.clone();
        tokio::spawn(async move {
            let reply = format!("echo:{}", envelope.payload);
            let params = RequestParams::new(envelope.channel.clone());
            let _ = session.reply_to(params, &envelope, reply).await;
        });
    });

    peer.deliver_envelope(
        &Envelope::request(CorrelationId::from("r1"), commands::SEND_REQUEST, "c", "ping")
            .with_source("peer1"),
    )?;

    let reply = tokio::time::timeout(WAIT, peer.next_sent_envelope())
        .await
        .expect("no reply sent")?;
    assert_eq!(reply.command, commands::SEND_MESSAGE);
    assert_eq!(reply.destination_id, "peer1");
    assert_eq!(reply.channel, "c");
    assert_eq!(reply.payload, "echo:ping");

    // Without a source there is nobody to answer.
    let orphan = Envelope::update(commands::PUBLISH_MESSAGE, "c", "x");
    assert!(matches!(
        session.reply_to(RequestParams::new("c"), &orphan, "y").await,
        Err(Error::InvalidArgument(_))
    ));

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_suppresses_callbacks() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    let id = session
        .send_request(
            RequestParams::new("c")
                .on_success(calls.sink("ok"))
                .on_error(calls.sink("err")),
            "x",
        )
        .await?;

    assert!(session.cancel(&id));
    assert!(!session.cancel(&id));

    peer.deliver_envelope(&Envelope::response(id.as_str(), true, "late"))?;
    tokio::time::sleep(POLL * 4).await;
    assert!(calls.get().is_empty());

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_request_timeout_fires_on_error() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (transport, _peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .poll_period(POLL)
        .request_timeout(Duration::from_millis(20))
        .build()
        .await?;
    let calls = Calls::default();

    session
        .send_request(
            RequestParams::new("c")
                .on_success(calls.sink("ok"))
                .on_error(calls.sink("err")),
            "x",
        )
        .await?;

    calls.wait_for(1).await;
    assert_eq!(
        calls.get(),
        vec![format!("err:{}", middleware_client::TIMEOUT_PAYLOAD)]
    );
    assert_eq!(session.pending_count(), 0);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_callback_may_issue_new_request() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let calls = Calls::default();

    // Reply callbacks run on the dispatcher task with the table unlocked.
    let follow_up = session.clone();
    let sink = calls.sink("second");
    session
        .send_request(
            RequestParams::new("c").on_success(move |_| {
                tokio::spawn(async move {
                    let _ = follow_up
                        .send_request(RequestParams::new("c").on_success(sink), "next")
                        .await;
                });
            }),
            "first",
        )
        .await?;

    let first = peer.next_sent_envelope().await?;
    peer.deliver_envelope(&Envelope::response(first.request_id, true, "1"))?;

    let second = tokio::time::timeout(WAIT, peer.next_sent_envelope())
        .await
        .expect("follow-up not sent")?;
    assert_eq!(second.payload, "next");

    peer.deliver_envelope(&Envelope::response(second.request_id, true, "2"))?;
    calls.wait_for(1).await;
    assert_eq!(calls.get(), vec!["second:2"]);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_panicking_callbacks_keep_dispatcher_running() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    // A long shutdown wait makes a dead loop show up as a slow shutdown.
    let (transport, peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .poll_period(POLL)
        .shutdown_wait(Duration::from_secs(10))
        .build()
        .await?;
    let calls = Calls::default();

    let seen = calls.clone();
    session.register_message_callback(move |_session, envelope| {
        if envelope.command == "EXPLODE" {
            panic!("message callback failure");
        }
        seen.0.lock().unwrap().push(format!("msg:{}", envelope.payload));
    });

    log::info!("sending a request whose reply callback panics");
    let bad = session
        .send_request(
            RequestParams::new("c").on_success(|_| panic!("reply callback failure")),
            "a",
        )
        .await?;
    let good = session
        .send_request(RequestParams::new("c").on_success(calls.sink("ok")), "b")
        .await?;

    peer.deliver_envelope(&Envelope::response(bad.as_str(), true, "first"))?;
    peer.deliver_envelope(&Envelope::update("EXPLODE", "c", "boom"))?;
    peer.deliver_envelope(&Envelope::response(good.as_str(), true, "second"))?;
    peer.deliver_envelope(&Envelope::update(commands::PUBLISH_MESSAGE, "c", "third"))?;

    calls.wait_for(2).await;
    assert_eq!(calls.get(), vec!["ok:second", "msg:third"]);
    assert!(!session.is_pending(&bad));
    assert_eq!(session.dispatcher_state(), DispatcherState::Running);

    log::info!("shutting down after panicking callbacks");
    tokio::time::timeout(Duration::from_secs(1), session.shutdown())
        .await
        .expect("shutdown waited on a dead dispatcher");
    assert_eq!(session.dispatcher_state(), DispatcherState::Stopped);
    assert_eq!(peer.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (session, peer) = spawned_session().await?;
    let id = session
        .send_request(RequestParams::new("c"), "never answered")
        .await?;
    assert!(session.is_pending(&id));

    // Clones share the connection; only the last drop releases it.
    let clone = session.clone();
    drop(session);
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(peer.state(), ConnectionState::Open);
    assert_eq!(clone.dispatcher_state(), DispatcherState::Running);

    log::info!("dropping the last session handle without shutdown");
    drop(clone);

    tokio::time::timeout(WAIT, async {
        while peer.state() != ConnectionState::Closed {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("connection not closed after the session was dropped");
    Ok(())
}

#[tokio::test]
async fn test_dropping_unstarted_inline_session_closes_connection() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    init_logging();

    let (transport, peer) = create_memory_transport();
    let session = SessionBuilder::new()
        .transport(transport)
        .dispatch_mode(DispatchMode::Inline)
        .build()
        .await?;
    assert_eq!(session.dispatcher_state(), DispatcherState::Idle);

    drop(session);

    tokio::time::timeout(WAIT, async {
        while peer.state() != ConnectionState::Closed {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("connection not closed after the session was dropped");
    Ok(())
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
