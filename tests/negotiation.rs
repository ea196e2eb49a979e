use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use svc::error::SignalError;
use svc::peer::engine::{
    EngineEvent, EngineEventKind, EngineFactory, MediaEngine, TransportState,
};
use svc::peer::session::{AppEvent, NegotiationSession};
use svc::peer::state::{CallRole, NegotiationState};
use svc::peer::types::IceCandidate;
use svc::server::SignalingRelay;
use svc::signaling::{ClientMessage, ServerMessage};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Default)]
struct EngineOps {
    ops: Vec<String>,
}

#[derive(Clone)]
struct MockEngine {
    connection_id: String,
    ops: Arc<Mutex<EngineOps>>,
}

impl MockEngine {
    fn push(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().ops.push(op.into());
    }
}

impl MediaEngine for MockEngine {
    type Tracks = Vec<String>;

    async fn attach_local_tracks(&self, tracks: Vec<String>) -> Result<(), SignalError> {
        self.push(format!("attach:{}", tracks.join("+")));
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<Value, SignalError> {
        self.push("create_offer");
        Ok(json!({"type": "offer", "sdp": format!("sdp-offer-{}", self.connection_id)}))
    }

    async fn create_local_answer(&self) -> Result<Value, SignalError> {
        self.push("create_answer");
        Ok(json!({"type": "answer", "sdp": format!("sdp-answer-{}", self.connection_id)}))
    }

    async fn set_local_description(&self, _description: Value) -> Result<(), SignalError> {
        self.push("set_local");
        Ok(())
    }

    async fn set_remote_description(&self, _description: Value) -> Result<(), SignalError> {
        self.push("set_remote");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError> {
        self.push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.push("close");
    }
}

#[derive(Clone, Default)]
struct MockFactory {
    engines: Arc<Mutex<Vec<(String, Arc<Mutex<EngineOps>>)>>>,
}

impl MockFactory {
    fn engine_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    fn ops_of(&self, index: usize) -> Vec<String> {
        self.engines.lock().unwrap()[index].1.lock().unwrap().ops.clone()
    }

    fn connection_id_of(&self, index: usize) -> String {
        self.engines.lock().unwrap()[index].0.clone()
    }
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    async fn create(
        &self,
        connection_id: &str,
        _events: UnboundedSender<EngineEvent>,
    ) -> Result<MockEngine, SignalError> {
        let ops = Arc::new(Mutex::new(EngineOps::default()));
        self.engines
            .lock()
            .unwrap()
            .push((connection_id.to_string(), ops.clone()));
        Ok(MockEngine {
            connection_id: connection_id.to_string(),
            ops,
        })
    }
}

struct TestPeer {
    id: &'static str,
    session: NegotiationSession<MockFactory>,
    factory: MockFactory,
    signal_rx: UnboundedReceiver<ClientMessage>,
    app_rx: UnboundedReceiver<AppEvent>,
    server_rx: Option<UnboundedReceiver<ServerMessage>>,
    _engine_rx: UnboundedReceiver<EngineEvent>,
}

fn new_peer(id: &'static str, room: &str, name: &str) -> TestPeer {
    let (signal_tx, signal_rx) = unbounded_channel();
    let (app_tx, app_rx) = unbounded_channel();
    let (engine_tx, engine_rx) = unbounded_channel();
    let factory = MockFactory::default();
    let session = NegotiationSession::new(
        factory.clone(),
        signal_tx,
        app_tx,
        engine_tx,
        room,
        name,
    );
    TestPeer {
        id,
        session,
        factory,
        signal_rx,
        app_rx,
        server_rx: None,
        _engine_rx: engine_rx,
    }
}

fn drain_signals(peer: &mut TestPeer) -> Vec<ClientMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = peer.signal_rx.try_recv() {
        out.push(msg);
    }
    out
}

fn drain_app(peer: &mut TestPeer) -> Vec<AppEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = peer.app_rx.try_recv() {
        out.push(ev);
    }
    out
}

fn wire_candidate(connection_id: &str, label: &str) -> Value {
    serde_json::to_value(IceCandidate {
        candidate: label.to_string(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        connection_id: connection_id.to_string(),
    })
    .unwrap()
}

fn local_candidate_event(connection_id: &str, label: &str) -> EngineEvent {
    EngineEvent {
        connection_id: connection_id.to_string(),
        kind: EngineEventKind::LocalCandidate(IceCandidate {
            candidate: label.to_string(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            connection_id: connection_id.to_string(),
        }),
    }
}

fn transport_event(connection_id: &str, state: TransportState) -> EngineEvent {
    EngineEvent {
        connection_id: connection_id.to_string(),
        kind: EngineEventKind::Transport(state),
    }
}

fn offer_message(connection_id: &str, sender_id: &str, sender_name: &str) -> ServerMessage {
    ServerMessage::Offer {
        sdp_description: json!({
            "sdp": {"type": "offer", "sdp": "v=0..."},
            "id": connection_id,
            "ts": 0
        }),
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
    }
}

fn answer_message(connection_id: &str) -> ServerMessage {
    ServerMessage::Answer {
        sdp_description: json!({
            "sdp": {"type": "answer", "sdp": "v=0..."},
            "id": connection_id,
            "ts": 0
        }),
        sender_id: "peer".into(),
        sender_name: "Peer".into(),
    }
}

#[tokio::test]
async fn caller_reaches_connected() {
    let mut p = new_peer("a", "room1", "Alice");
    assert_eq!(p.session.state(), NegotiationState::Idle);

    p.session.media_ready(vec!["cam".into()]);
    assert_eq!(p.session.state(), NegotiationState::AwaitingPeer);
    let sent = drain_signals(&mut p);
    assert!(matches!(
        &sent[0],
        ClientMessage::Join { room_id, display_name }
            if room_id == "room1" && display_name == "Alice"
    ));

    p.session
        .handle_signal(ServerMessage::PeerJoined {
            channel_id: "b".into(),
            display_name: "Bob".into(),
        })
        .await
        .unwrap();
    // peer-joined вызывает авто-статус "is ready"
    let sent = drain_signals(&mut p);
    assert!(matches!(
        &sent[0],
        ClientMessage::Status(s) if s.kind == "user-ready"
    ));

    p.session.start_call().await.unwrap();
    assert_eq!(
        p.session.state(),
        NegotiationState::Negotiating(CallRole::Caller)
    );
    assert_eq!(p.session.role(), Some(CallRole::Caller));

    let conn = p.session.connection_id().unwrap().to_string();
    let sent = drain_signals(&mut p);
    match &sent[0] {
        ClientMessage::Offer {
            room_id,
            sdp_description,
        } => {
            assert_eq!(room_id, "room1");
            assert_eq!(sdp_description["id"], conn.as_str());
        }
        other => panic!("expected offer, got {other:?}"),
    }
    assert_eq!(
        p.factory.ops_of(0),
        vec!["attach:cam", "create_offer", "set_local"]
    );

    p.session.handle_signal(answer_message(&conn)).await.unwrap();
    assert_eq!(p.factory.ops_of(0).last().unwrap(), "set_remote");

    p.session
        .handle_engine_event(transport_event(&conn, TransportState::Connected))
        .await;
    assert_eq!(p.session.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn callee_buffers_candidates_until_remote_description() {
    let mut p = new_peer("b", "room1", "Bob");
    p.session.media_ready(vec!["cam".into()]);
    drain_signals(&mut p);

    // кандидаты обгоняют offer — движка ещё даже нет
    p.session
        .handle_signal(ServerMessage::IceCandidate(wire_candidate("call1", "c-1")))
        .await
        .unwrap();
    p.session
        .handle_signal(ServerMessage::IceCandidate(wire_candidate("call1", "c-2")))
        .await
        .unwrap();
    assert_eq!(p.factory.engine_count(), 0);

    p.session
        .handle_signal(offer_message("call1", "a", "Alice"))
        .await
        .unwrap();
    assert_eq!(
        p.session.state(),
        NegotiationState::Negotiating(CallRole::Callee)
    );
    assert_eq!(p.session.connection_id(), Some("call1"));

    // remote description строго раньше кандидатов, кандидаты в порядке прихода
    assert_eq!(
        p.factory.ops_of(0),
        vec![
            "attach:cam",
            "set_remote",
            "candidate:c-1",
            "candidate:c-2",
            "create_answer",
            "set_local"
        ]
    );

    let sent = drain_signals(&mut p);
    assert!(matches!(
        &sent[0],
        ClientMessage::Answer { sdp_description, .. } if sdp_description["id"] == "call1"
    ));
}

#[tokio::test]
async fn stale_answer_is_a_silent_noop() {
    let mut p = new_peer("a", "room1", "Alice");
    p.session.media_ready(vec!["cam".into()]);
    drain_signals(&mut p);

    // answer без отправленного offer — игнорируется без ошибки
    p.session
        .handle_signal(answer_message("nobody"))
        .await
        .unwrap();
    assert_eq!(p.session.state(), NegotiationState::AwaitingPeer);
    assert_eq!(p.factory.engine_count(), 0);

    // дубликат answer после первого тоже no-op
    p.session
        .handle_signal(ServerMessage::PeerJoined {
            channel_id: "b".into(),
            display_name: "Bob".into(),
        })
        .await
        .unwrap();
    p.session.start_call().await.unwrap();
    let conn = p.session.connection_id().unwrap().to_string();
    p.session.handle_signal(answer_message(&conn)).await.unwrap();
    let ops_after_first = p.factory.ops_of(0);
    p.session.handle_signal(answer_message(&conn)).await.unwrap();
    assert_eq!(p.factory.ops_of(0), ops_after_first);
}

#[tokio::test]
async fn ended_session_discards_stale_messages_and_events() {
    let mut p = new_peer("a", "room1", "Alice");
    p.session.media_ready(vec!["cam".into()]);
    p.session
        .handle_signal(ServerMessage::PeerJoined {
            channel_id: "b".into(),
            display_name: "Bob".into(),
        })
        .await
        .unwrap();
    p.session.start_call().await.unwrap();
    let conn = p.session.connection_id().unwrap().to_string();
    drain_signals(&mut p);

    p.session.hang_up().await;
    assert_eq!(p.session.state(), NegotiationState::Ended);
    assert_eq!(p.factory.ops_of(0).last().unwrap(), "close");

    // события и сообщения старой попытки больше ничего не меняют
    p.session
        .handle_engine_event(local_candidate_event(&conn, "late"))
        .await;
    assert!(drain_signals(&mut p).is_empty());

    let ops_before = p.factory.ops_of(0);
    p.session.handle_signal(answer_message(&conn)).await.unwrap();
    p.session
        .handle_signal(ServerMessage::IceCandidate(wire_candidate(&conn, "late-2")))
        .await
        .unwrap();
    assert_eq!(p.factory.ops_of(0), ops_before);

    // повторный hang_up идемпотентен
    p.session.hang_up().await;
    let closes = p
        .factory
        .ops_of(0)
        .iter()
        .filter(|op| op.as_str() == "close")
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn failed_transport_allows_retry_with_fresh_engine() {
    let mut p = new_peer("a", "room1", "Alice");
    p.session.media_ready(vec!["cam".into()]);
    p.session
        .handle_signal(ServerMessage::PeerJoined {
            channel_id: "b".into(),
            display_name: "Bob".into(),
        })
        .await
        .unwrap();
    p.session.start_call().await.unwrap();
    let conn1 = p.session.connection_id().unwrap().to_string();
    drain_signals(&mut p);
    drain_app(&mut p);

    p.session
        .handle_engine_event(transport_event(&conn1, TransportState::Failed))
        .await;
    assert_eq!(p.session.state(), NegotiationState::Failed);
    let events = drain_app(&mut p);
    assert!(events.iter().any(|ev| matches!(
        ev,
        AppEvent::Error { retryable: true, .. }
    )));

    // повторный явный старт: старый движок закрыт, создан новый
    p.session.start_call().await.unwrap();
    assert_eq!(p.factory.engine_count(), 2);
    assert_eq!(p.factory.ops_of(0).last().unwrap(), "close");
    let conn2 = p.session.connection_id().unwrap().to_string();
    assert_ne!(conn1, conn2);
    assert_eq!(
        p.session.state(),
        NegotiationState::Negotiating(CallRole::Caller)
    );

    // кандидат от старой попытки буферизуется, но на flush отбрасывается
    p.session
        .handle_signal(ServerMessage::IceCandidate(wire_candidate(&conn1, "stale")))
        .await
        .unwrap();
    p.session
        .handle_signal(answer_message(&conn2))
        .await
        .unwrap();
    assert!(!p
        .factory
        .ops_of(1)
        .iter()
        .any(|op| op.starts_with("candidate:")));
}

#[tokio::test]
async fn media_failure_keeps_session_idle() {
    let mut p = new_peer("a", "room1", "Alice");
    p.session.media_failed("permission denied");
    assert_eq!(p.session.state(), NegotiationState::Idle);
    let events = drain_app(&mut p);
    assert!(matches!(
        &events[0],
        AppEvent::Error { retryable: true, message } if message.contains("permission denied")
    ));
    assert!(drain_signals(&mut p).is_empty());

    // повторная попытка после ошибки — обычный media_ready
    p.session.media_ready(vec!["cam".into()]);
    assert_eq!(p.session.state(), NegotiationState::AwaitingPeer);
}

#[tokio::test]
async fn disconnected_transport_surfaces_problem_then_recovery() {
    let mut p = new_peer("a", "room1", "Alice");
    p.session.media_ready(vec!["cam".into()]);
    p.session
        .handle_signal(ServerMessage::PeerJoined {
            channel_id: "b".into(),
            display_name: "Bob".into(),
        })
        .await
        .unwrap();
    p.session.start_call().await.unwrap();
    let conn = p.session.connection_id().unwrap().to_string();
    p.session.handle_signal(answer_message(&conn)).await.unwrap();
    p.session
        .handle_engine_event(transport_event(&conn, TransportState::Connected))
        .await;
    drain_app(&mut p);

    p.session
        .handle_engine_event(transport_event(&conn, TransportState::Disconnected))
        .await;
    let events = drain_app(&mut p);
    assert!(events
        .iter()
        .any(|ev| matches!(ev, AppEvent::ConnectionProblem)));
    // состояние не меняется, пока движок не вынес вердикт
    assert_eq!(p.session.state(), NegotiationState::Connected);

    p.session
        .handle_engine_event(transport_event(&conn, TransportState::Connected))
        .await;
    let events = drain_app(&mut p);
    assert!(events
        .iter()
        .any(|ev| matches!(ev, AppEvent::ConnectionRecovered)));
}

/// Полный сценарий: join двух сторон, offer/answer, обмен кандидатами,
/// connected с обеих сторон — через настоящий релей.
#[tokio::test]
async fn two_peers_negotiate_end_to_end() {
    let relay = SignalingRelay::new();
    let mut a = new_peer("a", "room1", "Alice");
    let mut b = new_peer("b", "room1", "Bob");
    for peer in [&mut a, &mut b] {
        let (tx, rx) = unbounded_channel();
        relay.connect(peer.id, tx);
        peer.server_rx = Some(rx);
    }

    async fn pump(relay: &SignalingRelay, a: &mut TestPeer, b: &mut TestPeer) {
        loop {
            let mut progressed = false;
            for peer in [&mut *a, &mut *b] {
                while let Ok(msg) = peer.signal_rx.try_recv() {
                    relay.handle_message(peer.id, msg);
                    progressed = true;
                }
                let rx = peer.server_rx.as_mut().unwrap();
                while let Ok(msg) = rx.try_recv() {
                    peer.session.handle_signal(msg).await.unwrap();
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    a.session.media_ready(vec!["cam-a".into()]);
    pump(&relay, &mut a, &mut b).await;
    b.session.media_ready(vec!["cam-b".into()]);
    pump(&relay, &mut a, &mut b).await;

    // a увидел пира и может начинать звонок
    let a_events = drain_app(&mut a);
    assert!(a_events.iter().any(|ev| matches!(
        ev,
        AppEvent::PeerJoined { display_name, .. } if display_name == "Bob"
    )));

    a.session.start_call().await.unwrap();
    pump(&relay, &mut a, &mut b).await;

    let conn = a.session.connection_id().unwrap().to_string();
    // b стал callee той же попытки и ответил
    assert_eq!(b.session.connection_id(), Some(conn.as_str()));
    assert_eq!(
        b.session.state(),
        NegotiationState::Negotiating(CallRole::Callee)
    );
    assert_eq!(
        a.session.state(),
        NegotiationState::Negotiating(CallRole::Caller)
    );
    // a применил answer как remote description
    assert_eq!(a.factory.ops_of(0).last().unwrap(), "set_remote");

    // обе стороны обменялись хотя бы одним кандидатом
    a.session
        .handle_engine_event(local_candidate_event(&conn, "cand-a-1"))
        .await;
    b.session
        .handle_engine_event(local_candidate_event(&conn, "cand-b-1"))
        .await;
    pump(&relay, &mut a, &mut b).await;
    assert!(a
        .factory
        .ops_of(0)
        .contains(&"candidate:cand-b-1".to_string()));
    assert!(b
        .factory
        .ops_of(0)
        .contains(&"candidate:cand-a-1".to_string()));

    // транспорт поднялся с обеих сторон
    a.session
        .handle_engine_event(transport_event(&conn, TransportState::Connected))
        .await;
    b.session
        .handle_engine_event(transport_event(&conn, TransportState::Connected))
        .await;
    assert_eq!(a.session.state(), NegotiationState::Connected);
    assert_eq!(b.session.state(), NegotiationState::Connected);
}
