use crate::error::SignalError;
use crate::logger::log;
use crate::peer::engine::{
    EngineEvent, EngineEventKind, EngineFactory, MediaEngine, TransportState,
};
use crate::peer::state::{CallRole, NegotiationState};
use crate::peer::types::{IceCandidate, SdpPayload};
use crate::signaling::{ClientMessage, ServerMessage, StatusUpdate};
use crate::utils::random_id;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Уведомления для приложения о ходе переговоров
#[derive(Debug, Clone)]
pub enum AppEvent {
    StateChanged(NegotiationState),
    PeerJoined {
        channel_id: String,
        display_name: String,
    },
    Status(StatusUpdate),
    RemoteTrack {
        kind: String,
        ssrc: u32,
    },
    ConnectionProblem,
    ConnectionRecovered,
    Error {
        message: String,
        retryable: bool,
    },
}

/// Сеанс переговоров одного звонка.
///
/// Владеет движком и всем состоянием попытки: никаких глобальных
/// синглтонов, один сеанс — одно значение. Все переходы выполняются
/// последовательно, в порядке прихода сообщений и событий; завершённый
/// сеанс не переиспользуется — для нового звонка создаётся новый.
pub struct NegotiationSession<F: EngineFactory> {
    factory: F,
    signal_tx: UnboundedSender<ClientMessage>,
    app_tx: UnboundedSender<AppEvent>,
    engine_tx: UnboundedSender<EngineEvent>,
    room_id: String,
    display_name: String,
    state: NegotiationState,
    role: Option<CallRole>,
    /// ID текущей попытки звонка; события и кандидаты с другим ID — мусор
    connection_id: Option<String>,
    engine: Option<F::Engine>,
    tracks: Option<<F::Engine as MediaEngine>::Tracks>,
    peer_id: Option<String>,
    peer_name: Option<String>,
    remote_description_set: bool,
    /// Кандидаты, полученные до установки remote description
    pending_remote_candidates: Vec<IceCandidate>,
}

impl<F: EngineFactory> NegotiationSession<F> {
    pub fn new(
        factory: F,
        signal_tx: UnboundedSender<ClientMessage>,
        app_tx: UnboundedSender<AppEvent>,
        engine_tx: UnboundedSender<EngineEvent>,
        room_id: &str,
        display_name: &str,
    ) -> Self {
        Self {
            factory,
            signal_tx,
            app_tx,
            engine_tx,
            room_id: room_id.to_string(),
            display_name: display_name.to_string(),
            state: NegotiationState::Idle,
            role: None,
            connection_id: None,
            engine: None,
            tracks: None,
            peer_id: None,
            peer_name: None,
            remote_description_set: false,
            pending_remote_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            log(&format!("negotiation state: {:?} -> {:?}", self.state, state));
            self.state = state;
            let _ = self.app_tx.send(AppEvent::StateChanged(state));
        }
    }

    fn send_signal(&self, msg: ClientMessage) {
        // канал мог закрыться — доставка и так best-effort
        let _ = self.signal_tx.send(msg);
    }

    /// Локальные медиа получены: входим в комнату и ждём пира
    pub fn media_ready(&mut self, tracks: <F::Engine as MediaEngine>::Tracks) {
        if self.state != NegotiationState::Idle {
            log(&format!("media_ready ignored in state {:?}", self.state));
            return;
        }
        self.tracks = Some(tracks);
        self.set_state(NegotiationState::HaveLocalMedia);
        self.send_signal(ClientMessage::Join {
            room_id: self.room_id.clone(),
            display_name: self.display_name.clone(),
        });
        self.set_state(NegotiationState::AwaitingPeer);
    }

    /// Камера/микрофон не дались: остаёмся в idle, можно повторить
    pub fn media_failed(&mut self, reason: &str) {
        log(&format!("local media unavailable: {reason}"));
        let _ = self.app_tx.send(AppEvent::Error {
            message: format!("media unavailable: {reason}"),
            retryable: true,
        });
    }

    /// Смена имени; рассылки нет, сервер просто обновит запись
    pub fn set_display_name(&mut self, display_name: &str) {
        self.display_name = display_name.to_string();
        if self.state != NegotiationState::Idle {
            self.send_signal(ClientMessage::Rename {
                display_name: self.display_name.clone(),
            });
        }
    }

    /// Явный старт звонка: мы — caller.
    ///
    /// Разрешён из awaiting_peer и из failed (повтор после неудачи —
    /// старый движок сначала закрывается).
    pub async fn start_call(&mut self) -> Result<(), SignalError> {
        match self.state {
            NegotiationState::AwaitingPeer => {}
            NegotiationState::Failed => {
                if let Some(old) = self.engine.take() {
                    old.close().await;
                }
                self.connection_id = None;
                self.remote_description_set = false;
                self.pending_remote_candidates.clear();
            }
            _ => {
                log(&format!("start_call ignored in state {:?}", self.state));
                return Ok(());
            }
        }

        let connection_id = random_id();
        log(&format!("starting call, connection {connection_id}"));
        let engine = self
            .factory
            .create(&connection_id, self.engine_tx.clone())
            .await?;
        if let Some(tracks) = self.tracks.clone() {
            engine.attach_local_tracks(tracks).await?;
        }
        let offer = engine.create_local_offer().await?;
        engine.set_local_description(offer.clone()).await?;

        let payload = SdpPayload {
            sdp: offer,
            id: connection_id.clone(),
            ts: chrono::Utc::now().timestamp(),
        };
        self.send_signal(ClientMessage::Offer {
            room_id: self.room_id.clone(),
            sdp_description: serde_json::to_value(&payload)?,
        });

        self.connection_id = Some(connection_id);
        self.engine = Some(engine);
        self.role = Some(CallRole::Caller);
        self.set_state(NegotiationState::Negotiating(CallRole::Caller));
        Ok(())
    }

    /// Входящее сообщение от релея
    pub async fn handle_signal(&mut self, msg: ServerMessage) -> Result<(), SignalError> {
        if self.state == NegotiationState::Ended {
            // сеанс завершён, опоздавшие сообщения не применяем
            return Ok(());
        }
        match msg {
            ServerMessage::PeerJoined {
                channel_id,
                display_name,
            } => {
                self.peer_id = Some(channel_id.clone());
                self.peer_name = Some(display_name.clone());
                let _ = self.app_tx.send(AppEvent::PeerJoined {
                    channel_id,
                    display_name,
                });
                // сообщаем комнате, что мы готовы к звонку
                self.send_signal(ClientMessage::Status(StatusUpdate {
                    kind: "user-ready".into(),
                    text: format!("{} is ready", self.display_name),
                }));
            }
            ServerMessage::Offer {
                sdp_description,
                sender_id,
                sender_name,
            } => {
                self.handle_offer(sdp_description, sender_id, sender_name)
                    .await?;
            }
            ServerMessage::Answer {
                sdp_description, ..
            } => {
                self.handle_answer(sdp_description).await?;
            }
            ServerMessage::IceCandidate(value) => {
                self.handle_remote_candidate(value).await;
            }
            ServerMessage::Status(update) => {
                let _ = self.app_tx.send(AppEvent::Status(update));
            }
        }
        Ok(())
    }

    /// Offer от пира: мы — callee
    async fn handle_offer(
        &mut self,
        sdp_description: Value,
        sender_id: String,
        sender_name: String,
    ) -> Result<(), SignalError> {
        if !self.state.accepts_remote_offer() {
            // дубликат или одновременный старт с двух сторон — не отвечаем
            log(&format!("offer ignored in state {:?}", self.state));
            return Ok(());
        }
        let payload: SdpPayload = match serde_json::from_value(sdp_description) {
            Ok(p) => p,
            Err(e) => {
                log(&format!("malformed offer payload ignored: {e}"));
                return Ok(());
            }
        };

        log(&format!(
            "offer from {sender_name}, connection {}",
            payload.id
        ));
        self.peer_id = Some(sender_id);
        self.peer_name = Some(sender_name);

        // Если движка ещё нет — создаём его так же, как на стороне caller
        if self.engine.is_none() {
            let engine = self
                .factory
                .create(&payload.id, self.engine_tx.clone())
                .await?;
            if let Some(tracks) = self.tracks.clone() {
                engine.attach_local_tracks(tracks).await?;
            }
            self.engine = Some(engine);
        }
        // обе стороны звонка делят один connection_id — его задал caller
        self.connection_id = Some(payload.id.clone());

        {
            let Some(engine) = self.engine.as_ref() else {
                return Ok(());
            };
            engine.set_remote_description(payload.sdp).await?;
        }
        self.remote_description_set = true;
        self.role = Some(CallRole::Callee);
        self.set_state(NegotiationState::Negotiating(CallRole::Callee));
        self.flush_pending_candidates().await;

        let answer = {
            let Some(engine) = self.engine.as_ref() else {
                return Ok(());
            };
            let answer = engine.create_local_answer().await?;
            engine.set_local_description(answer.clone()).await?;
            answer
        };
        let answer_payload = SdpPayload {
            sdp: answer,
            id: payload.id,
            ts: chrono::Utc::now().timestamp(),
        };
        self.send_signal(ClientMessage::Answer {
            room_id: self.room_id.clone(),
            sdp_description: serde_json::to_value(&answer_payload)?,
        });
        Ok(())
    }

    /// Answer валиден только пока мы ждём его как caller
    async fn handle_answer(&mut self, sdp_description: Value) -> Result<(), SignalError> {
        if self.state != NegotiationState::Negotiating(CallRole::Caller)
            || self.remote_description_set
        {
            log(&format!("stale answer ignored in state {:?}", self.state));
            return Ok(());
        }
        let payload: SdpPayload = match serde_json::from_value(sdp_description) {
            Ok(p) => p,
            Err(e) => {
                log(&format!("malformed answer payload ignored: {e}"));
                return Ok(());
            }
        };
        if self.connection_id.as_deref() != Some(payload.id.as_str()) {
            log(&format!("answer for connection {} ignored", payload.id));
            return Ok(());
        }
        {
            let Some(engine) = self.engine.as_ref() else {
                return Ok(());
            };
            engine.set_remote_description(payload.sdp).await?;
        }
        self.remote_description_set = true;
        log("answer applied, waiting for transport");
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Кандидат от пира: применяем сразу или буферизуем до remote description
    async fn handle_remote_candidate(&mut self, value: Value) {
        let cand: IceCandidate = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                log(&format!("malformed candidate ignored: {e}"));
                return;
            }
        };
        if self.remote_description_set {
            if self.connection_id.as_deref() != Some(cand.connection_id.as_str()) {
                log(&format!(
                    "candidate for stale connection {} dropped",
                    cand.connection_id
                ));
                return;
            }
            if let Some(engine) = self.engine.as_ref() {
                if let Err(e) = engine.add_remote_candidate(cand).await {
                    log(&format!("failed to add ICE candidate: {e}"));
                }
                return;
            }
        }
        // движок не готов или remote description ещё не установлен
        log("Remote description not set yet, queuing candidate");
        self.pending_remote_candidates.push(cand);
    }

    /// Применяет все отложенные кандидаты после установки remote description
    async fn flush_pending_candidates(&mut self) {
        let Some(conn_id) = self.connection_id.clone() else {
            return;
        };
        if self.engine.is_none() {
            return;
        }
        let pending: Vec<IceCandidate> = self.pending_remote_candidates.drain(..).collect();
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        for cand in pending {
            if cand.connection_id != conn_id {
                log(&format!(
                    "buffered candidate for stale connection {} dropped",
                    cand.connection_id
                ));
                continue;
            }
            log(&format!("Applying pending candidate: {:?}", cand));
            if let Err(e) = engine.add_remote_candidate(cand).await {
                log(&format!("failed to apply pending candidate: {e}"));
            }
        }
    }

    /// Событие от медиадвижка
    pub async fn handle_engine_event(&mut self, ev: EngineEvent) {
        if self.connection_id.as_deref() != Some(ev.connection_id.as_str()) {
            // событие от движка уже завершённой попытки
            log(&format!(
                "engine event for stale connection {} dropped",
                ev.connection_id
            ));
            return;
        }
        match ev.kind {
            EngineEventKind::LocalCandidate(cand) => {
                // отправляем сразу, не накапливая: пир начнёт проверки раньше
                match serde_json::to_value(&cand) {
                    Ok(value) => self.send_signal(ClientMessage::IceCandidate {
                        room_id: self.room_id.clone(),
                        candidate: value,
                    }),
                    Err(e) => log(&format!("failed to encode local candidate: {e}")),
                }
            }
            EngineEventKind::RemoteTrack { kind, ssrc } => {
                let _ = self.app_tx.send(AppEvent::RemoteTrack { kind, ssrc });
            }
            EngineEventKind::Transport(state) => self.handle_transport_state(state),
        }
    }

    fn handle_transport_state(&mut self, transport: TransportState) {
        match transport {
            TransportState::Connected => {
                if self.state == NegotiationState::Connected {
                    // транспорт вернулся после просадки
                    let _ = self.app_tx.send(AppEvent::ConnectionRecovered);
                } else if matches!(self.state, NegotiationState::Negotiating(_)) {
                    self.set_state(NegotiationState::Connected);
                }
            }
            TransportState::Disconnected => {
                if matches!(
                    self.state,
                    NegotiationState::Negotiating(_) | NegotiationState::Connected
                ) {
                    let _ = self.app_tx.send(AppEvent::ConnectionProblem);
                }
            }
            TransportState::Failed => {
                if matches!(
                    self.state,
                    NegotiationState::Negotiating(_) | NegotiationState::Connected
                ) {
                    self.set_state(NegotiationState::Failed);
                    let _ = self.app_tx.send(AppEvent::Error {
                        message: "transport failed".into(),
                        retryable: true,
                    });
                }
            }
            TransportState::Connecting | TransportState::Closed => {}
        }
    }

    /// Явное завершение звонка. Идемпотентно.
    pub async fn hang_up(&mut self) {
        if self.state == NegotiationState::Ended {
            return;
        }
        log("hanging up");
        if let Some(engine) = self.engine.take() {
            engine.close().await;
        }
        // с этого момента события старой попытки отфильтровываются
        self.connection_id = None;
        self.pending_remote_candidates.clear();
        self.remote_description_set = false;
        self.tracks = None;
        self.set_state(NegotiationState::Ended);
    }
}
