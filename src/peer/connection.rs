use crate::error::SignalError;
use crate::logger::{dump_candidate, dump_selected_pair, log};
use crate::peer::engine::{
    EngineEvent, EngineEventKind, EngineFactory, MediaEngine, TransportState,
};
use crate::peer::ice::analyze_candidates;
use crate::peer::state::GRACE_PERIOD;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Локальные медиатреки в терминах webrtc-rs
pub type LocalTracks = Vec<Arc<dyn TrackLocal + Send + Sync>>;

/// Дефолтные ICE серверы: STUN плюс публичный TURN как запасной путь
static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun-0".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-turn-80".into(),
            r#type: "turn".into(),
            url: "turn:openrelay.metered.ca:80".into(),
            username: Some("openrelayproject".into()),
            credential: Some("openrelayproject".into()),
        },
        ServerConfig {
            id: "default-turn-443".into(),
            r#type: "turn".into(),
            url: "turn:openrelay.metered.ca:443".into(),
            username: Some("openrelayproject".into()),
            credential: Some("openrelayproject".into()),
        },
    ]
});

fn emit(events: &UnboundedSender<EngineEvent>, connection_id: &str, kind: EngineEventKind) {
    let _ = events.send(EngineEvent {
        connection_id: connection_id.to_string(),
        kind,
    });
}

/// Движок одного звонка поверх webrtc-rs
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WebRtcEngine {
    pub async fn new(
        connection_id: &str,
        custom_servers: Option<Vec<ServerConfig>>,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<Self, SignalError> {
        let mut media = RtcMediaEngine::default();
        media.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(custom_servers)).await?);

        let disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let local_candidates: Arc<Mutex<Vec<IceCandidate>>> = Arc::new(Mutex::new(Vec::new()));

        // Сбор локальных кандидатов: каждый сразу уходит наружу (Trickle-ICE)
        {
            let conn_id = connection_id.to_string();
            let events = events.clone();
            let collected = local_candidates.clone();
            pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                if let Some(c) = cand {
                    dump_candidate("LOCAL", &c);
                    if let Ok(init) = c.to_json() {
                        let ice = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            connection_id: conn_id.clone(),
                        };
                        collected.lock().unwrap().push(ice.clone());
                        emit(&events, &conn_id, EngineEventKind::LocalCandidate(ice));
                    }
                } else {
                    // cand == None означает конец сбора
                    log("ICE candidate gathering completed (null candidate received)");
                    analyze_candidates(&collected.lock().unwrap());
                }
                Box::pin(async {})
            }));
        }

        // Удалённые медиатреки
        {
            let conn_id = connection_id.to_string();
            let events = events.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let kind = track.kind().to_string();
                let ssrc = track.ssrc();
                log(&format!("Remote track received: kind={kind} ssrc={ssrc}"));
                emit(&events, &conn_id, EngineEventKind::RemoteTrack { kind, ssrc });
                Box::pin(async {})
            }));
        }

        // Состояние транспорта, с отложенной проверкой после просадки
        {
            let conn_id = connection_id.to_string();
            let events = events.clone();
            let task_slot = disconnect_task.clone();
            let pc_state = pc.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                log(&format!("Peer connection state changed to: {:?}", st));
                match st {
                    RTCPeerConnectionState::Connecting => {
                        emit(
                            &events,
                            &conn_id,
                            EngineEventKind::Transport(TransportState::Connecting),
                        );
                    }
                    RTCPeerConnectionState::Connected => {
                        // отменяем отложенный disconnect, если он был
                        if let Some(handle) = task_slot.lock().unwrap().take() {
                            handle.abort();
                        }
                        emit(
                            &events,
                            &conn_id,
                            EngineEventKind::Transport(TransportState::Connected),
                        );
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        // уже ожидаем? – ничего не делаем
                        if task_slot.lock().unwrap().is_some() {
                            return Box::pin(async {});
                        }
                        // о проблеме сообщаем сразу, о неудаче — после паузы
                        emit(
                            &events,
                            &conn_id,
                            EngineEventKind::Transport(TransportState::Disconnected),
                        );
                        let handle = tokio::spawn({
                            let pc = pc_state.clone();
                            let events = events.clone();
                            let conn_id = conn_id.clone();
                            async move {
                                log(&format!(
                                    "Grace period started, waiting {} s",
                                    GRACE_PERIOD.as_secs()
                                ));
                                dump_selected_pair(&pc, "BEFORE-FAIL").await;
                                sleep(GRACE_PERIOD).await;
                                let state_now = pc.connection_state();
                                if state_now != RTCPeerConnectionState::Connected {
                                    emit(
                                        &events,
                                        &conn_id,
                                        EngineEventKind::Transport(TransportState::Failed),
                                    );
                                } else {
                                    log("Connection recovered during grace period");
                                }
                            }
                        });
                        *task_slot.lock().unwrap() = Some(handle);
                    }
                    RTCPeerConnectionState::Closed => {
                        if let Some(handle) = task_slot.lock().unwrap().take() {
                            handle.abort();
                        }
                        emit(
                            &events,
                            &conn_id,
                            EngineEventKind::Transport(TransportState::Closed),
                        );
                    }
                    _ => {}
                }
                Box::pin(async {})
            }));
        }

        Ok(Self {
            pc,
            disconnect_task,
        })
    }
}

impl MediaEngine for WebRtcEngine {
    type Tracks = LocalTracks;

    async fn attach_local_tracks(&self, tracks: LocalTracks) -> Result<(), SignalError> {
        for track in tracks {
            self.pc.add_track(track).await?;
        }
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<Value, SignalError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(serde_json::to_value(&offer)?)
    }

    async fn create_local_answer(&self) -> Result<Value, SignalError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(serde_json::to_value(&answer)?)
    }

    async fn set_local_description(&self, description: Value) -> Result<(), SignalError> {
        let desc: RTCSessionDescription = serde_json::from_value(description)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: Value) -> Result<(), SignalError> {
        let desc: RTCSessionDescription = serde_json::from_value(description)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), SignalError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.disconnect_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Err(e) = self.pc.close().await {
            log(&format!("failed to close peer connection: {e}"));
        }
    }
}

/// Фабрика движков: хранит конфигурацию ICE серверов
#[derive(Clone, Default)]
pub struct WebRtcEngineFactory {
    ice_servers: Option<Vec<ServerConfig>>,
}

impl WebRtcEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Фабрика с пользовательскими ICE серверами
    pub fn with_ice_servers(servers: Vec<ServerConfig>) -> Result<Self, SignalError> {
        validate_servers(&servers)?;
        Ok(Self {
            ice_servers: Some(servers),
        })
    }

    /// Текущий список серверов (дефолтный, если свой не задан)
    pub fn ice_servers(&self) -> Vec<ServerConfig> {
        self.ice_servers
            .clone()
            .unwrap_or_else(|| DEFAULT_ICE_SERVERS.clone())
    }
}

impl EngineFactory for WebRtcEngineFactory {
    type Engine = WebRtcEngine;

    async fn create(
        &self,
        connection_id: &str,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<WebRtcEngine, SignalError> {
        WebRtcEngine::new(connection_id, self.ice_servers.clone(), events).await
    }
}

fn validate_servers(servers: &[ServerConfig]) -> Result<(), SignalError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(SignalError::InvalidIceServer(
                "server URL cannot be empty".into(),
            ));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(SignalError::InvalidIceServer(format!(
                "TURN server {} requires username and credential",
                server.url
            )));
        }
    }
    Ok(())
}

/// Создает конфигурацию для peer connection
fn rtc_config(custom_servers: Option<Vec<ServerConfig>>) -> RTCConfiguration {
    let servers = custom_servers.unwrap_or_else(|| DEFAULT_ICE_SERVERS.clone());
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(servers),
        // более агрессивные настройки ICE
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Перевод конфигурации серверов в формат webrtc-rs
pub fn to_rtc_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);
            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_without_credentials_is_rejected() {
        let servers = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "turn.example.com:3478".into(),
            username: None,
            credential: None,
        }];
        assert!(WebRtcEngineFactory::with_ice_servers(servers).is_err());
    }

    #[test]
    fn url_scheme_is_added_when_missing() {
        let servers = vec![ServerConfig {
            id: "s".into(),
            r#type: "stun".into(),
            url: "stun.example.com:3478".into(),
            username: None,
            credential: None,
        }];
        let rtc = to_rtc_ice_servers(servers);
        assert_eq!(rtc[0].urls[0], "stun:stun.example.com:3478");
    }
}
