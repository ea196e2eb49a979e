use crate::error::SignalError;
use crate::logger::log;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Сколько ждём подходящий кандидат от проверяемого сервера
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Проверяет доступность одного ICE сервера.
///
/// Поднимаем одноразовый peer connection только с этим сервером и смотрим
/// на собранные кандидаты: для STUN ждём srflx, для TURN — relay. Если за
/// таймаут подходящего кандидата нет, сервер считается недоступным.
pub async fn check_ice_server_availability(config: &ServerConfig) -> Result<bool, SignalError> {
    let url = add_ice_url_scheme(config);
    log(&format!("probing ICE server '{}'", url));

    let ice_server = RTCIceServer {
        urls: vec![url],
        username: config.username.clone().unwrap_or_default(),
        credential: config.credential.clone().unwrap_or_default(),
    };
    let rtc_config = RTCConfiguration {
        ice_servers: vec![ice_server],
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    let pc = api.new_peer_connection(rtc_config).await?;

    let (state_tx, mut state_rx) = mpsc::channel(10);
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        let tx = state_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(state).await;
        });
        Box::pin(async {})
    }));

    let (candidate_tx, mut candidate_rx) = mpsc::channel(10);
    let server_type = config.r#type.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = candidate_tx.clone();
        let server_type = server_type.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                let matched = c
                    .to_json()
                    .map(|json| {
                        // для STUN серверов ищем srflx, для TURN — relay
                        (server_type == "stun" && json.candidate.contains("srflx"))
                            || (server_type == "turn" && json.candidate.contains("relay"))
                    })
                    .unwrap_or(false);
                if matched {
                    let _ = tx.send(true).await;
                }
            }
        })
    }));

    // data channel и offer нужны только чтобы запустить сбор кандидатов
    pc.create_data_channel("probe", None).await?;
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    let available = tokio::select! {
        result = timeout(PROBE_TIMEOUT, candidate_rx.recv()) => {
            matches!(result, Ok(Some(true)))
        }
        // сбор закончился, а подходящего кандидата так и не было
        _ = async {
            while let Some(state) = state_rx.recv().await {
                if state == RTCIceGathererState::Complete {
                    break;
                }
            }
        } => false,
    };

    log(&format!(
        "ICE server '{}' available: {}",
        config.url, available
    ));
    let _ = pc.close().await;
    Ok(available)
}

/// Разбор собранных кандидатов по типам, с предупреждением если нет relay
pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    log(&format!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    ));

    if relay_count == 0 {
        log("WARNING: No TURN relay candidates found! Connection through NAT may fail.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(desc: &str) -> IceCandidate {
        IceCandidate {
            candidate: desc.to_string(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            connection_id: "test".into(),
        }
    }

    #[test]
    fn analysis_does_not_panic_on_unknown_types() {
        analyze_candidates(&[
            cand("candidate:1 1 udp 2130706431 192.168.1.2 54321 typ host"),
            cand("candidate:2 1 udp 1677729535 1.2.3.4 35782 typ srflx"),
            cand("candidate:3 1 udp 41885695 5.6.7.8 3478 typ relay"),
            cand("candidate:4 1 udp 1 9.9.9.9 1 typ prflx"),
        ]);
    }
}
