use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Служебный статус, рассылаемый всей комнате
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Сообщения клиент → сервер
///
/// SDP и кандидаты передаются как непрозрачный JSON: сервер их не
/// разбирает и не проверяет, только маршрутизирует по комнате.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join {
        room_id: String,
        display_name: String,
    },
    #[serde(rename = "rename")]
    Rename { display_name: String },
    #[serde(rename = "offer")]
    Offer {
        room_id: String,
        sdp_description: Value,
    },
    #[serde(rename = "answer")]
    Answer {
        room_id: String,
        sdp_description: Value,
    },
    #[serde(rename = "ice_candidate")]
    IceCandidate { room_id: String, candidate: Value },
    #[serde(rename = "status")]
    Status(StatusUpdate),
}

/// Сообщения сервер → клиент
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "peer-joined")]
    PeerJoined {
        channel_id: String,
        display_name: String,
    },
    #[serde(rename = "offer")]
    Offer {
        sdp_description: Value,
        sender_id: String,
        sender_name: String,
    },
    #[serde(rename = "answer")]
    Answer {
        sdp_description: Value,
        sender_id: String,
        sender_name: String,
    },
    /// Кандидат пересылается как есть, без изменений
    #[serde(rename = "ice_candidate")]
    IceCandidate(Value),
    #[serde(rename = "status")]
    Status(StatusUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_names() {
        let msg = ClientMessage::Join {
            room_id: "room1".into(),
            display_name: "Alice".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["data"]["room_id"], "room1");

        let msg = ClientMessage::IceCandidate {
            room_id: "room1".into(),
            candidate: serde_json::json!({"candidate": "candidate:1 1 udp ..."}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ice_candidate");
    }

    #[test]
    fn server_candidate_is_passed_through_unchanged() {
        let raw = serde_json::json!({
            "candidate": "candidate:842163049 1 udp 1677729535 1.2.3.4 35782 typ srflx",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "connection_id": "abc123"
        });
        let msg = ServerMessage::IceCandidate(raw.clone());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ice_candidate");
        assert_eq!(json["data"], raw);
    }

    #[test]
    fn peer_joined_uses_kebab_name() {
        let msg = ServerMessage::PeerJoined {
            channel_id: "c1".into(),
            display_name: "Bob".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("peer-joined"));
    }
}
