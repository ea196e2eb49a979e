use crate::logger::log;
use crate::server::registry::RoomRegistry;
use crate::signaling::{ClientMessage, ServerMessage, StatusUpdate};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Сигнальный релей: принимает сообщения каналов, обновляет реестр и
/// пересылает сообщения участникам нужной комнаты.
///
/// Содержимое SDP и кандидатов не разбирается и не проверяется — релей
/// только маршрутизирует. Доставка fire-and-forget: без подтверждений,
/// повторов и таймаутов; если канал получателя закрыт, сообщение молча
/// теряется.
pub struct SignalingRelay {
    inner: Mutex<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    registry: RoomRegistry,
    channels: HashMap<String, UnboundedSender<ServerMessage>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelayInner::default()),
        }
    }

    /// Регистрирует исходящий канал нового подключения
    pub fn connect(&self, channel_id: &str, tx: UnboundedSender<ServerMessage>) {
        log(&format!("channel connected: {channel_id}"));
        self.inner
            .lock()
            .unwrap()
            .channels
            .insert(channel_id.to_string(), tx);
    }

    /// Канал закрылся: убираем участника и оповещаем его комнату
    pub fn disconnect(&self, channel_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.channels.remove(channel_id);
        let name = inner
            .registry
            .display_name_of(channel_id)
            .map(str::to_string);
        if let Some(room_id) = inner.registry.leave(channel_id) {
            let name = name.unwrap_or_default();
            log(&format!("{name} disconnected from room {room_id}"));
            inner.broadcast(
                &room_id,
                None,
                ServerMessage::Status(StatusUpdate {
                    kind: "left".into(),
                    text: format!("{name} left"),
                }),
            );
        }
    }

    /// Обрабатывает одно сообщение клиента
    pub fn handle_message(&self, channel_id: &str, msg: ClientMessage) {
        let mut inner = self.inner.lock().unwrap();
        match msg {
            ClientMessage::Join {
                room_id,
                display_name,
            } => {
                inner.registry.join(channel_id, &room_id, &display_name);
                let name = inner
                    .registry
                    .display_name_of(channel_id)
                    .unwrap_or_default()
                    .to_string();
                log(&format!("{name} ({channel_id}) joining room {room_id}"));
                inner.broadcast(
                    &room_id,
                    Some(channel_id),
                    ServerMessage::PeerJoined {
                        channel_id: channel_id.to_string(),
                        display_name: name.clone(),
                    },
                );
                inner.broadcast(
                    &room_id,
                    None,
                    ServerMessage::Status(StatusUpdate {
                        kind: "joined".into(),
                        text: format!("{name} joined"),
                    }),
                );
            }
            ClientMessage::Rename { display_name } => {
                // без рассылки; от невошедших игнорируем
                if !inner.registry.rename(channel_id, &display_name) {
                    log(&format!("rename from unjoined channel {channel_id} ignored"));
                }
            }
            ClientMessage::Offer {
                room_id,
                sdp_description,
            } => {
                inner.forward_description(channel_id, &room_id, sdp_description, true);
            }
            ClientMessage::Answer {
                room_id,
                sdp_description,
            } => {
                inner.forward_description(channel_id, &room_id, sdp_description, false);
            }
            ClientMessage::IceCandidate { room_id, candidate } => {
                if inner.registry.is_member(channel_id, &room_id) {
                    // кандидат уходит как есть, без изменений
                    inner.broadcast(
                        &room_id,
                        Some(channel_id),
                        ServerMessage::IceCandidate(candidate),
                    );
                } else {
                    log(&format!(
                        "ice_candidate from non-member {channel_id} dropped"
                    ));
                }
            }
            ClientMessage::Status(update) => {
                // всей комнате, включая отправителя
                if let Some(room_id) = inner.registry.room_of(channel_id).map(str::to_string) {
                    inner.broadcast(&room_id, None, ServerMessage::Status(update));
                } else {
                    log(&format!("status from unjoined channel {channel_id} dropped"));
                }
            }
        }
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayInner {
    fn send_to(&self, channel_id: &str, msg: ServerMessage) {
        if let Some(tx) = self.channels.get(channel_id) {
            // получатель мог отвалиться — это не ошибка
            let _ = tx.send(msg);
        }
    }

    fn broadcast(&self, room_id: &str, except: Option<&str>, msg: ServerMessage) {
        for member in self.registry.members_of(room_id, except) {
            self.send_to(&member, msg.clone());
        }
    }

    fn forward_description(&mut self, sender: &str, room_id: &str, sdp: Value, is_offer: bool) {
        if !self.registry.is_member(sender, room_id) {
            log(&format!(
                "{} from non-member {sender} dropped",
                if is_offer { "offer" } else { "answer" }
            ));
            return;
        }
        let sender_name = self
            .registry
            .display_name_of(sender)
            .unwrap_or_default()
            .to_string();
        log(&format!(
            "{} from {sender_name} to room {room_id}",
            if is_offer { "Offer" } else { "Answer" }
        ));
        let msg = if is_offer {
            ServerMessage::Offer {
                sdp_description: sdp,
                sender_id: sender.to_string(),
                sender_name,
            }
        } else {
            ServerMessage::Answer {
                sdp_description: sdp,
                sender_id: sender.to_string(),
                sender_name,
            }
        };
        self.broadcast(room_id, Some(sender), msg);
    }
}
