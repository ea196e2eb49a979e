use crate::config::DEFAULT_DISPLAY_NAME;
use std::collections::{HashMap, HashSet};

/// Запись об одном участнике
#[derive(Debug, Clone)]
struct Endpoint {
    display_name: String,
    room_id: String,
}

/// Реестр комнат: кто сейчас в какой комнате.
///
/// Чисто in-memory, без персистентности. Комната создаётся первым join
/// и исчезает вместе с последним участником. Все мутации выполняются
/// под внешним замком релея, поэтому реестру своя синхронизация не нужна.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    endpoints: HashMap<String, Endpoint>,
    rooms: HashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет участника в комнату.
    ///
    /// Членство эксклюзивно: если участник состоял в другой комнате, его
    /// сначала убирают оттуда. Повторный join в ту же комнату обновляет
    /// только имя.
    pub fn join(&mut self, channel_id: &str, room_id: &str, display_name: &str) {
        let display_name = if display_name.is_empty() {
            DEFAULT_DISPLAY_NAME
        } else {
            display_name
        };
        if let Some(existing) = self.endpoints.get_mut(channel_id) {
            if existing.room_id == room_id {
                existing.display_name = display_name.to_string();
                return;
            }
            let old_room = existing.room_id.clone();
            self.remove_from_room(channel_id, &old_room);
        }
        self.endpoints.insert(
            channel_id.to_string(),
            Endpoint {
                display_name: display_name.to_string(),
                room_id: room_id.to_string(),
            },
        );
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(channel_id.to_string());
    }

    /// Убирает участника из его комнаты; возвращает её ID, чтобы
    /// вызывающий мог оповестить оставшихся
    pub fn leave(&mut self, channel_id: &str) -> Option<String> {
        let endpoint = self.endpoints.remove(channel_id)?;
        self.remove_from_room(channel_id, &endpoint.room_id);
        Some(endpoint.room_id)
    }

    fn remove_from_room(&mut self, channel_id: &str, room_id: &str) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.remove(channel_id);
            // пустые комнаты не храним
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    /// Все участники комнаты, кроме указанного
    pub fn members_of(&self, room_id: &str, except: Option<&str>) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|id| Some(id.as_str()) != except)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn display_name_of(&self, channel_id: &str) -> Option<&str> {
        self.endpoints
            .get(channel_id)
            .map(|e| e.display_name.as_str())
    }

    pub fn room_of(&self, channel_id: &str) -> Option<&str> {
        self.endpoints.get(channel_id).map(|e| e.room_id.as_str())
    }

    pub fn is_member(&self, channel_id: &str, room_id: &str) -> bool {
        self.room_of(channel_id) == Some(room_id)
    }

    /// Обновляет имя уже вошедшего участника
    pub fn rename(&mut self, channel_id: &str, display_name: &str) -> bool {
        match self.endpoints.get_mut(channel_id) {
            Some(endpoint) => {
                endpoint.display_name = display_name.to_string();
                true
            }
            None => false,
        }
    }
}
