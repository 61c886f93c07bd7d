use serde::{Deserialize, Serialize};

use super::Entity;

/// 房间（会话列表条目）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 创建时间（UTC 毫秒）
    pub created_at: i64,
    /// 最后一条消息时间（UTC 毫秒）
    #[serde(default)]
    pub last_message_at: Option<i64>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_private: bool,
}

impl Room {
    /// 最近活跃时间：有消息取最后消息时间，否则取创建时间
    pub fn last_activity_at(&self) -> i64 {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

impl Entity for Room {
    type Id = String;
    type Key = i64;

    fn id(&self) -> &String {
        &self.id
    }

    fn ordering_key(&self) -> i64 {
        self.last_activity_at()
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("room without id".to_string());
        }
        Ok(())
    }
}

/// 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 服务端顺序 id，单调递增
    pub id: u64,
    pub room_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

impl Entity for Message {
    type Id = u64;
    type Key = u64;

    fn id(&self) -> &u64 {
        &self.id
    }

    fn ordering_key(&self) -> u64 {
        self.id
    }

    fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("message without id".to_string());
        }
        if self.room_id.is_empty() {
            return Err(format!("message {} without room_id", self.id));
        }
        if self.sender_id.is_empty() {
            return Err(format!("message {} without sender_id", self.id));
        }
        Ok(())
    }
}

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    #[default]
    Offline,
}

/// 用户（房间成员）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub updated_at: i64,
}

impl Entity for User {
    type Id = String;
    type Key = String;

    fn id(&self) -> &String {
        &self.id
    }

    /// 按显示名（不区分大小写）排序
    fn ordering_key(&self) -> String {
        self.name.to_lowercase()
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("user without id".to_string());
        }
        Ok(())
    }
}
