//! 同步会话演示
//!
//! 用内存中的假服务端展示房间列表、消息分页、实时事件和已读游标合并

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatsync_sdk::{
    CollectionTransport, Entity, FeedEvent, FetchPage, Message, PagedFetcher, PositionWriter,
    RealTimeFeed, Room, Scope, SessionTransport, SyncConfig, SyncError, SyncSession, User,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// 按 id 倒序分页的消息历史
struct MessageHistory {
    messages: Vec<Message>,
}

#[async_trait]
impl PagedFetcher<Message> for MessageHistory {
    async fn fetch(
        &self,
        scope: &Scope,
        cursor: Option<u64>,
        count: usize,
    ) -> chatsync_sdk::Result<FetchPage<Message>> {
        let room_id = scope.room_id().unwrap_or_default();
        let older: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && cursor.map_or(true, |c| m.id < c))
            .cloned()
            .collect();
        let start = older.len().saturating_sub(count);
        Ok(FetchPage::new(older[start..].to_vec(), start > 0))
    }
}

/// 一次返回全部数据
struct OnePage<E> {
    items: Vec<E>,
}

#[async_trait]
impl<E: Entity> PagedFetcher<E> for OnePage<E> {
    async fn fetch(
        &self,
        _scope: &Scope,
        cursor: Option<E::Id>,
        _count: usize,
    ) -> chatsync_sdk::Result<FetchPage<E>> {
        if cursor.is_some() {
            return Ok(FetchPage::new(Vec::new(), false));
        }
        Ok(FetchPage::new(self.items.clone(), false))
    }
}

/// 按作用域分发的实时通道
struct Hub<E: Entity> {
    senders: Mutex<HashMap<Scope, mpsc::Sender<FeedEvent<E>>>>,
}

impl<E: Entity> Hub<E> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: Mutex::new(HashMap::new()),
        })
    }

    async fn push(&self, scope: &Scope, event: FeedEvent<E>) {
        let sender = self.senders.lock().get(scope).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl<E: Entity> RealTimeFeed<E> for Hub<E> {
    async fn subscribe(
        &self,
        scope: &Scope,
        buffer: usize,
    ) -> chatsync_sdk::Result<mpsc::Receiver<FeedEvent<E>>> {
        let (tx, rx) = mpsc::channel(buffer);
        self.senders.lock().insert(scope.clone(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, scope: &Scope) {
        self.senders.lock().remove(scope);
    }
}

struct PrintPositions;

#[async_trait]
impl PositionWriter for PrintPositions {
    async fn send_position(&self, scope: &Scope, value: u64) -> chatsync_sdk::Result<()> {
        println!("   📤 上报已读游标: {} -> {}", scope, value);
        Ok(())
    }
}

fn room(id: &str, last_message_at: i64) -> Room {
    Room {
        id: id.to_string(),
        name: format!("房间 {}", id),
        created_at: 1,
        last_message_at: Some(last_message_at),
        unread_count: 0,
        is_private: false,
    }
}

fn message(id: u64, room_id: &str) -> Message {
    Message {
        id,
        room_id: room_id.to_string(),
        sender_id: "alice".to_string(),
        text: format!("第 {} 条消息", id),
        created_at: id as i64,
        updated_at: None,
        deleted: false,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 同步会话演示\n");
    println!("====================================\n");

    let rooms_hub = Hub::<Room>::new();
    let messages_hub = Hub::<Message>::new();
    let members_hub = Hub::<User>::new();

    let transport = SessionTransport {
        rooms: CollectionTransport::new(
            Arc::new(OnePage {
                items: vec![room("general", 5), room("random", 10)],
            }),
            rooms_hub.clone(),
        ),
        messages: CollectionTransport::new(
            Arc::new(MessageHistory {
                messages: (1..=45).map(|id| message(id, "general")).collect(),
            }),
            messages_hub.clone(),
        ),
        members: CollectionTransport::new(Arc::new(OnePage { items: Vec::new() }), members_hub),
        positions: Arc::new(PrintPositions),
    };

    let config = SyncConfig::builder()
        .default_page_size(20)
        .debounce_interval(Duration::from_millis(200))
        .build()?;
    let session = SyncSession::new("me", config, transport)?;

    // 房间列表
    println!("【房间列表】");
    let rooms = session.joined_rooms().await?;
    rooms.set_observer(|change| {
        println!("   🔔 房间列表变更: {:?} ({:?})", change.kind, change.reason);
    });
    rooms.fetch_next_page().await?;
    for room in rooms.current_entities() {
        println!("   - {} (活跃于 {})", room.id, room.last_activity_at());
    }
    println!("   状态: {}\n", rooms.state().summary());

    // 消息分页，直到拉完
    println!("【消息分页】");
    let messages = session.room_messages("general").await?;
    loop {
        match messages.fetch_next_page().await {
            Ok(outcome) => println!(
                "   📄 插入 {} 条，共 {} 条，分页状态 {}",
                outcome.inserted,
                messages.len(),
                outcome.state.paged
            ),
            Err(SyncError::NothingToFetch) => {
                println!("   ✅ 历史消息已全部拉取\n");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    // 实时事件：general 收到新消息，房间移到最前
    println!("【实时事件】");
    messages_hub
        .push(messages.scope(), FeedEvent::EntityCreated(message(46, "general")))
        .await;
    rooms_hub
        .push(rooms.scope(), FeedEvent::EntityUpdated(room("general", 46)))
        .await;
    sleep(Duration::from_millis(50)).await;
    let order: Vec<String> = rooms.current_entities().into_iter().map(|r| r.id).collect();
    println!("   房间顺序: {:?}", order);
    println!("   最新消息: {:?}\n", messages.current_entities().last().map(|m| m.id));

    // 已读游标：快速滚动只上报最大值
    println!("【已读游标合并】");
    let (a, b, c) = tokio::join!(
        messages.mark_read_up_to(40),
        messages.mark_read_up_to(46),
        messages.mark_read_up_to(43),
    );
    println!("   结果: {:?} {:?} {:?}\n", a, b, c);

    let stats = session.events().get_stats();
    println!("📊 会话事件统计: 共 {} 个", stats.total_events);
    for (event_type, count) in &stats.events_by_type {
        println!("   {}: {}", event_type, count);
    }

    session.shutdown().await;
    println!("\n✅ 演示完成");
    Ok(())
}
