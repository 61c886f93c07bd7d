use std::cmp::Ordering;
use std::collections::HashMap;

use super::ChangeKind;
use crate::model::{Entity, SortOrder};

/// 有序集合存储
///
/// 不变量：
/// - 序列中不存在两个相同 id 的实体
/// - 任何操作结束后序列都按 (ordering key, id) 完全有序
///
/// `keys` 记录每个 id 当前的 ordering key，用于二分定位，定位开销为 O(log n)。
#[derive(Debug, Clone)]
pub struct OrderedCollectionStore<E: Entity> {
    order: SortOrder,
    entries: Vec<E>,
    keys: HashMap<E::Id, E::Key>,
}

fn compare<E: Entity>(
    order: SortOrder,
    key: &E::Key,
    id: &E::Id,
    other_key: &E::Key,
    other_id: &E::Id,
) -> Ordering {
    let by_key = match order {
        SortOrder::Ascending => key.cmp(other_key),
        SortOrder::Descending => other_key.cmp(key),
    };
    by_key.then_with(|| id.cmp(other_id))
}

impl<E: Entity> OrderedCollectionStore<E> {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            entries: Vec::new(),
            keys: HashMap::new(),
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.keys.contains_key(id)
    }

    pub fn entities(&self) -> &[E] {
        &self.entries
    }

    /// 时间点快照，之后的修改不会影响返回值
    pub fn snapshot(&self) -> Vec<E> {
        self.entries.clone()
    }

    pub fn first(&self) -> Option<&E> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&E> {
        self.entries.last()
    }

    pub fn get(&self, id: &E::Id) -> Option<&E> {
        self.position_of(id).map(|index| &self.entries[index])
    }

    pub fn position_of(&self, id: &E::Id) -> Option<usize> {
        let key = self.keys.get(id)?;
        let order = self.order;
        self.entries
            .binary_search_by(|entry| {
                compare::<E>(order, &entry.ordering_key(), entry.id(), key, id)
            })
            .ok()
    }

    fn insertion_point(&self, key: &E::Key, id: &E::Id) -> usize {
        let order = self.order;
        match self.entries.binary_search_by(|entry| {
            compare::<E>(order, &entry.ordering_key(), entry.id(), key, id)
        }) {
            Ok(index) | Err(index) => index,
        }
    }

    /// 插入新实体；id 已存在时不做任何事（调用方应改用 update）
    pub fn insert(&mut self, entity: E) -> Option<ChangeKind> {
        if self.keys.contains_key(entity.id()) {
            return None;
        }
        let key = entity.ordering_key();
        let index = self.insertion_point(&key, entity.id());
        self.keys.insert(entity.id().clone(), key);
        self.entries.insert(index, entity);
        debug_assert!(self.is_consistent());
        Some(ChangeKind::Insert { index })
    }

    /// 用新快照替换已有实体，必要时重新定位
    ///
    /// 先移除再二分找回插入点，不做整体重排。
    pub fn update(&mut self, entity: E) -> Option<ChangeKind> {
        let from = self.position_of(entity.id())?;
        self.entries.remove(from);

        let key = entity.ordering_key();
        let to = self.insertion_point(&key, entity.id());
        self.keys.insert(entity.id().clone(), key);
        self.entries.insert(to, entity);
        debug_assert!(self.is_consistent());

        if from == to {
            Some(ChangeKind::Update { index: to })
        } else {
            Some(ChangeKind::Move { from, to })
        }
    }

    /// 移除实体；不存在时是 no-op
    pub fn remove(&mut self, id: &E::Id) -> Option<ChangeKind> {
        let index = self.position_of(id)?;
        self.entries.remove(index);
        self.keys.remove(id);
        debug_assert!(self.is_consistent());
        Some(ChangeKind::Remove { index })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// 校验排序和唯一性不变量
    pub fn is_consistent(&self) -> bool {
        if self.entries.len() != self.keys.len() {
            return false;
        }
        let sorted = self.entries.windows(2).all(|pair| {
            compare::<E>(
                self.order,
                &pair[0].ordering_key(),
                pair[0].id(),
                &pair[1].ordering_key(),
                pair[1].id(),
            ) == Ordering::Less
        });
        sorted
            && self
                .entries
                .iter()
                .all(|e| self.keys.get(e.id()) == Some(&e.ordering_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Room};

    fn room(id: &str, created_at: i64, last: Option<i64>) -> Room {
        Room {
            id: id.to_string(),
            name: id.to_string(),
            created_at,
            last_message_at: last,
            unread_count: 0,
            is_private: false,
        }
    }

    fn message(id: u64) -> Message {
        Message {
            id,
            room_id: "r1".to_string(),
            sender_id: "u1".to_string(),
            text: format!("m{}", id),
            created_at: id as i64,
            updated_at: None,
            deleted: false,
        }
    }

    fn ids(store: &OrderedCollectionStore<Room>) -> Vec<&str> {
        store.entities().iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_insert_sorted_and_unique() {
        let mut store = OrderedCollectionStore::new(SortOrder::Ascending);
        assert_eq!(store.insert(message(5)), Some(ChangeKind::Insert { index: 0 }));
        assert_eq!(store.insert(message(1)), Some(ChangeKind::Insert { index: 0 }));
        assert_eq!(store.insert(message(3)), Some(ChangeKind::Insert { index: 1 }));
        assert_eq!(store.insert(message(3)), None);
        let order: Vec<u64> = store.entities().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut store = OrderedCollectionStore::new(SortOrder::Descending);
        store.insert(room("b", 10, None));
        store.insert(room("a", 10, None));
        store.insert(room("c", 10, None));
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_update_in_place_vs_move() {
        let mut store = OrderedCollectionStore::new(SortOrder::Descending);
        store.insert(room("a", 1, Some(5)));
        store.insert(room("b", 1, Some(10)));
        assert_eq!(ids(&store), vec!["b", "a"]);

        let mut renamed = room("a", 1, Some(5));
        renamed.name = "renamed".to_string();
        assert_eq!(store.update(renamed), Some(ChangeKind::Update { index: 1 }));
        assert_eq!(store.get(&"a".to_string()).unwrap().name, "renamed");

        assert_eq!(
            store.update(room("a", 1, Some(15))),
            Some(ChangeKind::Move { from: 1, to: 0 })
        );
        assert_eq!(ids(&store), vec!["a", "b"]);
    }

    #[test]
    fn test_update_absent_is_noop() {
        let mut store = OrderedCollectionStore::new(SortOrder::Descending);
        assert_eq!(store.update(room("a", 1, None)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_idempotent() {
        let mut store = OrderedCollectionStore::new(SortOrder::Ascending);
        store.insert(message(1));
        store.insert(message(2));
        assert_eq!(store.remove(&1), Some(ChangeKind::Remove { index: 0 }));
        assert_eq!(store.remove(&1), None);
        assert_eq!(store.remove(&42), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sort_invariant_under_random_operations() {
        // 简单 LCG，保证可复现
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        let mut store = OrderedCollectionStore::new(SortOrder::Descending);
        for _ in 0..2000 {
            let id = format!("room{}", next() % 40);
            let activity = (next() % 50) as i64;
            match next() % 3 {
                0 => {
                    store.insert(room(&id, 0, Some(activity)));
                }
                1 => {
                    store.update(room(&id, 0, Some(activity)));
                }
                _ => {
                    store.remove(&id);
                }
            }
            assert!(store.is_consistent());
        }
    }

    #[test]
    fn test_move_indices_match_final_positions() {
        let mut rooms = OrderedCollectionStore::new(SortOrder::Descending);
        for (id, t) in [("a", 40), ("b", 30), ("c", 20), ("d", 10)] {
            rooms.insert(room(id, t, None));
        }
        assert_eq!(
            rooms.update(room("d", 10, Some(35))),
            Some(ChangeKind::Move { from: 3, to: 1 })
        );
        assert_eq!(rooms.position_of(&"d".to_string()), Some(1));
        assert_eq!(
            rooms.update(room("a", 40, Some(1))),
            Some(ChangeKind::Move { from: 0, to: 3 })
        );
        assert_eq!(ids(&rooms), vec!["d", "b", "c", "a"]);
    }
}
