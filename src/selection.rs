//! "Next pending item" selection (§4.3). Two modes: the default smart
//! algorithm (hierarchy + dependency aware) and a simple fallback.

use crate::error::Result;
use crate::model::{ItemStatus, TodoItem};
use crate::store::Store;

struct Candidate {
    priority: u8,
    parent_position: i64,
    item_position: i64,
    item: TodoItem,
}

/// Enumerates roots in natural order and emits candidates per the four
/// rules in §4.3, then returns the lowest-(priority, parent_position,
/// item_position) one.
pub fn next_pending_smart(store: &Store, list_id: i64) -> Result<Option<TodoItem>> {
    let roots = store.get_root_items(list_id)?;
    let mut candidates: Vec<Candidate> = Vec::new();

    for root in &roots {
        let children = store.get_item_children(root.id)?;
        match root.status {
            ItemStatus::InProgress => {
                for child in &children {
                    if child.status == ItemStatus::Pending && !store.is_item_blocked(child.id)? {
                        candidates.push(Candidate {
                            priority: 1,
                            parent_position: root.position,
                            item_position: child.position,
                            item: child.clone(),
                        });
                    }
                }
            }
            ItemStatus::Pending => {
                if store.is_item_blocked(root.id)? {
                    continue;
                }
                let pending_children: Vec<&TodoItem> =
                    children.iter().filter(|c| c.status == ItemStatus::Pending).collect();
                if !pending_children.is_empty() {
                    if let Some(first_unblocked) = pending_children
                        .into_iter()
                        .find(|c| !store.is_item_blocked(c.id).unwrap_or(true))
                    {
                        candidates.push(Candidate {
                            priority: 2,
                            parent_position: root.position,
                            item_position: first_unblocked.position,
                            item: first_unblocked.clone(),
                        });
                    }
                } else {
                    candidates.push(Candidate {
                        priority: 3,
                        parent_position: root.position,
                        item_position: root.position,
                        item: root.clone(),
                    });
                }
            }
            ItemStatus::Completed | ItemStatus::Failed => {}
        }
    }

    for item in store.get_list_items(list_id, Some(ItemStatus::Pending), None)? {
        let Some(parent_id) = item.parent_item_id else {
            continue;
        };
        let Some(parent) = store.get_item_by_id(parent_id)? else {
            continue;
        };
        if matches!(parent.status, ItemStatus::Completed | ItemStatus::Failed) && !store.is_item_blocked(item.id)? {
            candidates.push(Candidate {
                priority: 4,
                parent_position: parent.position,
                item_position: item.position,
                item,
            });
        }
    }

    candidates.sort_by_key(|c| (c.priority, c.parent_position, c.item_position));
    Ok(candidates.into_iter().next().map(|c| c.item))
}

/// First pending item in natural order that is neither blocked by a
/// cross-list dependency nor has an incomplete parent.
pub fn next_pending_simple(store: &Store, list_id: i64) -> Result<Option<TodoItem>> {
    for item in store.get_list_items(list_id, Some(ItemStatus::Pending), None)? {
        if store.is_item_blocked(item.id)? {
            continue;
        }
        let parent_ok = match item.parent_item_id {
            None => true,
            Some(parent_id) => store
                .get_item_by_id(parent_id)?
                .map(|p| p.status == ItemStatus::Completed)
                .unwrap_or(false),
        };
        if parent_ok {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::update_item_status;
    use crate::model::ListType;
    use std::collections::HashMap;

    fn setup() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let list = store
            .create_list("proj1", "Project One", None, ListType::Sequential, &HashMap::new())
            .unwrap();
        (store, list.id)
    }

    #[test]
    fn in_progress_root_prefers_its_pending_child() {
        let (store, list_id) = setup();
        let p1 = store.create_item(list_id, "p1", "Parent", None, 1, &HashMap::new()).unwrap();
        let a = store.create_item(list_id, "a", "A", Some(p1.id), 1, &HashMap::new()).unwrap();
        store.create_item(list_id, "b", "B", Some(p1.id), 2, &HashMap::new()).unwrap();
        update_item_status(&store, a.id, ItemStatus::Completed, None).unwrap();
        // p1 is now in_progress (a completed, b pending); next pending is b.
        let next = next_pending_smart(&store, list_id).unwrap().unwrap();
        assert_eq!(next.item_key, "b");
    }

    #[test]
    fn pending_leaf_root_wins_priority_three() {
        let (store, list_id) = setup();
        store.create_item(list_id, "solo", "Solo", None, 1, &HashMap::new()).unwrap();
        let next = next_pending_smart(&store, list_id).unwrap().unwrap();
        assert_eq!(next.item_key, "solo");
    }

    #[test]
    fn blocked_root_yields_no_candidate() {
        let (store, list_id) = setup();
        let other_list = store.create_list("other", "Other", None, ListType::Sequential, &HashMap::new()).unwrap();
        let required = store.create_item(other_list.id, "req", "Req", None, 1, &HashMap::new()).unwrap();
        let dependent = store.create_item(list_id, "dep", "Dep", None, 1, &HashMap::new()).unwrap();
        store
            .create_item_dependency(dependent.id, required.id, crate::model::DependencyType::Requires, &HashMap::new())
            .unwrap();
        assert!(next_pending_smart(&store, list_id).unwrap().is_none());
    }

    #[test]
    fn orphan_pending_child_surfaces_last() {
        let (store, list_id) = setup();
        let p1 = store.create_item(list_id, "p1", "Parent", None, 1, &HashMap::new()).unwrap();
        let a = store.create_item(list_id, "a", "A", Some(p1.id), 1, &HashMap::new()).unwrap();
        store.update_item(p1.id, None, Some(ItemStatus::Completed), None, None, None, None).unwrap();
        // p1 is completed, but a was left pending (simulating an orphan).
        let next = next_pending_smart(&store, list_id).unwrap().unwrap();
        assert_eq!(next.item_key, a.item_key);
    }

    #[test]
    fn blocked_orphan_pending_child_is_not_surfaced() {
        let (store, list_id) = setup();
        let p1 = store.create_item(list_id, "p1", "Parent", None, 1, &HashMap::new()).unwrap();
        let a = store.create_item(list_id, "a", "A", Some(p1.id), 1, &HashMap::new()).unwrap();
        store.update_item(p1.id, None, Some(ItemStatus::Completed), None, None, None, None).unwrap();
        let blocker = store.create_item(list_id, "blocker", "Blocker", None, 2, &HashMap::new()).unwrap();
        store
            .create_item_dependency(a.id, blocker.id, crate::model::DependencyType::Requires, &HashMap::new())
            .unwrap();
        // a is an orphan candidate (priority 4) but still blocked by an
        // unfinished dependency, so the unblocked blocker item (priority 3)
        // must win instead of the blocked orphan.
        let next = next_pending_smart(&store, list_id).unwrap().unwrap();
        assert_eq!(next.item_key, "blocker");
    }
}
