use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, warn};
use uuid::Uuid;

use barangay_db::Database;
use barangay_db::models::NotificationRow;
use barangay_types::api::{Claims, UnreadCountResponse};
use barangay_types::events::GatewayEvent;
use barangay_types::models::Notification;

use crate::auth::{AppState, AppStateInner};
use crate::error::{internal, run_blocking};

/// Number of entries with `read == false`.
pub fn unread_count(list: &[Notification]) -> usize {
    list.iter().filter(|n| !n.read).count()
}

/// Process-wide cache of each user's notification list.
///
/// Lists are created on demand by `fetch` and replaced wholesale by `set`;
/// any write to a user's notifications drops their entry so the next fetch
/// reloads. Readers hold an `Arc` snapshot, so a replacement never changes a
/// list someone is already counting.
#[derive(Default)]
pub struct NotificationStore {
    inner: RwLock<CachedLists>,
}

#[derive(Default)]
struct CachedLists {
    lists: HashMap<Uuid, Arc<Vec<Notification>>>,
    /// Bumped by every `invalidate`. A load that started under an older
    /// generation is returned to its caller but never cached.
    generations: HashMap<Uuid, u64>,
}

impl CachedLists {
    fn generation(&self, user_id: Uuid) -> u64 {
        self.generations.get(&user_id).copied().unwrap_or(0)
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CachedLists> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CachedLists> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached list, if one is loaded.
    pub fn get(&self, user_id: Uuid) -> Option<Arc<Vec<Notification>>> {
        self.read().lists.get(&user_id).cloned()
    }

    /// Replace the cached list for a user.
    pub fn set(&self, user_id: Uuid, list: Vec<Notification>) -> Arc<Vec<Notification>> {
        let list = Arc::new(list);
        self.write().lists.insert(user_id, list.clone());
        list
    }

    pub fn invalidate(&self, user_id: Uuid) {
        let mut cache = self.write();
        cache.lists.remove(&user_id);
        *cache.generations.entry(user_id).or_insert(0) += 1;
    }

    fn generation(&self, user_id: Uuid) -> u64 {
        self.read().generation(user_id)
    }

    /// Cache `list` only if no invalidation happened since `generation` was read.
    fn set_if_current(&self, user_id: Uuid, generation: u64, list: Vec<Notification>) -> Arc<Vec<Notification>> {
        let list = Arc::new(list);
        let mut cache = self.write();
        if cache.generation(user_id) == generation {
            cache.lists.insert(user_id, list.clone());
        } else {
            debug!("Discarding stale notification load for {}", user_id);
        }
        list
    }

    /// Cached list, or load from the database and cache it.
    pub fn fetch(&self, db: &Database, user_id: Uuid) -> anyhow::Result<Arc<Vec<Notification>>> {
        if let Some(list) = self.get(user_id) {
            return Ok(list);
        }

        let generation = self.generation(user_id);
        debug!("Loading notifications for {}", user_id);
        let rows = db.list_notifications(&user_id.to_string())?;
        let list = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                Notification::try_from(row)
                    .map_err(|e| warn!("Skipping corrupt notification '{}': {}", id, e))
                    .ok()
            })
            .collect();

        Ok(self.set_if_current(user_id, generation, list))
    }

    pub fn unread_count(&self, db: &Database, user_id: Uuid) -> anyhow::Result<usize> {
        Ok(unread_count(&self.fetch(db, user_id)?))
    }
}

/// Insert a notification row for `user_id`.
pub fn create_notification(db: &Database, user_id: Uuid, title: &str, body: &str) -> anyhow::Result<Notification> {
    let notification = Notification {
        id: Uuid::new_v4(),
        user_id,
        title: title.to_string(),
        body: body.to_string(),
        read: false,
        created_at: chrono::Utc::now(),
    };
    db.insert_notification(&NotificationRow::from(&notification))?;
    Ok(notification)
}

/// Drop the owner's cached list and push the notification to any live session.
pub async fn deliver(state: &AppStateInner, notification: Notification) {
    state.notifications.invalidate(notification.user_id);
    state
        .dispatcher
        .send_to_user(notification.user_id, GatewayEvent::NotificationCreate(notification))
        .await;
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Notification>>, StatusCode> {
    let st = state.clone();
    let list = run_blocking(move || st.notifications.fetch(&st.db, claims.sub))
        .await?
        .map_err(internal)?;

    Ok(Json(list.as_ref().clone()))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let st = state.clone();
    let unread = run_blocking(move || st.notifications.unread_count(&st.db, claims.sub))
        .await?
        .map_err(internal)?;

    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let changed = run_blocking(move || {
        db.mark_notification_read(&notification_id.to_string(), &claims.sub.to_string())
    })
    .await?
    .map_err(internal)?;

    if !changed {
        return Err(StatusCode::NOT_FOUND);
    }
    state.notifications.invalidate(claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let db = state.db.clone();
    let updated = run_blocking(move || db.mark_all_notifications_read(&claims.sub.to_string()))
        .await?
        .map_err(internal)?;

    state.notifications.invalidate(claims.sub);
    Ok(Json(serde_json::json!({ "updated": updated })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use barangay_db::models::UserRow;

    fn seed_user(db: &Database) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&UserRow {
            id: id.to_string(),
            name: "Andres".into(),
            email: format!("{}@example.com", id),
            phone: None,
            address: None,
            password: "x".into(),
            role: "resident".into(),
            verified: false,
            submitted: false,
            id_image: None,
            error_note: None,
            verified_at: None,
            created_at: "2024-01-01T00:00:00+00:00".into(),
        })
        .unwrap();
        id
    }

    fn note(read: bool) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            title: "t".into(),
            body: "b".into(),
            read,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_unread_count_counts_only_unread() {
        assert_eq!(unread_count(&[]), 0);
        assert_eq!(unread_count(&[note(false), note(true), note(false)]), 2);
    }

    #[test]
    fn test_store_caches_until_invalidated() {
        let db = Database::open_in_memory().unwrap();
        let store = NotificationStore::new();
        let user = seed_user(&db);

        create_notification(&db, user, "Welcome", "Hi").unwrap();
        assert_eq!(store.unread_count(&db, user).unwrap(), 1);

        // written behind the cache's back: not visible until invalidated
        create_notification(&db, user, "Second", "Hi again").unwrap();
        assert_eq!(store.unread_count(&db, user).unwrap(), 1);

        store.invalidate(user);
        assert_eq!(store.unread_count(&db, user).unwrap(), 2);
    }

    #[test]
    fn test_set_replaces_current_list() {
        let db = Database::open_in_memory().unwrap();
        let store = NotificationStore::new();
        let user = Uuid::new_v4();

        let before = store.set(user, vec![note(false), note(false)]);
        store.set(user, vec![note(true), note(false), note(false), note(false)]);

        assert_eq!(unread_count(&before), 2);
        assert_eq!(store.unread_count(&db, user).unwrap(), 3);
    }

    #[test]
    fn test_load_overtaken_by_invalidate_is_not_cached() {
        let store = NotificationStore::new();
        let user = Uuid::new_v4();

        let generation = store.generation(user);
        store.invalidate(user);
        let loaded = store.set_if_current(user, generation, vec![note(false)]);

        assert_eq!(unread_count(&loaded), 1);
        assert!(store.get(user).is_none());
    }

    #[test]
    fn test_concurrent_write_is_visible_after_settling() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(NotificationStore::new());

        for _ in 0..200 {
            let user = seed_user(&db);

            let (reader_db, reader_store) = (db.clone(), store.clone());
            let reader = std::thread::spawn(move || {
                reader_store.fetch(&reader_db, user).unwrap();
            });
            let (writer_db, writer_store) = (db.clone(), store.clone());
            let writer = std::thread::spawn(move || {
                create_notification(&writer_db, user, "Update", "Something changed").unwrap();
                writer_store.invalidate(user);
            });
            reader.join().unwrap();
            writer.join().unwrap();

            assert_eq!(store.unread_count(&db, user).unwrap(), 1);
        }
    }
}
