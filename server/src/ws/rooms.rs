//! Broadcast rooms and server-assigned room membership.
//!
//! Room keys are an explicit tagged type rather than concatenated strings,
//! so identical group ids in different shops can never collide.

use dashmap::DashMap;
use rusqlite::Connection;
use std::collections::HashSet;

use crate::db::models::UserRow;
use crate::db::store;

/// Identity of one broadcast room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// A shop's own room: presence lists and tenant-scoped events.
    Shop(String),
    /// A group within a shop.
    Group { shop_id: String, group_id: String },
    /// Single global room for oversight users.
    Oversight,
    /// Client-requested dynamic room (joinRoom/leaveRoom), UI-level only.
    Custom(String),
}

/// Room membership table: room key -> set of session ids.
/// Empty rooms are dropped eagerly.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: DashMap<RoomKey, HashSet<String>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: RoomKey, session_id: &str) {
        self.rooms
            .entry(key)
            .or_default()
            .insert(session_id.to_string());
    }

    pub fn leave(&self, key: &RoomKey, session_id: &str) {
        let mut empty = false;
        if let Some(mut members) = self.rooms.get_mut(key) {
            members.remove(session_id);
            empty = members.is_empty();
        }
        if empty {
            self.rooms.remove_if(key, |_, members| members.is_empty());
        }
    }

    /// Remove a session from every room it joined. Used on disconnect.
    pub fn leave_all(&self, session_id: &str) {
        let keys: Vec<RoomKey> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(session_id))
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.leave(&key, session_id);
        }
    }

    pub fn sessions_in(&self, key: &RoomKey) -> Vec<String> {
        self.rooms
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Connection admission: the handshake identity must resolve to an active
/// user in an active shop. Hard precondition — on failure the socket is
/// closed without any registry or room mutation and no presence broadcast.
pub fn admit_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserRow>> {
    let Some(user) = store::get_user(conn, user_id)? else {
        return Ok(None);
    };
    if !user.active {
        return Ok(None);
    }
    match store::get_shop(conn, &user.shop_id)? {
        Some(shop) if shop.active => Ok(Some(user)),
        _ => Ok(None),
    }
}

/// Server-assigned room membership for an admitted user, additive:
/// 1. the user's own shop room,
/// 2. one group room per group membership, scoped within the shop,
/// 3. oversight users additionally join the global oversight room and every
///    active shop's room — monitoring only, never message delivery, and
///    never counted into foreign shops' presence (presence filters by the
///    session's home shop).
pub fn membership_for(conn: &Connection, user: &UserRow) -> rusqlite::Result<Vec<RoomKey>> {
    let mut rooms = vec![RoomKey::Shop(user.shop_id.clone())];

    for group_id in store::user_group_ids(conn, &user.id)? {
        rooms.push(RoomKey::Group {
            shop_id: user.shop_id.clone(),
            group_id,
        });
    }

    if user.role.is_oversight() {
        rooms.push(RoomKey::Oversight);
        for shop_id in store::active_shop_ids(conn)? {
            let key = RoomKey::Shop(shop_id);
            if !rooms.contains(&key) {
                rooms.push(key);
            }
        }
    }

    Ok(rooms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use rusqlite::params;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::migrations().to_latest(&mut conn).unwrap();
        conn
    }

    fn seed_shop(conn: &Connection, id: &str, active: bool) {
        conn.execute(
            "INSERT INTO shops (id, name, active, created_at) VALUES (?1, ?1, ?2, '')",
            params![id, active],
        )
        .unwrap();
    }

    fn seed_user(conn: &Connection, id: &str, shop_id: &str, role: &str) {
        conn.execute(
            "INSERT INTO users (id, shop_id, display_name, role, active, created_at, updated_at)
             VALUES (?1, ?2, ?1, ?3, 1, '', '')",
            params![id, shop_id, role],
        )
        .unwrap();
    }

    #[test]
    fn membership_includes_shop_and_group_rooms() {
        let conn = test_conn();
        seed_shop(&conn, "shop-a", true);
        seed_user(&conn, "u1", "shop-a", "employee");
        conn.execute(
            "INSERT INTO user_groups (user_id, group_id) VALUES ('u1', 'g1')",
            [],
        )
        .unwrap();

        let user = store::get_user(&conn, "u1").unwrap().unwrap();
        let rooms = membership_for(&conn, &user).unwrap();
        assert_eq!(
            rooms,
            vec![
                RoomKey::Shop("shop-a".into()),
                RoomKey::Group {
                    shop_id: "shop-a".into(),
                    group_id: "g1".into()
                },
            ]
        );
    }

    #[test]
    fn oversight_joins_every_active_shop_room() {
        let conn = test_conn();
        seed_shop(&conn, "shop-a", true);
        seed_shop(&conn, "shop-b", true);
        seed_shop(&conn, "closed", false);
        seed_user(&conn, "root", "shop-a", "super_admin");

        let user = store::get_user(&conn, "root").unwrap().unwrap();
        let rooms = membership_for(&conn, &user).unwrap();

        assert!(rooms.contains(&RoomKey::Oversight));
        assert!(rooms.contains(&RoomKey::Shop("shop-b".into())));
        assert!(!rooms.contains(&RoomKey::Shop("closed".into())));
        // Own shop room appears once even though it is also an active shop
        let own = rooms
            .iter()
            .filter(|key| **key == RoomKey::Shop("shop-a".into()))
            .count();
        assert_eq!(own, 1);
    }

    #[test]
    fn group_keys_do_not_collide_across_shops() {
        let a = RoomKey::Group {
            shop_id: "shop-a".into(),
            group_id: "g1".into(),
        };
        let b = RoomKey::Group {
            shop_id: "shop-b".into(),
            group_id: "g1".into(),
        };
        assert_ne!(a, b);

        let table = RoomTable::new();
        table.join(a.clone(), "s1");
        table.join(b.clone(), "s2");
        assert_eq!(table.sessions_in(&a), vec!["s1".to_string()]);
        assert_eq!(table.sessions_in(&b), vec!["s2".to_string()]);
    }

    #[test]
    fn leave_all_empties_every_room() {
        let table = RoomTable::new();
        table.join(RoomKey::Shop("shop-a".into()), "s1");
        table.join(RoomKey::Custom("ui:orders".into()), "s1");
        table.join(RoomKey::Shop("shop-a".into()), "s2");

        table.leave_all("s1");
        assert_eq!(
            table.sessions_in(&RoomKey::Shop("shop-a".into())),
            vec!["s2".to_string()]
        );
        assert!(table.sessions_in(&RoomKey::Custom("ui:orders".into())).is_empty());
    }
}
