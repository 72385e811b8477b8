//! Room matchmaking state
//!
//! The [`RoomTable`] is the single writer of room membership. Connection
//! handlers ask it for placements and translate those into wire events; no
//! other code mutates membership.
//!
//! Two request forms are supported:
//!
//! - a request **naming a room** follows the fixed-room policy: create it,
//!   join it while under capacity, or be rejected with [`Placement::Full`];
//! - a request **without a room** follows the mesh-of-pairs policy: the
//!   arriving client is paired with every client already registered, reusing
//!   a room where the partner sits alone and synthesizing a fresh two-member
//!   room otherwise.

use super::super::protocol::ClientId;

/// One room and its members, in join order
#[derive(Debug, Clone)]
pub struct Room {
    /// Room identifier
    pub id: String,

    /// Members in join order; the first member is the initiator side
    pub members: Vec<ClientId>,
}

/// Outcome of a single pairing decision
///
/// A named request yields exactly one placement; a mesh request yields one
/// placement per already-registered client (or a lone `Created`).
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// The requester became the sole member of `room` and waits for a partner
    Created { room: String },

    /// The requester was added to an existing under-capacity room
    Joined {
        room: String,
        /// Members that were already present, in join order
        others: Vec<ClientId>,
    },

    /// A fresh room was synthesized for the requester and `partner`
    Paired { room: String, partner: ClientId },

    /// The named room is at capacity; nothing changed
    Full { room: String },
}

/// Room membership table
///
/// Owns every room known to one relay instance. Rooms live in creation
/// order and clients in arrival order, so mesh pairing is deterministic.
#[derive(Debug)]
pub struct RoomTable {
    capacity: usize,
    next_room: u64,
    rooms: Vec<Room>,
    clients: Vec<ClientId>,
}

impl RoomTable {
    /// Create an empty table with the given per-room capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_room: 0,
            rooms: Vec::new(),
            clients: Vec::new(),
        }
    }

    /// Register a client session
    ///
    /// Idempotent; called once the transport handshake has assigned an
    /// identity. Registration order is the mesh pairing order.
    pub fn register(&mut self, client: &str) {
        if !self.clients.iter().any(|c| c == client) {
            self.clients.push(client.to_string());
        }
    }

    /// Place `client` according to its request
    pub fn create_or_join(&mut self, client: &str, room: Option<&str>) -> Vec<Placement> {
        match room {
            Some(name) => self.join_named(client, name),
            None => self.join_mesh(client),
        }
    }

    fn join_named(&mut self, client: &str, name: &str) -> Vec<Placement> {
        match self.rooms.iter().position(|r| r.id == name) {
            None => {
                self.rooms.push(Room {
                    id: name.to_string(),
                    members: vec![client.to_string()],
                });
                vec![Placement::Created {
                    room: name.to_string(),
                }]
            }
            Some(idx) => {
                let room = &mut self.rooms[idx];
                if room.members.iter().any(|m| m == client) {
                    // A member re-requesting its own room changes nothing;
                    // replaying `created` could mint a second initiator.
                    Vec::new()
                } else if room.members.len() < self.capacity {
                    let others = room.members.clone();
                    room.members.push(client.to_string());
                    vec![Placement::Joined {
                        room: name.to_string(),
                        others,
                    }]
                } else {
                    vec![Placement::Full {
                        room: name.to_string(),
                    }]
                }
            }
        }
    }

    fn join_mesh(&mut self, client: &str) -> Vec<Placement> {
        // Partners the client already shares a room with are skipped, so a
        // repeated request cannot duplicate a pairing.
        let partners: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|c| c.as_str() != client)
            .filter(|c| !self.share_room(client, c))
            .cloned()
            .collect();

        if partners.is_empty() {
            if self.occupies_any_room(client) {
                return Vec::new();
            }
            let id = self.fresh_room_id();
            self.rooms.push(Room {
                id: id.clone(),
                members: vec![client.to_string()],
            });
            return vec![Placement::Created { room: id }];
        }

        let mut placements = Vec::with_capacity(partners.len());
        for partner in partners {
            let lone = self
                .rooms
                .iter()
                .position(|r| r.members.len() == 1 && r.members[0] == partner);
            match lone {
                Some(idx) => {
                    self.rooms[idx].members.push(client.to_string());
                    placements.push(Placement::Joined {
                        room: self.rooms[idx].id.clone(),
                        others: vec![partner],
                    });
                }
                None => {
                    let id = self.fresh_room_id();
                    self.rooms.push(Room {
                        id: id.clone(),
                        members: vec![partner.clone(), client.to_string()],
                    });
                    placements.push(Placement::Paired { room: id, partner });
                }
            }
        }
        placements
    }

    fn fresh_room_id(&mut self) -> String {
        let id = format!("room{}", self.next_room);
        self.next_room += 1;
        id
    }

    fn share_room(&self, a: &str, b: &str) -> bool {
        self.rooms.iter().any(|r| {
            r.members.iter().any(|m| m == a) && r.members.iter().any(|m| m == b)
        })
    }

    fn occupies_any_room(&self, client: &str) -> bool {
        self.rooms
            .iter()
            .any(|r| r.members.iter().any(|m| m == client))
    }

    /// Members of `room`, if it exists
    pub fn members(&self, room: &str) -> Option<&[ClientId]> {
        self.rooms
            .iter()
            .find(|r| r.id == room)
            .map(|r| r.members.as_slice())
    }

    /// Members of `room` other than `except`
    ///
    /// Empty when the room is unknown or has no other member; forwarding to
    /// nobody is a no-op, not an error.
    pub fn other_members(&self, room: &str, except: &str) -> Vec<ClientId> {
        self.members(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.as_str() != except)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registered client other than `except`
    pub fn other_clients(&self, except: &str) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|c| c.as_str() != except)
            .cloned()
            .collect()
    }

    /// Remove a client from every room and from the registry
    ///
    /// Returns the ids of the rooms the client occupied. Rooms left with no
    /// members are dropped.
    pub fn remove_client(&mut self, client: &str) -> Vec<String> {
        let mut vacated = Vec::new();
        for room in &mut self.rooms {
            if let Some(pos) = room.members.iter().position(|m| m == client) {
                room.members.remove(pos);
                vacated.push(room.id.clone());
            }
        }
        self.rooms.retain(|r| !r.members.is_empty());
        self.clients.retain(|c| c != client);
        vacated
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of registered clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoomTable {
        RoomTable::new(2)
    }

    #[test]
    fn test_first_client_creates_room0() {
        let mut t = table();
        t.register("a");
        let placements = t.create_or_join("a", None);
        assert_eq!(
            placements,
            vec![Placement::Created {
                room: "room0".to_string()
            }]
        );
        assert_eq!(t.members("room0").unwrap(), ["a"]);
    }

    #[test]
    fn test_second_client_joins_existing_room() {
        let mut t = table();
        t.register("a");
        t.create_or_join("a", None);
        t.register("b");
        let placements = t.create_or_join("b", None);
        assert_eq!(
            placements,
            vec![Placement::Joined {
                room: "room0".to_string(),
                others: vec!["a".to_string()]
            }]
        );
        assert_eq!(t.members("room0").unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_third_client_is_paired_into_two_fresh_rooms() {
        let mut t = table();
        for id in ["a", "b", "c"] {
            t.register(id);
            t.create_or_join(id, None);
        }
        // c was paired with a and b in fresh rooms, in arrival order.
        assert_eq!(t.room_count(), 3);
        assert_eq!(t.members("room1").unwrap(), ["a", "c"]);
        assert_eq!(t.members("room2").unwrap(), ["b", "c"]);
    }

    #[test]
    fn test_mesh_rooms_never_exceed_two_members() {
        let mut t = table();
        let ids = ["a", "b", "c", "d", "e"];
        for id in ids {
            t.register(id);
            t.create_or_join(id, None);
        }
        // n clients produce n*(n-1)/2 pairwise rooms.
        assert_eq!(t.room_count(), ids.len() * (ids.len() - 1) / 2);
        for i in 0..t.room_count() {
            let members = t.members(&format!("room{}", i)).unwrap();
            assert_eq!(members.len(), 2);
        }
    }

    #[test]
    fn test_named_room_fills_then_rejects() {
        let mut t = table();
        for id in ["a", "b", "c"] {
            t.register(id);
        }
        assert_eq!(
            t.create_or_join("a", Some("studio")),
            vec![Placement::Created {
                room: "studio".to_string()
            }]
        );
        assert_eq!(
            t.create_or_join("b", Some("studio")),
            vec![Placement::Joined {
                room: "studio".to_string(),
                others: vec!["a".to_string()]
            }]
        );
        // Room is at capacity: every further request is rejected and
        // membership stays untouched.
        assert_eq!(
            t.create_or_join("c", Some("studio")),
            vec![Placement::Full {
                room: "studio".to_string()
            }]
        );
        assert_eq!(t.members("studio").unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_exactly_one_initiator_per_pair() {
        let mut t = table();
        for id in ["a", "b", "c"] {
            t.register(id);
            for placement in t.create_or_join(id, None) {
                // The requester is never its own partner, so each pairing
                // has exactly one existing member on the initiator side.
                match placement {
                    Placement::Created { .. } => {}
                    Placement::Joined { others, .. } => assert_eq!(others.len(), 1),
                    Placement::Paired { partner, .. } => assert_ne!(partner, id),
                    Placement::Full { .. } => panic!("mesh never rejects"),
                }
            }
        }
    }

    #[test]
    fn test_member_re_request_is_noop() {
        let mut t = table();
        t.register("a");
        t.create_or_join("a", Some("studio"));
        assert!(t.create_or_join("a", Some("studio")).is_empty());
        assert_eq!(t.members("studio").unwrap(), ["a"]);
    }

    #[test]
    fn test_mesh_re_request_does_not_duplicate_pairings() {
        let mut t = table();
        for id in ["a", "b"] {
            t.register(id);
            t.create_or_join(id, None);
        }
        // b already shares room0 with a; asking again changes nothing.
        assert!(t.create_or_join("b", None).is_empty());
        assert_eq!(t.room_count(), 1);
        assert_eq!(t.members("room0").unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_other_members_of_unknown_room_is_empty() {
        let t = table();
        assert!(t.other_members("nowhere", "a").is_empty());
    }

    #[test]
    fn test_remove_client_vacates_rooms() {
        let mut t = table();
        for id in ["a", "b", "c"] {
            t.register(id);
            t.create_or_join(id, None);
        }
        let vacated = t.remove_client("c");
        assert_eq!(vacated, vec!["room1".to_string(), "room2".to_string()]);
        // Rooms c occupied with a single partner keep that partner.
        assert_eq!(t.members("room1").unwrap(), ["a"]);
        assert_eq!(t.members("room2").unwrap(), ["b"]);
        assert_eq!(t.client_count(), 2);

        t.remove_client("a");
        t.remove_client("b");
        assert_eq!(t.room_count(), 0);
    }
}
