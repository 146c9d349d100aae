use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{BoardId, ConnectionId, PresenceUser},
    protocol::ServerEvent,
};
use tokio::sync::mpsc;

/// Bounded per-connection queue drained by the connection's writer task.
pub type Outbox = mpsc::Sender<Arc<ServerEvent>>;

struct Connection {
    outbox: Outbox,
    user: PresenceUser,
    board: Option<BoardId>,
}

#[derive(Default)]
struct Rooms {
    connections: HashMap<ConnectionId, Connection>,
    boards: HashMap<BoardId, HashSet<ConnectionId>>,
}

impl Rooms {
    fn detach(&mut self, connection_id: ConnectionId, board_id: BoardId) {
        if let Some(members) = self.boards.get_mut(&board_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.boards.remove(&board_id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// Connections already in the room, joiner excluded.
    pub peers: Vec<(ConnectionId, PresenceUser)>,
    /// Room the connection was in before, now left.
    pub previous_board: Option<BoardId>,
}

/// Which connection views which board. Every method takes the lock for the
/// map update only; nothing here awaits.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Rooms>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, Rooms> {
        // map state stays consistent across a panicking holder
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.rooms().connections.insert(
            connection_id,
            Connection {
                outbox,
                user: PresenceUser::anonymous(),
                board: None,
            },
        );
        connection_id
    }

    /// Puts the connection in `board_id`'s room, leaving any other room first.
    /// `None` when the connection is unknown.
    pub fn join(
        &self,
        connection_id: ConnectionId,
        board_id: BoardId,
        user: PresenceUser,
    ) -> Option<JoinOutcome> {
        let mut rooms = self.rooms();
        let connection = rooms.connections.get_mut(&connection_id)?;
        let previous = connection.board.replace(board_id);
        connection.user = user;

        let previous_board = match previous {
            Some(previous) if previous != board_id => {
                rooms.detach(connection_id, previous);
                Some(previous)
            }
            _ => None,
        };

        let members = rooms.boards.entry(board_id).or_default();
        members.insert(connection_id);
        let peer_ids: Vec<ConnectionId> = members
            .iter()
            .copied()
            .filter(|id| *id != connection_id)
            .collect();
        let peers = peer_ids
            .into_iter()
            .filter_map(|id| {
                rooms
                    .connections
                    .get(&id)
                    .map(|peer| (id, peer.user.clone()))
            })
            .collect();

        Some(JoinOutcome {
            peers,
            previous_board,
        })
    }

    /// Leaves `board_id` if the connection is in it, returning who left.
    pub fn leave(&self, connection_id: ConnectionId, board_id: BoardId) -> Option<PresenceUser> {
        let mut rooms = self.rooms();
        let connection = rooms.connections.get_mut(&connection_id)?;
        if connection.board != Some(board_id) {
            return None;
        }
        connection.board = None;
        let user = connection.user.clone();
        rooms.detach(connection_id, board_id);
        Some(user)
    }

    /// Forgets the connection entirely. Returns the room it was in, if any.
    pub fn drop_connection(&self, connection_id: ConnectionId) -> Option<(BoardId, PresenceUser)> {
        let mut rooms = self.rooms();
        let connection = rooms.connections.remove(&connection_id)?;
        let board_id = connection.board?;
        rooms.detach(connection_id, board_id);
        Some((board_id, connection.user))
    }

    pub fn recipients(
        &self,
        board_id: BoardId,
        except: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, Outbox)> {
        let rooms = self.rooms();
        let Some(members) = rooms.boards.get(&board_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| {
                rooms
                    .connections
                    .get(id)
                    .map(|connection| (*id, connection.outbox.clone()))
            })
            .collect()
    }

    pub fn outbox(&self, connection_id: ConnectionId) -> Option<Outbox> {
        self.rooms()
            .connections
            .get(&connection_id)
            .map(|connection| connection.outbox.clone())
    }

    pub fn all_outboxes(&self) -> Vec<(ConnectionId, Outbox)> {
        self.rooms()
            .connections
            .iter()
            .map(|(id, connection)| (*id, connection.outbox.clone()))
            .collect()
    }

    pub fn room_of(&self, connection_id: ConnectionId) -> Option<BoardId> {
        self.rooms()
            .connections
            .get(&connection_id)
            .and_then(|connection| connection.board)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<PresenceUser> {
        self.rooms()
            .connections
            .get(&connection_id)
            .map(|connection| connection.user.clone())
    }

    pub fn room_members(&self, board_id: BoardId) -> Vec<(ConnectionId, PresenceUser)> {
        let rooms = self.rooms();
        let Some(members) = rooms.boards.get(&board_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                rooms
                    .connections
                    .get(id)
                    .map(|connection| (*id, connection.user.clone()))
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms().connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms().boards.len()
    }

    /// Drops every outbox so writer tasks see a closed channel and exit.
    pub fn shutdown(&self) -> usize {
        let mut rooms = self.rooms();
        let closed = rooms.connections.len();
        rooms.connections.clear();
        rooms.boards.clear();
        closed
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
