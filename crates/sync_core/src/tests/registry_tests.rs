use super::*;

fn outbox() -> (Outbox, mpsc::Receiver<Arc<ServerEvent>>) {
    mpsc::channel(8)
}

fn named(name: &str) -> PresenceUser {
    PresenceUser {
        user_id: None,
        name: name.into(),
        avatar: None,
    }
}

#[test]
fn join_reports_existing_peers_only() {
    let registry = RoomRegistry::new();
    let (a_tx, _a_rx) = outbox();
    let (b_tx, _b_rx) = outbox();
    let a = registry.connect(a_tx);
    let b = registry.connect(b_tx);

    let first = registry.join(a, BoardId(1), named("ann")).expect("known");
    assert!(first.peers.is_empty());
    assert_eq!(first.previous_board, None);

    let second = registry.join(b, BoardId(1), named("ben")).expect("known");
    assert_eq!(second.peers, vec![(a, named("ann"))]);
    assert_eq!(registry.room_members(BoardId(1)).len(), 2);
}

#[test]
fn joining_another_board_leaves_the_first() {
    let registry = RoomRegistry::new();
    let (tx, _rx) = outbox();
    let conn = registry.connect(tx);

    registry.join(conn, BoardId(1), named("ann")).expect("join");
    let outcome = registry.join(conn, BoardId(2), named("ann")).expect("join");
    assert_eq!(outcome.previous_board, Some(BoardId(1)));
    assert_eq!(registry.room_of(conn), Some(BoardId(2)));
    assert!(registry.recipients(BoardId(1), None).is_empty());
    assert_eq!(registry.room_count(), 1);
}

#[test]
fn recipients_exclude_the_given_connection() {
    let registry = RoomRegistry::new();
    let (a_tx, _a_rx) = outbox();
    let (b_tx, _b_rx) = outbox();
    let (c_tx, _c_rx) = outbox();
    let a = registry.connect(a_tx);
    let b = registry.connect(b_tx);
    let c = registry.connect(c_tx);
    registry.join(a, BoardId(7), named("a"));
    registry.join(b, BoardId(7), named("b"));
    registry.join(c, BoardId(8), named("c"));

    let ids: HashSet<_> = registry
        .recipients(BoardId(7), Some(a))
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, HashSet::from([b]));
    assert_eq!(registry.recipients(BoardId(7), None).len(), 2);
}

#[test]
fn leave_only_applies_to_the_joined_board() {
    let registry = RoomRegistry::new();
    let (tx, _rx) = outbox();
    let conn = registry.connect(tx);
    registry.join(conn, BoardId(3), named("ann"));

    assert_eq!(registry.leave(conn, BoardId(4)), None);
    assert_eq!(registry.leave(conn, BoardId(3)), Some(named("ann")));
    assert_eq!(registry.room_of(conn), None);
    assert_eq!(registry.room_count(), 0);
    assert_eq!(registry.connection_count(), 1);
}

#[test]
fn drop_connection_reports_its_room() {
    let registry = RoomRegistry::new();
    let (tx, _rx) = outbox();
    let idle_conn = {
        let (idle, _idle_rx) = outbox();
        registry.connect(idle)
    };
    let conn = registry.connect(tx);
    registry.join(conn, BoardId(5), named("ann"));

    assert_eq!(
        registry.drop_connection(conn),
        Some((BoardId(5), named("ann")))
    );
    assert_eq!(registry.drop_connection(conn), None);
    assert_eq!(registry.drop_connection(idle_conn), None);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn join_of_unknown_connection_is_ignored() {
    let registry = RoomRegistry::new();
    assert_eq!(registry.join(ConnectionId::new(), BoardId(1), named("x")), None);
    assert_eq!(registry.room_count(), 0);
}

#[tokio::test]
async fn shutdown_closes_every_outbox() {
    let registry = RoomRegistry::new();
    let (tx, mut rx) = outbox();
    let conn = registry.connect(tx);
    registry.join(conn, BoardId(1), named("ann"));

    assert_eq!(registry.shutdown(), 1);
    assert!(rx.recv().await.is_none());
    assert_eq!(registry.room_count(), 0);
}
