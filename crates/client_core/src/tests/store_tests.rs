use super::*;
use chrono::{DateTime, Duration, TimeZone};
use shared::domain::{ListWithTasks, Priority, Role, DEFAULT_BOARD_COLOR};

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

fn list(id: i64, position: f64) -> List {
    List {
        id: ListId(id),
        board_id: BoardId(1),
        title: format!("list {id}"),
        position,
        updated_at: at(0),
    }
}

fn task(id: i64, list_id: i64, position: f64) -> Task {
    Task {
        id: TaskId(id),
        list_id: ListId(list_id),
        title: format!("task {id}"),
        description: None,
        position,
        priority: Priority::Medium,
        assignee: None,
        due_date: None,
        created_at: at(0),
        updated_at: at(0),
    }
}

/// Board 1 with list 10 holding tasks 100@0 and 101@1, and an empty list 11.
fn state() -> BoardState {
    BoardState::from_snapshot(BoardSnapshot {
        board: Board {
            id: BoardId(1),
            name: "Roadmap".into(),
            description: None,
            color: DEFAULT_BOARD_COLOR.into(),
            owner_id: UserId(1),
            created_at: at(0),
            updated_at: at(0),
        },
        lists: vec![
            ListWithTasks {
                list: list(10, 0.0),
                tasks: vec![task(100, 10, 0.0), task(101, 10, 1.0)],
            },
            ListWithTasks {
                list: list(11, 1.0),
                tasks: Vec::new(),
            },
        ],
        members: vec![BoardMember {
            board_id: BoardId(1),
            user: UserSummary {
                id: UserId(2),
                username: "grace".into(),
            },
            role: Role::Member,
        }],
    })
}

fn ids(tasks: Vec<&Task>) -> Vec<i64> {
    tasks.into_iter().map(|task| task.id.0).collect()
}

#[test]
fn snapshot_is_exposed_in_order() {
    let state = state();
    let lists: Vec<i64> = state.lists().into_iter().map(|list| list.id.0).collect();
    assert_eq!(lists, vec![10, 11]);
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![100, 101]);
    assert!(state.tasks_in(ListId(11)).is_empty());
}

#[test]
fn applying_the_same_update_twice_equals_applying_it_once() {
    let mut state = state();
    let mut renamed = task(100, 10, 0.0);
    renamed.title = "renamed".into();
    renamed.updated_at = at(5);
    let event = ServerEvent::TaskUpdated { task: renamed };

    assert!(state.apply_event(&event));
    let once = state.task(TaskId(100)).cloned();
    assert!(!state.apply_event(&event));
    assert_eq!(state.task(TaskId(100)).cloned(), once);
    assert_eq!(once.map(|t| t.title), Some("renamed".to_string()));
}

#[test]
fn older_event_does_not_overwrite_newer_copy() {
    let mut state = state();
    let mut newer = task(100, 10, 0.0);
    newer.title = "newer".into();
    newer.updated_at = at(10);
    let mut older = task(100, 10, 0.0);
    older.title = "older".into();
    older.updated_at = at(5);

    assert!(state.apply_event(&ServerEvent::TaskUpdated { task: newer }));
    assert!(!state.apply_event(&ServerEvent::TaskUpdated { task: older }));
    assert_eq!(
        state.task(TaskId(100)).map(|t| t.title.as_str()),
        Some("newer")
    );
}

#[test]
fn moved_event_relocates_task() {
    let mut state = state();
    let mut moved = task(100, 11, 0.0);
    moved.updated_at = at(1);
    assert!(state.apply_event(&ServerEvent::TaskMoved {
        task: moved,
        from_list_id: Some(ListId(10)),
        to_list_id: ListId(11),
        animate: true,
    }));
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![101]);
    assert_eq!(ids(state.tasks_in(ListId(11))), vec![100]);
}

#[test]
fn deletes_and_foreign_events() {
    let mut state = state();
    let delete = ServerEvent::TaskDeleted {
        list_id: ListId(10),
        task_id: TaskId(101),
    };
    assert!(state.apply_event(&delete));
    assert!(!state.apply_event(&delete));

    let mut foreign = list(99, 0.0);
    foreign.board_id = BoardId(2);
    assert!(!state.apply_event(&ServerEvent::ListCreated {
        board_id: BoardId(2),
        list: foreign,
    }));
    assert!(state.list(ListId(99)).is_none());

    assert!(state.apply_event(&ServerEvent::BoardDeleted {
        board_id: BoardId(1)
    }));
    assert!(state.is_deleted());
    assert!(!state.apply_event(&ServerEvent::BoardDeleted {
        board_id: BoardId(1)
    }));
}

#[test]
fn optimistic_move_then_commit() {
    let mut state = state();
    let pending = state
        .apply(MutationRequest::MoveTask {
            task_id: TaskId(100),
            to_list_id: Some(ListId(11)),
            placement: None,
            from_list_id: None,
        })
        .expect("apply");
    assert_eq!(ids(state.tasks_in(ListId(11))), vec![100]);
    assert!(matches!(
        pending.request(),
        MutationRequest::MoveTask {
            from_list_id: Some(ListId(10)),
            ..
        }
    ));

    let mut committed = task(100, 11, 0.0);
    committed.updated_at = at(3);
    let settlement = state.settle(pending, Ok(Committed::Task(committed.clone())));
    assert_eq!(settlement, Settlement::Committed(Committed::Task(committed)));
    assert_eq!(state.task(TaskId(100)).map(|t| t.updated_at), Some(at(3)));
}

#[test]
fn rejected_move_restores_previous_placement() {
    let mut state = state();
    let before = state.task(TaskId(101)).cloned();
    let pending = state
        .apply(MutationRequest::MoveTask {
            task_id: TaskId(101),
            to_list_id: Some(ListId(10)),
            placement: Some(Placement::Index(0)),
            from_list_id: None,
        })
        .expect("apply");
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![101, 100]);

    let error = ApiError::new(ErrorCode::Timeout, "store did not answer in time");
    let settlement = state.settle(pending, Err(error.clone()));
    assert_eq!(settlement, Settlement::Reverted { error });
    assert_eq!(state.task(TaskId(101)).cloned(), before);
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![100, 101]);
}

#[test]
fn created_task_swaps_temporary_id_for_committed_one() {
    let mut state = state();
    let pending = state
        .apply(MutationRequest::CreateTask {
            list_id: Some(ListId(11)),
            title: Some("  draft  ".into()),
            description: None,
            placement: None,
            priority: None,
            assignee_id: Some(UserId(2)),
            due_date: None,
        })
        .expect("apply");
    let tentative = state.tasks_in(ListId(11));
    assert_eq!(tentative.len(), 1);
    assert!(tentative[0].id.0 < 0);
    assert_eq!(tentative[0].title, "draft");
    assert_eq!(
        tentative[0].assignee.as_ref().map(|u| u.username.as_str()),
        Some("grace")
    );

    // the broadcast echo can land before the reply
    let mut real = task(500, 11, 0.0);
    real.title = "draft".into();
    real.updated_at = at(1) + Duration::seconds(1);
    assert!(state.apply_event(&ServerEvent::TaskCreated {
        list_id: ListId(11),
        task: real.clone(),
    }));
    state.settle(pending, Ok(Committed::Task(real)));
    assert_eq!(ids(state.tasks_in(ListId(11))), vec![500]);
}

#[test]
fn failed_create_removes_temporary_entity() {
    let mut state = state();
    let pending = state
        .apply(MutationRequest::CreateList {
            board_id: Some(BoardId(1)),
            title: Some("Done".into()),
            placement: None,
        })
        .expect("apply");
    assert_eq!(state.lists().len(), 3);
    assert_eq!(state.lists().last().map(|l| l.position), Some(2.0));

    state.settle(
        pending,
        Err(ApiError::new(ErrorCode::Forbidden, "not a board member")),
    );
    assert_eq!(state.lists().len(), 2);
}

#[test]
fn local_checks_fail_before_touching_state() {
    let mut state = state();
    let err = state
        .apply(MutationRequest::DeleteList {
            list_id: ListId(10),
        })
        .expect_err("non-empty list");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(state.list(ListId(10)).is_some());

    let err = state
        .apply(MutationRequest::CreateTask {
            list_id: Some(ListId(10)),
            title: Some("   ".into()),
            description: None,
            placement: None,
            priority: None,
            assignee_id: None,
            due_date: None,
        })
        .expect_err("blank title");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(state.tasks_in(ListId(10)).len(), 2);
}

#[test]
fn rejected_delete_brings_task_back() {
    let mut state = state();
    let pending = state
        .apply(MutationRequest::DeleteTask {
            task_id: TaskId(100),
        })
        .expect("apply");
    assert!(state.task(TaskId(100)).is_none());
    state.settle(
        pending,
        Err(ApiError::new(ErrorCode::Unavailable, "store unavailable")),
    );
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![100, 101]);
}

#[test]
fn update_clears_nullable_fields_and_reverts() {
    let mut state = state();
    let pending = state
        .apply(MutationRequest::UpdateTask {
            task_id: TaskId(100),
            title: None,
            description: Some(Some("notes".into())),
            priority: Some(Priority::High),
            position: None,
            assignee_id: None,
            due_date: None,
        })
        .expect("apply");
    let edited = state.task(TaskId(100)).cloned().expect("task");
    assert_eq!(edited.description.as_deref(), Some("notes"));
    assert_eq!(edited.priority, Priority::High);

    state.settle(pending, Err(ApiError::validation("nope")));
    assert_eq!(state.task(TaskId(100)).cloned(), Some(task(100, 10, 0.0)));
}

#[test]
fn successive_edits_stack() {
    let mut state = state();
    let first = state
        .apply(MutationRequest::UpdateBoard {
            board_id: BoardId(1),
            name: Some("Q3".into()),
            description: None,
            color: None,
        })
        .expect("apply");
    let second = state
        .apply(MutationRequest::UpdateBoard {
            board_id: BoardId(1),
            name: Some("Q4".into()),
            description: None,
            color: None,
        })
        .expect("apply");
    assert_ne!(first.request(), second.request());
    assert_eq!(state.board().name, "Q4");
}

#[test]
fn move_between_tied_tasks_compacts_the_list_locally() {
    let mut state = state();
    for id in [200, 201] {
        state.apply_event(&ServerEvent::TaskCreated {
            list_id: ListId(11),
            task: task(id, 11, 0.0),
        });
    }

    state
        .apply(MutationRequest::MoveTask {
            task_id: TaskId(100),
            to_list_id: Some(ListId(11)),
            placement: Some(Placement::Index(1)),
            from_list_id: None,
        })
        .expect("apply");
    assert_eq!(ids(state.tasks_in(ListId(11))), vec![200, 100, 201]);
    let positions: Vec<f64> = state
        .tasks_in(ListId(11))
        .into_iter()
        .map(|task| task.position)
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn reset_replaces_contents() {
    let mut state = state();
    state.apply_event(&ServerEvent::TaskDeleted {
        list_id: ListId(10),
        task_id: TaskId(100),
    });
    let fresh = self::state();
    let snapshot = BoardSnapshot {
        board: fresh.board().clone(),
        lists: vec![ListWithTasks {
            list: list(10, 0.0),
            tasks: vec![task(100, 10, 0.0)],
        }],
        members: Vec::new(),
    };
    state.reset(snapshot);
    assert_eq!(ids(state.tasks_in(ListId(10))), vec![100]);
    assert!(state.list(ListId(11)).is_none());
    assert!(state.members().is_empty());
}
