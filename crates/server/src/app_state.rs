use std::sync::Arc;

use sync_core::{Coordinator, RoomRegistry};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: Coordinator,
    pub(crate) registry: Arc<RoomRegistry>,
    pub(crate) outbox_capacity: usize,
}
