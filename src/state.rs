use crate::store::SqliteStore;

#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
}

impl AppState {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}
