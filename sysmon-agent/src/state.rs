use parking_lot::RwLock;
use std::sync::Arc;

/// Shared table: writers replace whole entries, readers copy out
pub type Shared<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}
