mod app_state;
mod settings;

pub use app_state::SyncState;
pub use settings::{default_data_dir, PersistentMount, SyncSettings};
