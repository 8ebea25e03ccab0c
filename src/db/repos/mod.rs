pub mod characters;
pub mod runs;
pub mod settings;
pub mod stats;
pub mod sync_history;
