/// Completed-game export collaborators.
pub mod game_export;
/// Game record storage and retrieval operations.
pub mod game_store;
/// Persistent record definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
