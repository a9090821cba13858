/// OpenAPI documentation generation.
pub mod documentation;
/// Bounded worker pool for finished-game exports.
pub mod export_worker;
/// Read-only game lookup.
pub mod game_query_service;
/// Live game sessions: join, relay, finalize, disconnect.
pub mod game_session_service;
/// Health check service.
pub mod health_service;
/// Matchmaking queue handling and liveness sweep.
pub mod matchmaking_service;
/// Storage reconnection supervisor.
pub mod storage_supervisor;
