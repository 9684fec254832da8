// Engine configuration (TOML)
pub mod config;

// Per-connector sliding-window admission control
pub mod rate_limit;

// In-memory OAuth2 token cache
pub mod credentials;

// JSON path interpreter over response payloads
pub mod extract;

// Pagination state machine (cursor / offset / page / time window)
pub mod pagination;
