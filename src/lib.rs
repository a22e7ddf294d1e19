// Public API for integration tests and the server binary

pub mod api;
pub mod backend;
pub mod llm;
pub mod session;
pub mod setup;
pub mod smack;
pub mod types;
