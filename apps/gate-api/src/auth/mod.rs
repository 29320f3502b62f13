pub mod cookies;
pub mod identity;
pub mod orchestrator;
pub mod tokens;
