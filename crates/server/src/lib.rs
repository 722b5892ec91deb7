pub mod circuit_breaker;
pub mod classify;
pub mod enrich;
pub mod extract;
pub mod hierarchy;
pub mod http;
pub mod import;
pub mod keystore;
pub mod llm;
pub mod retry;
pub mod similarity;
pub mod store;
