// Drafter API: resilience layer and routes for drafting marketing copy.
// The binary in main.rs wires these together; everything else lives here.

pub mod config;
pub mod errors;
pub mod llm_client;
pub mod operations;
pub mod provenance;
pub mod resilience;
pub mod routes;
pub mod sequences;
pub mod state;
