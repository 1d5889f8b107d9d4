pub mod commit;
pub mod driver;
pub mod error;
pub mod kv;
pub mod log;
pub mod orchestrator;
pub mod persistence;
pub mod state;
pub mod state_machine;
pub mod transport;
pub mod wire;
