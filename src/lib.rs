pub mod agent;
pub mod attachments;
pub mod config;
pub mod errors;
pub mod gate;
pub mod logging;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod publish;
pub mod repo;
pub mod server;
pub mod verify;
