// src/lib.rs — Library root for fieldwatch

pub mod analysis;
pub mod api;
pub mod cli;
pub mod client;
pub mod db;
pub mod detection;
pub mod distribution;
pub mod escalation;
pub mod infra;
pub mod provider;
pub mod session;
pub mod util;
