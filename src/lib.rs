// src/lib.rs — Library root for plancraft

pub mod capability;
pub mod cli;
pub mod core;
pub mod executor;
pub mod infra;
pub mod learner;
pub mod ledger;
pub mod memory;
pub mod planner;
pub mod provider;
