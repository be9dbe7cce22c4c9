// src/core/mod.rs — Core data model and the request engine

pub mod engine;
pub mod graph;
pub mod params;
pub mod types;
