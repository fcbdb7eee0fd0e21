// src/lib.rs

use crate::engine::Engine;

pub mod db;
pub mod engine;
pub mod models;
pub mod notify;
pub mod routes;
pub mod storage;
pub mod store;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}
