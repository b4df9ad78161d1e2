use std::sync::Arc;

use config::Config;
use hub::Hub;
use proximity::ProximityEngine;

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod hub;
pub mod middleware;
pub mod models;
pub mod privacy;
pub mod proximity;
pub mod router;
pub mod routes;
pub mod tasks;
pub mod utils;

#[cfg(test)]
mod testing;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ProximityEngine>,
    pub hub: Arc<Hub>,
}
