pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod store;
