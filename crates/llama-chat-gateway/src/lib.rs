pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;
pub mod utils;
