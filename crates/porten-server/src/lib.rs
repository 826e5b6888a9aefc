pub mod auth;
pub mod config;
pub mod state;
pub mod users;
pub mod web;
