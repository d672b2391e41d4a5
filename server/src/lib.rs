//! yatc feeds service library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod feed;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod upstream;
