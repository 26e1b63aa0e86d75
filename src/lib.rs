//! Library crate for trivia-back, exposing modules for the binary and tests.

pub mod config;
pub mod dto;
pub mod error;
pub mod questions;
pub mod routes;
pub mod services;
pub mod state;
