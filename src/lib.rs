//! qrchoice - QR-code choice collection and reconciliation.
//!
//! Compiles a compact schema DSL into a relational schema, ingests decoded
//! QR fragments per image, and reconciles each image onto a target row of
//! the declared tables.

pub mod cli;
pub mod config;
pub mod engine;
pub mod models;
pub mod repository;
