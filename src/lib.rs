//! Image processing pipeline
//!
//! This library provides the core of the image-pro system: clients upload an
//! image together with an ordered list of operations, a pool of workers
//! renders the result into S3-compatible storage, and a reaper purges jobs
//! once their download window has lapsed.

pub mod app_state;
pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
