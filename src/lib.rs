//! Curates named, reproducible datasets out of a converted imaging pool.
//!
//! A working root holds the pool under `converted/` and any number of
//! sibling dataset directories. Datasets reference pool objects through
//! relative symbolic links and keep one merged manifest per patient.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod manifest;
pub mod output;
pub mod preparation;
pub mod store;
pub mod structures;
pub mod volume;
