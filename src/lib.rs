pub mod config;
pub mod dataset;
pub mod error;
pub mod fusion;
pub mod geometry;
pub mod grabber;
pub mod io;
