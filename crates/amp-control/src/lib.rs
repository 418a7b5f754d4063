pub mod audio;
pub mod cli;
pub mod clock;
pub mod config;
pub mod controller;
pub mod runtime;
pub mod transport;
