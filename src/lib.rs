pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod errors;
pub mod logger;
pub mod prereq;
pub mod recovery;
pub mod report;
pub mod stage;
pub mod state;
pub mod ui;
