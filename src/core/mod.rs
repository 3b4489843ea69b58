pub mod config;
pub mod error;
pub mod scene;
pub mod state;
pub mod workspace;
