pub mod backends;
pub mod config_loader;
pub mod control;
pub mod controller;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod navigator;
pub mod session;
pub mod state;
pub mod storage;
pub mod text_prep;
pub mod tracking;
