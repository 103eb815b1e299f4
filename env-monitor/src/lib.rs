pub mod app;
pub mod config;
pub mod health;
pub mod logging;
pub mod processor;
pub mod prometheus;
pub mod reading;
pub mod router;
pub mod sensors;
