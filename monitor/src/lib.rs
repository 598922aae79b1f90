pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod page;
pub mod rest;
pub mod series;
