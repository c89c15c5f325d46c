pub mod alerts;
pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod notify;
pub mod pipeline;
pub mod readings;
