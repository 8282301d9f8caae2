pub mod blobs;
pub mod db;
pub mod error;
pub mod http;
pub mod telegram;
pub mod telemetry;
