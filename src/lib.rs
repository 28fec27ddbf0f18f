pub mod config;
pub mod cookies;
pub mod import;
pub mod jobs;
pub mod kv;
pub mod mitre;
pub mod model;
pub mod notion;
pub mod oauth;
pub mod outbox;
pub mod server;
pub mod stix;
pub mod updates;
