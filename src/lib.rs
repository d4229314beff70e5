pub mod batch;
pub mod channel;
pub mod common;
pub mod configs;
pub mod server;
pub mod service;
pub mod stick;
pub mod timer;
pub mod transport;
pub mod vote;
