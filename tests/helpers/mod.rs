#![allow(dead_code)]

pub mod connection_tracker;
pub mod hello_capture;
pub mod mock_h2_server;
pub mod mock_server;
pub mod tls;
