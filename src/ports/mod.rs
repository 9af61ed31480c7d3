//! Port traits: the collaborators the core depends on.

pub mod broker_port;
pub mod config_port;
pub mod data_port;
pub mod feed_port;
pub mod report_port;
