// Motor command runtime: zenoh commands in, GPIO motor actuation out

pub mod config;
pub mod dispatch;
pub mod messages;
pub mod motor;
pub mod runtime;
