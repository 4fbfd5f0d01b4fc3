#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod store;
pub mod urlnorm;
pub mod virtualize;
