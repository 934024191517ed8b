pub mod action;
pub mod app;
pub mod commands;
pub mod config;
pub mod data;
pub mod event;
pub mod filter;
pub mod handlers;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod parse;
pub mod rcon;
pub mod relay;
pub mod shutdown;
pub mod store;
pub mod sweeper;
pub mod warning;

pub const BOT_NAME: &str = "gamewarden";
pub const ACTION_TARGET: &str = "gamewarden::action";
pub const COMMAND_TARGET: &str = "gamewarden::command";
pub const ERROR_TARGET: &str = "gamewarden::error";
pub const EVENT_TARGET: &str = "gamewarden::event";
pub const CONSOLE_TARGET: &str = "gamewarden";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
