mod app;
mod config;
mod display;
mod logging;

pub use app::run_from_args;
