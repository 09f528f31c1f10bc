//! hookline: launches a game, hooks its text output and fans each line out to
//! configurable translation backends.
pub mod config;
pub mod event;
pub mod game;
pub mod history;
pub mod hooks;
pub mod injector;
pub mod paths;
pub mod process_monitor;
pub mod segmenter;
pub mod status;
pub mod translate;
