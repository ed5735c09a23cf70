pub mod arena;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod content;
pub mod project;
pub mod site;
