pub mod audit;
pub mod config;
pub mod db;
pub mod loader;
pub mod model;
pub mod runner;
pub mod slug;
pub mod transform;
pub mod translate;
