pub mod agent;
pub mod command;
pub mod errors;
pub mod models;
pub mod providers;
pub mod servers;
pub mod systems;
pub mod transcript;
