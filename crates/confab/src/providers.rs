pub mod base;
pub mod configs;
pub mod factory;
#[cfg(test)]
pub mod mock;
pub mod openai;
pub mod utils;
