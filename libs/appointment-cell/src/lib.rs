pub mod models;
pub mod notify;
pub mod services;
pub mod stores;

pub use models::*;
