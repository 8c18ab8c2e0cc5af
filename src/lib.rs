pub mod api;
pub mod config;
pub mod course;
pub mod error;
pub mod progression;
pub mod store;
pub mod student;
pub mod utils;

pub use error::{Error, Result};
