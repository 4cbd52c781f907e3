pub mod fetch;
pub mod logger;
