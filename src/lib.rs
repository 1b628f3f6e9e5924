pub mod activity;
pub mod approval;
pub mod builder;
pub mod config;
pub mod error;
pub mod kasbon;
pub mod lifecycle;
pub mod matrix;
pub mod policy;
pub mod resolver;
pub mod service;
pub mod slot_request;
pub mod slots;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use config::KasbonConfig;
pub use error::{KasbonError, ValidationError};
pub use service::KasbonService;
