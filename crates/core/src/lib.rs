pub mod anomaly;
pub mod config;
pub mod error;
pub mod sensor;

pub use anomaly::*;
pub use config::Config;
pub use error::*;
pub use sensor::*;
