pub mod config;
pub mod errors;
pub mod models;
pub mod ports;
pub mod state;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use models::*;
pub use ports::*;
pub use state::*;
pub use traits::*;
