pub mod compression;
pub mod config;
pub mod control;
pub mod driver;
pub mod errors;
pub mod handlers;
pub mod probe;
pub mod scheduler;
pub mod stats;
pub mod store;

// Re-export commonly used items for easier testing
pub use compression::*;
pub use config::*;
pub use control::*;
pub use driver::*;
pub use errors::*;
pub use probe::*;
pub use stats::*;
