pub mod base;
pub mod logging;
pub mod server;
pub mod stick;

pub use base::*;
pub use logging::*;
pub use server::*;
pub use stick::*;
