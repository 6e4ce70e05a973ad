pub mod enums;
pub mod models;
pub mod payload;

pub use enums::*;
pub use models::*;
pub use payload::*;
