pub mod analyze;
pub mod notice;
pub mod packaging;

pub use analyze::*;
pub use notice::*;
pub use packaging::*;
