//! API request handlers

mod approvals;
mod health;
mod intake;

pub use approvals::*;
pub use health::*;
pub use intake::*;
