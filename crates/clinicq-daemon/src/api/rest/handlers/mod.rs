//! API request handlers

mod arrivals;
mod authorizations;
mod directory;
mod events;
mod health;
mod notifications;
mod queue;
mod requests;

pub use arrivals::*;
pub use authorizations::*;
pub use directory::*;
pub use events::*;
pub use health::*;
pub use notifications::*;
pub use queue::*;
pub use requests::*;
