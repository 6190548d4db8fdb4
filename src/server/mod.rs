pub mod dto;
mod lookup;
mod registry;
pub mod response;
mod router;
mod terrareg;
pub mod validation;

pub use router::{AppState, create_router};
