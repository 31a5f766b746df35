//! Type definitions for CRM storage.

mod directory;
mod ids;
mod schema;
mod tenant;

pub use directory::*;
pub use ids::*;
pub use schema::*;
pub use tenant::*;
