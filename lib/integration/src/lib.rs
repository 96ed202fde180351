//! Task tracker integrations for lead-intake.
//!
//! Currently a single tracker: Monday.com, reached through its GraphQL API.

pub mod config;
mod graphql;
pub mod monday;

pub use config::{DEFAULT_API_URL, MondayConfig};
pub use monday::MondayTracker;
