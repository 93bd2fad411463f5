// ABOUTME: Destination provider management API
// ABOUTME: Project discovery used by the OAuth path

pub mod client;
pub mod models;

pub use client::ManagementClient;
pub use models::Project;
