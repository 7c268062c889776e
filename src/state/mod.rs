//! State module for completed fetches
//!
//! Every queue entry that is fetched successfully ends as exactly one access
//! record; [`AccessStatus`] records what happened to the page after the fetch.

mod access_status;

pub use access_status::AccessStatus;
