//! Delivery policy modules.
//!
//! Maps the authenticated role to the way incoming notices are handled.

pub mod routing;
