//! Query engine behind public (anonymous) dashboards: template variable
//! interpolation, per-panel metric request construction and variable option
//! resolution.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;
