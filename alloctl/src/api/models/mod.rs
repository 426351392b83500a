//! API request and response models.
//!
//! These are distinct from the engine types so the wire format can stay stable while the engine
//! evolves. Numeric input fields accept either JSON numbers or numeric strings, since the browser
//! client posts `<select>` values as strings.

pub mod allocations;
pub mod requests;
pub mod resources;
