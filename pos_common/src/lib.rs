mod minor_units;

pub mod helpers;
pub mod op;
mod secret;

pub use minor_units::{MinorUnits, MAX_MINOR_UNITS};
pub use secret::Secret;
