pub mod errors;
pub mod session_api;
