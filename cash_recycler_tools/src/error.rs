use thiserror::Error;

#[derive(Debug, Error)]
pub enum CashRecyclerError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Could not send request to the cash recycler: {0}")]
    RequestError(String),
    #[error("Invalid response from the cash recycler: {0}")]
    ResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Login to the cash recycler failed. {0}")]
    AuthenticationFailed(String),
}

impl CashRecyclerError {
    /// True if the machine rejected the bearer token, meaning a fresh login may succeed.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::QueryError { status: 401 | 403, .. })
    }
}
