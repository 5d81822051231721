use serde::de::DeserializeOwned;

use crate::CashRecyclerError;

/// A fresh idempotency reference for a start-payment request.
pub fn new_payment_reference() -> String {
    format!("POS-{:016x}", rand::random::<u64>())
}

/// The machine answers some calls with an empty body. Those are read as the default value of the expected type.
pub fn parse_json_or_default<T: DeserializeOwned + Default>(body: &str) -> Result<T, CashRecyclerError> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| CashRecyclerError::JsonError(format!("{e}. Body: {body}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ActiveTransaction;

    #[test]
    fn references_are_unique() {
        let a = new_payment_reference();
        let b = new_payment_reference();
        assert!(a.starts_with("POS-"));
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_bodies_are_defaults() {
        let t: ActiveTransaction = parse_json_or_default("  ").unwrap();
        assert_eq!(t, ActiveTransaction::idle());
        let err = parse_json_or_default::<ActiveTransaction>("<html>").unwrap_err();
        assert!(matches!(err, CashRecyclerError::JsonError(_)));
    }
}
