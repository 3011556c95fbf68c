//! Request guards, applied in order before an operation reaches the engine:
//! API key, then principal resolution.

use ulid::Ulid;

use crate::engine::{BookingError, Engine, Entity};
use crate::model::Business;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::protocol::Principal;

fn refuse(reason: &'static str, err: BookingError) -> BookingError {
    metrics::counter!(AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    tracing::debug!(reason, "request refused");
    err
}

pub fn require_api_key(expected: &str, provided: &str) -> Result<(), BookingError> {
    // Compare digests so the check does not leak the key length or prefix.
    if blake3::hash(expected.as_bytes()) == blake3::hash(provided.as_bytes()) {
        Ok(())
    } else {
        Err(refuse("api_key", BookingError::Forbidden("invalid api key")))
    }
}

/// The acting client, which must exist.
pub async fn require_client(engine: &Engine, principal: Option<Principal>) -> Result<Ulid, BookingError> {
    let Some(Principal::Client(id)) = principal else {
        return Err(refuse("principal", BookingError::Forbidden("operation requires a client")));
    };
    match engine.client(&id).await {
        Some(_) => Ok(id),
        None => Err(refuse("unknown_client", BookingError::NotFound(Entity::Client, id))),
    }
}

/// The acting business, which must exist and be verified.
pub async fn require_business(engine: &Engine, principal: Option<Principal>) -> Result<Business, BookingError> {
    let Some(Principal::Business(id)) = principal else {
        return Err(refuse("principal", BookingError::Forbidden("operation requires a business")));
    };
    let business = engine
        .business(&id)
        .await
        .ok_or_else(|| refuse("unknown_business", BookingError::NotFound(Entity::Business, id)))?;
    if !business.verified {
        return Err(refuse("unverified", BookingError::Forbidden("business is not verified")));
    }
    Ok(business)
}
