//! Peer-call helper.
//!
//! Resolves a service name through the keepalive registry, POSTs an
//! action-keyed JSON body to the peer root, and attaches the identity
//! headers so the callee can record this caller in its trace map.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::keepalive::registry::{
    Keepalive, SERVICE_ADDRESS_HEADER, SERVICE_NAME_HEADER,
};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service {0} has no resolvable address")]
    NoAddress(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Call a peer service with the default timeout.
pub async fn call_service<Req, Rsp>(
    keepalive: &Keepalive,
    service: &str,
    request: &Req,
) -> Result<Rsp, ClientError>
where
    Req: Serialize,
    Rsp: DeserializeOwned,
{
    call_service_with_timeout(keepalive, service, request, DEFAULT_CALL_TIMEOUT).await
}

/// Call a peer service, bounding the round trip.
pub async fn call_service_with_timeout<Req, Rsp>(
    keepalive: &Keepalive,
    service: &str,
    request: &Req,
    timeout: Duration,
) -> Result<Rsp, ClientError>
where
    Req: Serialize,
    Rsp: DeserializeOwned,
{
    let (address, is_primary) = keepalive
        .resolve(service)
        .ok_or_else(|| ClientError::NoAddress(service.to_string()))?;
    tracing::debug!(
        service = %service,
        address = %address,
        is_primary = is_primary,
        "calling peer service"
    );
    let identity = keepalive.identity();
    let response = keepalive
        .client
        .post(format!("{}/", address))
        .timeout(timeout)
        .header(SERVICE_NAME_HEADER, &identity.name)
        .header(SERVICE_ADDRESS_HEADER, &identity.primary_address)
        .json(request)
        .send()
        .await?;
    Ok(response.json::<Rsp>().await?)
}
