//! Request/response transport between the integrator and its consumers.
//!
//! An endpoint delivers requests of one relation ("lb-consumers", "clients",
//! "loadbalancer") and accepts one response per request. The "credentials"
//! relation has no requests; the integrator only publishes on it.
//!
//! - `spool`: requests and responses as JSON files in a directory
//! - `memory`: in-process endpoint for tests and development

pub mod memory;
pub mod spool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSet;
use crate::error::EndpointError;

pub use memory::{MemoryCredentials, MemoryEndpoint};
pub use spool::{SpoolCredentials, SpoolEndpoint};

/// Relation carrying `LoadBalancerRequest`s.
pub const RELATION_LB_CONSUMERS: &str = "lb-consumers";

/// Relation carrying integration client requests.
pub const RELATION_CLIENTS: &str = "clients";

/// Older relation carrying explicit member lists.
pub const RELATION_LOADBALANCER: &str = "loadbalancer";

/// Relation the current cloud credentials are published on.
pub const RELATION_CREDENTIALS: &str = "credentials";

/// Identity of a request within its endpoint.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Whether a response closes its request.
///
/// An unsettled response is delivered but the request stays pending and is
/// selected again as "new" on the next pass.
pub trait Settled {
    fn settled(&self) -> bool;
}

/// Response as remembered by an endpoint, together with the request it
/// answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answered<Req, Resp> {
    pub request: Req,
    pub response: Resp,
    pub settled: bool,
}

impl<Req: PartialEq, Resp> Answered<Req, Resp> {
    /// A request is pending unless it was answered, unchanged since, and the
    /// answer was final.
    pub fn answers(&self, request: &Req) -> bool {
        self.settled && self.request == *request
    }
}

/// Transport for one relation.
#[async_trait]
pub trait Endpoint: Send + Sync {
    type Request: Keyed + Send + Sync;
    type Response: Settled + Send + Sync;

    /// Relation name, for logs.
    fn name(&self) -> &str;

    /// Whether any consumer is connected.
    async fn is_joined(&self) -> bool;

    /// Requests that arrived or changed since they were last answered.
    async fn new_requests(&self) -> Result<Vec<Self::Request>, EndpointError>;

    /// The complete current request set.
    async fn all_requests(&self) -> Result<Vec<Self::Request>, EndpointError>;

    /// Commit the response to `request` back to its requester.
    async fn send_response(
        &self,
        request: &Self::Request,
        response: Self::Response,
    ) -> Result<(), EndpointError>;

    /// Response most recently sent for the request keyed `key`.
    async fn last_response(&self, key: &str) -> Result<Option<Self::Response>, EndpointError>;

    /// Acknowledge that the whole batch was processed.
    async fn mark_completed(&self) -> Result<(), EndpointError>;
}

/// Publishing side of the "credentials" relation.
#[async_trait]
pub trait CredentialsEndpoint: Send + Sync {
    fn name(&self) -> &str;

    async fn is_joined(&self) -> bool;

    /// Credentials currently exposed, if any.
    async fn exposed(&self) -> Result<Option<CredentialSet>, EndpointError>;

    async fn expose_credentials(&self, credentials: &CredentialSet) -> Result<(), EndpointError>;
}
