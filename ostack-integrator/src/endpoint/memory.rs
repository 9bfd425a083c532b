//! In-process endpoint.
//!
//! Clones share state, so a test can keep a handle while the agent owns
//! another and inspect the responses the agent sent.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Answered, CredentialsEndpoint, Endpoint, Keyed, Settled};
use crate::credentials::CredentialSet;
use crate::error::EndpointError;

struct MemoryState<Req, Resp> {
    joined: bool,
    requests: BTreeMap<String, Req>,
    answers: BTreeMap<String, Answered<Req, Resp>>,
    sent: usize,
    completed: usize,
}

pub struct MemoryEndpoint<Req, Resp> {
    name: String,
    state: Arc<Mutex<MemoryState<Req, Resp>>>,
}

impl<Req, Resp> Clone for MemoryEndpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<Req, Resp> MemoryEndpoint<Req, Resp>
where
    Req: Keyed + Clone,
    Resp: Clone,
{
    /// A joined endpoint with no requests.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MemoryState {
                joined: true,
                requests: BTreeMap::new(),
                answers: BTreeMap::new(),
                sent: 0,
                completed: 0,
            })),
        }
    }

    pub async fn set_joined(&self, joined: bool) {
        self.state.lock().await.joined = joined;
    }

    /// Add a request, replacing any request with the same key.
    pub async fn put_request(&self, request: Req) {
        let key = request.key().to_string();
        self.state.lock().await.requests.insert(key, request);
    }

    pub async fn remove_request(&self, key: &str) {
        self.state.lock().await.requests.remove(key);
    }

    /// Latest response sent for `key`.
    pub async fn response(&self, key: &str) -> Option<Resp> {
        self.state
            .lock()
            .await
            .answers
            .get(key)
            .map(|answer| answer.response.clone())
    }

    /// Number of responses sent so far.
    pub async fn sent(&self) -> usize {
        self.state.lock().await.sent
    }

    /// Number of times the batch was marked completed.
    pub async fn completed(&self) -> usize {
        self.state.lock().await.completed
    }
}

#[async_trait]
impl<Req, Resp> Endpoint for MemoryEndpoint<Req, Resp>
where
    Req: Keyed + PartialEq + Clone + Send + Sync,
    Resp: Settled + Clone + Send + Sync,
{
    type Request = Req;
    type Response = Resp;

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_joined(&self) -> bool {
        self.state.lock().await.joined
    }

    async fn new_requests(&self) -> Result<Vec<Req>, EndpointError> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|request| {
                !state
                    .answers
                    .get(request.key())
                    .is_some_and(|answer| answer.answers(request))
            })
            .cloned()
            .collect())
    }

    async fn all_requests(&self) -> Result<Vec<Req>, EndpointError> {
        Ok(self.state.lock().await.requests.values().cloned().collect())
    }

    async fn last_response(&self, key: &str) -> Result<Option<Resp>, EndpointError> {
        Ok(self.response(key).await)
    }

    async fn send_response(&self, request: &Req, response: Resp) -> Result<(), EndpointError> {
        let mut state = self.state.lock().await;
        state.sent += 1;
        state.answers.insert(
            request.key().to_string(),
            Answered {
                settled: response.settled(),
                request: request.clone(),
                response,
            },
        );
        Ok(())
    }

    async fn mark_completed(&self) -> Result<(), EndpointError> {
        self.state.lock().await.completed += 1;
        Ok(())
    }
}

#[derive(Default)]
struct ExposedState {
    joined: bool,
    credentials: Option<CredentialSet>,
    writes: usize,
}

/// In-process "credentials" relation. Clones share state.
#[derive(Clone)]
pub struct MemoryCredentials {
    name: String,
    state: Arc<Mutex<ExposedState>>,
}

impl MemoryCredentials {
    /// A joined relation nothing was exposed on yet.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(ExposedState {
                joined: true,
                ..Default::default()
            })),
        }
    }

    pub async fn set_joined(&self, joined: bool) {
        self.state.lock().await.joined = joined;
    }

    pub async fn credentials(&self) -> Option<CredentialSet> {
        self.state.lock().await.credentials.clone()
    }

    /// Number of times credentials were written.
    pub async fn writes(&self) -> usize {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl CredentialsEndpoint for MemoryCredentials {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_joined(&self) -> bool {
        self.state.lock().await.joined
    }

    async fn exposed(&self) -> Result<Option<CredentialSet>, EndpointError> {
        Ok(self.credentials().await)
    }

    async fn expose_credentials(&self, credentials: &CredentialSet) -> Result<(), EndpointError> {
        let mut state = self.state.lock().await;
        state.credentials = Some(credentials.clone());
        state.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{LoadBalancerRequest, ProvisionResponse};

    #[tokio::test]
    async fn test_clones_share_state() {
        let endpoint: MemoryEndpoint<LoadBalancerRequest, ProvisionResponse> =
            MemoryEndpoint::new("lb-consumers");
        let handle = endpoint.clone();

        endpoint.put_request(LoadBalancerRequest::new("app")).await;
        assert_eq!(handle.new_requests().await.unwrap().len(), 1);

        let request = LoadBalancerRequest::new("app");
        endpoint
            .send_response(&request, ProvisionResponse::provisioned("192.0.2.1"))
            .await
            .unwrap();
        assert!(handle.new_requests().await.unwrap().is_empty());
        assert_eq!(
            handle.response("app").await.and_then(|r| r.address),
            Some("192.0.2.1".to_string())
        );
    }
}
