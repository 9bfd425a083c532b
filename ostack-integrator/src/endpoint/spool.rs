//! Directory-backed endpoint.
//!
//! Layout under `<spool>/<relation>/`:
//!
//! ```text
//! requests/<any>.json     one request per file, written by consumers
//! responses/<key>.json    {"request": ..., "response": ..., "settled": bool}
//! completed               RFC 3339 timestamp of the last completed batch
//! rejected/<any>.json.error  parse error of a request file that was skipped
//! ```
//!
//! The relation counts as joined while its `requests/` directory exists.
//!
//! The "credentials" relation is a single `<spool>/credentials/credentials.json`
//! written by [`SpoolCredentials`]; it counts as joined while the directory
//! exists.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{Answered, CredentialsEndpoint, Endpoint, Keyed, Settled};
use crate::credentials::CredentialSet;
use crate::error::EndpointError;

pub struct SpoolEndpoint<Req, Resp> {
    name: String,
    dir: PathBuf,
    _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req, Resp> SpoolEndpoint<Req, Resp> {
    pub fn new(spool: &Path, relation: &str) -> Self {
        Self {
            name: relation.to_string(),
            dir: spool.join(relation),
            _marker: PhantomData,
        }
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.dir.join("requests")
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.dir.join("responses")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.dir.join("rejected")
    }

    fn response_path(&self, key: &str) -> PathBuf {
        self.responses_dir().join(format!("{}.json", file_key(key)))
    }

    fn rejection_path(&self, request_path: &Path) -> PathBuf {
        let file = request_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.rejected_dir().join(format!("{}.error", file))
    }

    /// Record why a request file was skipped. Warns once per distinct error.
    async fn reject(&self, request_path: &Path, message: &str) -> Result<(), EndpointError> {
        let note = self.rejection_path(request_path);
        if tokio::fs::read_to_string(&note)
            .await
            .is_ok_and(|previous| previous == message)
        {
            debug!(relation = %self.name, path = %request_path.display(), "Request still malformed");
            return Ok(());
        }
        warn!(
            relation = %self.name,
            path = %request_path.display(),
            error = message,
            "Skipping malformed request"
        );

        let dir = self.rejected_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| EndpointError::Io {
                path: dir.clone(),
                source,
            })?;
        tokio::fs::write(&note, message)
            .await
            .map_err(|source| EndpointError::Io { path: note, source })
    }

    async fn clear_rejection(&self, request_path: &Path) -> Result<(), EndpointError> {
        let note = self.rejection_path(request_path);
        match tokio::fs::remove_file(&note).await {
            Ok(()) => {
                info!(relation = %self.name, path = %request_path.display(), "Request no longer malformed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EndpointError::Io { path: note, source }),
        }
    }
}

impl<Req, Resp> SpoolEndpoint<Req, Resp>
where
    Req: DeserializeOwned,
    Resp: DeserializeOwned,
{
    async fn read_requests(&self) -> Result<Vec<Req>, EndpointError> {
        let dir = self.requests_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EndpointError::Io { path: dir, source }),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| EndpointError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        // A malformed file only affects its own requester.
        let mut requests = Vec::with_capacity(paths.len());
        for path in paths {
            match read_json(&path).await {
                Ok(request) => {
                    self.clear_rejection(&path).await?;
                    requests.push(request);
                }
                Err(EndpointError::Payload { source, .. }) => {
                    self.reject(&path, &source.to_string()).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(requests)
    }

    async fn read_answer(&self, key: &str) -> Result<Option<Answered<Req, Resp>>, EndpointError> {
        let path = self.response_path(key);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(source) => return Err(EndpointError::Io { path, source }),
        }
        match read_json(&path).await {
            Ok(answer) => Ok(Some(answer)),
            // An unreadable answer leaves the request pending; it is rewritten.
            Err(EndpointError::Payload { path, source }) => {
                warn!(path = %path.display(), error = %source, "Ignoring malformed response");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<Req, Resp> Endpoint for SpoolEndpoint<Req, Resp>
where
    Req: Keyed + PartialEq + Serialize + DeserializeOwned + Clone + Send + Sync,
    Resp: Settled + Serialize + DeserializeOwned + Send + Sync,
{
    type Request = Req;
    type Response = Resp;

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_joined(&self) -> bool {
        tokio::fs::try_exists(self.requests_dir())
            .await
            .unwrap_or(false)
    }

    async fn new_requests(&self) -> Result<Vec<Req>, EndpointError> {
        let mut pending = Vec::new();
        for request in self.read_requests().await? {
            let answered = self
                .read_answer(request.key())
                .await?
                .is_some_and(|answer| answer.answers(&request));
            if !answered {
                pending.push(request);
            }
        }
        Ok(pending)
    }

    async fn all_requests(&self) -> Result<Vec<Req>, EndpointError> {
        self.read_requests().await
    }

    async fn last_response(&self, key: &str) -> Result<Option<Resp>, EndpointError> {
        Ok(self.read_answer(key).await?.map(|answer| answer.response))
    }

    async fn send_response(&self, request: &Req, response: Resp) -> Result<(), EndpointError> {
        let dir = self.responses_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| EndpointError::Io {
                path: dir.clone(),
                source,
            })?;

        let path = self.response_path(request.key());
        let answered = Answered {
            settled: response.settled(),
            request: request.clone(),
            response,
        };
        let text = serde_json::to_string_pretty(&answered).map_err(|source| {
            EndpointError::Payload {
                path: path.clone(),
                source,
            }
        })?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|source| EndpointError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(relation = %self.name, request = request.key(), "Response written");
        Ok(())
    }

    async fn mark_completed(&self) -> Result<(), EndpointError> {
        let path = self.dir.join("completed");
        tokio::fs::write(&path, Utc::now().to_rfc3339())
            .await
            .map_err(|source| EndpointError::Io {
                path: path.clone(),
                source,
            })?;
        info!(relation = %self.name, "Requests marked completed");
        Ok(())
    }
}

pub struct SpoolCredentials {
    name: String,
    dir: PathBuf,
}

impl SpoolCredentials {
    pub fn new(spool: &Path, relation: &str) -> Self {
        Self {
            name: relation.to_string(),
            dir: spool.join(relation),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("credentials.json")
    }
}

#[async_trait]
impl CredentialsEndpoint for SpoolCredentials {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_joined(&self) -> bool {
        tokio::fs::try_exists(&self.dir).await.unwrap_or(false)
    }

    async fn exposed(&self) -> Result<Option<CredentialSet>, EndpointError> {
        let path = self.path();
        match read_json(&path).await {
            Ok(credentials) => Ok(Some(credentials)),
            Err(EndpointError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(None)
            }
            Err(EndpointError::Payload { source, .. }) => {
                warn!(path = %path.display(), error = %source, "Rewriting malformed credentials");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn expose_credentials(&self, credentials: &CredentialSet) -> Result<(), EndpointError> {
        let path = self.path();
        let text = serde_json::to_string_pretty(credentials).map_err(|source| {
            EndpointError::Payload {
                path: path.clone(),
                source,
            }
        })?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|source| EndpointError::Io {
                path: path.clone(),
                source,
            })?;
        info!(relation = %self.name, "Credentials exposed");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EndpointError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| EndpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&text).map_err(|source| EndpointError::Payload {
        path: path.to_path_buf(),
        source,
    })
}

/// Request keys are unit or application names, and `/` cannot appear in a
/// file name. Percent-escaping `%` too keeps distinct keys on distinct files.
fn file_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            c => escaped.push(c),
        }
    }
    escaped
}
