use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{EstimatorError, ProbeError, VerifyError};
use crate::mcp::{ClientInfo, Handshake, Session};
use crate::server::ServerDescriptor;
use crate::tokens::{canonical_tool_text, FramingOverhead, TokenEstimator};

use super::result::{Capabilities, VerificationResult};

/// The part of a session the verifier drives.
#[async_trait]
pub(crate) trait HandshakeSession: Send {
    async fn handshake(&mut self) -> Result<Handshake, VerifyError>;
    async fn close(self) -> Option<String>;
}

#[async_trait]
impl HandshakeSession for Session {
    async fn handshake(&mut self) -> Result<Handshake, VerifyError> {
        Session::handshake(self).await
    }

    async fn close(self) -> Option<String> {
        Session::close(self).await
    }
}

/// Connects to tool servers, lists their tools and prices them.
///
/// Cheap to clone; clones share the estimator.
#[derive(Clone)]
pub struct Verifier {
    estimator: Arc<dyn TokenEstimator>,
    overhead: FramingOverhead,
    client: ClientInfo,
}

impl Verifier {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            overhead: FramingOverhead::default(),
            client: ClientInfo::default(),
        }
    }

    pub fn with_overhead(mut self, overhead: FramingOverhead) -> Self {
        self.overhead = overhead;
        self
    }

    pub fn with_client_info(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    /// Verify one server within `timeout`, measured from the moment of the call.
    ///
    /// Connection, protocol and timeout problems come back as a non-success
    /// `VerificationResult`. Only an invalid descriptor or a failing
    /// estimator surface as `Err`.
    pub async fn verify_server(
        &self,
        descriptor: &ServerDescriptor,
        timeout: Duration,
    ) -> Result<VerificationResult, ProbeError> {
        let start = Instant::now();
        descriptor.validate()?;
        info!("verifying {}", descriptor);

        let session = match Session::open(descriptor, &self.client) {
            Ok(session) => session,
            Err(e) => {
                warn!("{}: {}", descriptor.name, e);
                return Ok(VerificationResult::failure(&descriptor.name, e.to_string()));
            }
        };
        self.drive(&descriptor.name, session, start, timeout).await
    }

    /// Verify every descriptor concurrently, one task each. Results line up
    /// with `descriptors`; one server's outcome never affects another's.
    pub async fn verify_batch(
        &self,
        descriptors: &[ServerDescriptor],
        timeout: Duration,
    ) -> Vec<Result<VerificationResult, ProbeError>> {
        let handles: Vec<_> = descriptors
            .iter()
            .cloned()
            .map(|descriptor| {
                let verifier = self.clone();
                tokio::spawn(async move { verifier.verify_server(&descriptor, timeout).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (descriptor, handle) in descriptors.iter().zip(handles) {
            results.push(match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(ProbeError::TaskFailed {
                    server: descriptor.name.clone(),
                    reason: join_err.to_string(),
                }),
            });
        }
        results
    }

    pub(crate) async fn drive<S: HandshakeSession>(
        &self,
        server: &str,
        mut session: S,
        start: Instant,
        timeout: Duration,
    ) -> Result<VerificationResult, ProbeError> {
        let outcome = tokio::time::timeout_at(start + timeout, session.handshake()).await;

        let handshake = match outcome {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => {
                let stderr = session.close().await;
                warn!("{}: {}", server, e);
                return Ok(VerificationResult::failure(server, with_stderr(&e, stderr)));
            }
            Err(_elapsed) => {
                session.close().await;
                let e = VerifyError::Timeout(timeout.as_millis());
                warn!("{}: {}", server, e);
                return Ok(VerificationResult::timeout(server, e.to_string()));
            }
        };
        let connection_time = start.elapsed();

        let priced = self.price(handshake).await;
        session.close().await;
        let capabilities = priced?;

        info!(
            "{}: {} tool(s), {} tokens, connected in {}ms",
            server,
            capabilities.tools.len(),
            capabilities.total_tool_tokens,
            connection_time.as_millis()
        );
        Ok(VerificationResult::success(
            server,
            connection_time,
            capabilities,
        ))
    }

    async fn price(&self, handshake: Handshake) -> Result<Capabilities, EstimatorError> {
        let mut tool_token_counts = BTreeMap::new();
        let mut total = 0;
        for tool in &handshake.tools {
            let tokens = self.estimator.estimate(&canonical_tool_text(tool)).await?;
            tool_token_counts.insert(tool.name.clone(), tokens);
            total += tokens;
        }
        total += self
            .overhead
            .tokens(self.estimator.as_ref(), &handshake.envelope)
            .await?;

        Ok(Capabilities {
            protocol_version: handshake.protocol_version,
            server_info: handshake.server_info,
            tools: handshake.tools,
            tool_token_counts,
            total_tool_tokens: total,
        })
    }
}

fn with_stderr(error: &VerifyError, stderr: Option<String>) -> String {
    match stderr {
        Some(text) => format!("{error}\nstderr: {text}"),
        None => error.to_string(),
    }
}
