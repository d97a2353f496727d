//! The control-plane session: a durable, authenticated message channel to
//! the control endpoint, spanning many reconnects.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       Session                           │
//! │  discover → build URL → connect → run one connection    │
//! │  → classify the termination → delay → repeat            │
//! └────────────────────────────────────────────────────────┘
//!                            │ per attempt
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                   Connection runtime                    │
//! │  serve worker + inactivity timer + age timer +          │
//! │  cancellation watch; first to finish ends the attempt   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reconnection policy
//!
//! - Clean close (end of stream): backoff resets, reconnect immediately.
//! - Inactive instance: publish a deregistration event, wait the configured
//!   long delay.
//! - Anything else: wait the next backoff delay.
//! - Cancellation: `start()` returns `Ok(())`. Transient failures are
//!   never surfaced to the caller.

mod timer;
mod url;

pub use timer::ResettableTimer;
pub use url::{session_url, UrlParams, PROTOCOL_VERSION};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{CredentialsManager, CredentialsProvider, EndpointResolver, TaskEngine};
use crate::backoff::{add_jitter, Backoff, ExponentialBackoff};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{InstanceEvent, InstanceEventStream};
use crate::handlers::{HeartbeatHandler, PayloadHandler, RefreshCredentialsHandler};
use crate::wsclient::{ClientFactory, ClientServer};

/// Identity this agent reports to the control endpoint.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub container_instance_arn: String,
    pub agent_version: String,
    pub agent_hash: String,
}

/// Clonable handle that stops a running session.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The long-lived session state machine.
///
/// `start()` runs until cancelled via [`CancelHandle`]; every connection
/// failure is classified and retried, never surfaced.
pub struct Session {
    config: SessionConfig,
    identity: AgentIdentity,
    resolver: Arc<dyn EndpointResolver>,
    client_factory: Arc<dyn ClientFactory>,
    credentials_provider: Arc<dyn CredentialsProvider>,
    task_engine: Arc<dyn TaskEngine>,
    credentials_manager: Arc<dyn CredentialsManager>,
    deregister_stream: Option<Arc<InstanceEventStream>>,
    /// Task-manifest cursor shared with the payload handler; `None` when
    /// manifest sequencing is disabled.
    latest_seq_num: Option<Arc<AtomicI64>>,
    backoff: Box<dyn Backoff>,
    /// True only until the first successful connect of this process.
    send_credentials: bool,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        identity: AgentIdentity,
        resolver: Arc<dyn EndpointResolver>,
        client_factory: Arc<dyn ClientFactory>,
        credentials_provider: Arc<dyn CredentialsProvider>,
        task_engine: Arc<dyn TaskEngine>,
        credentials_manager: Arc<dyn CredentialsManager>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let backoff = Box::new(ExponentialBackoff::new(config.backoff.clone()));
        Self {
            config,
            identity,
            resolver,
            client_factory,
            credentials_provider,
            task_engine,
            credentials_manager,
            deregister_stream: None,
            latest_seq_num: None,
            backoff,
            send_credentials: true,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Attach the stream that receives instance deregistration events.
    pub fn with_deregister_stream(mut self, stream: Arc<InstanceEventStream>) -> Self {
        self.deregister_stream = Some(stream);
        self
    }

    /// Enable task-manifest sequencing with the given shared cursor.
    pub fn with_sequence_counter(mut self, counter: Arc<AtomicI64>) -> Self {
        self.latest_seq_num = Some(counter);
        self
    }

    /// Replace the reconnect backoff. Intended for tests.
    pub fn with_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handle that cancels this session from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Run the session until cancelled.
    ///
    /// Returns `Ok(())` on cancellation; reconnectable failures are handled
    /// internally and never returned.
    pub async fn start(mut self) -> Result<()> {
        info!(
            cluster = %self.config.cluster,
            container_instance_arn = %self.identity.container_instance_arn,
            "Starting control-plane session"
        );
        loop {
            let outcome = self.run_once().await;
            if self.is_cancelled() {
                info!("Session cancelled, stopping");
                return Ok(());
            }
            match outcome {
                Ok(()) => {}
                Err(error) if error.is_end_of_stream() => {
                    debug!("Connection closed cleanly, reconnecting immediately");
                    self.backoff.reset();
                }
                Err(error) => {
                    let inactive = error.is_inactive_instance();
                    if inactive {
                        warn!(error = %error, "Control endpoint reports instance as deregistered");
                        self.publish_deregistration(&error);
                    }
                    let delay = self.reconnect_delay(inactive);
                    info!(delay = ?delay, error = %error, "Reconnecting after delay");
                    if !self.wait_for(delay).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One full attempt: discover, build the URL, connect, run.
    async fn run_once(&mut self) -> Result<()> {
        let mut cancel_rx = self.cancel_rx.clone();
        let endpoint = tokio::select! {
            resolved = self.resolver.resolve(&self.identity.container_instance_arn) => resolved?,
            _ = cancelled(&mut cancel_rx) => return Ok(()),
        };
        debug!(endpoint = %endpoint, "Control endpoint resolved");

        let url = self.build_url(&endpoint)?;
        let credentials = self.credentials_provider.credentials()?;
        let client = self
            .client_factory
            .new_client(&url, credentials, &self.config);
        self.run_connection(client).await
    }

    fn build_url(&self, endpoint: &str) -> Result<String> {
        let docker_version = match self.task_engine.version() {
            Ok(version) => Some(version),
            Err(error) => {
                warn!(error = %error, "Task engine version unavailable");
                None
            }
        };
        let seq_num = self
            .latest_seq_num
            .as_ref()
            .map(|cursor| cursor.load(Ordering::SeqCst))
            .unwrap_or(1);
        session_url(
            endpoint,
            &UrlParams {
                cluster: &self.config.cluster,
                container_instance_arn: &self.identity.container_instance_arn,
                agent_version: &self.identity.agent_version,
                agent_hash: &self.identity.agent_hash,
                docker_version: docker_version.as_deref(),
                send_credentials: self.send_credentials,
                seq_num,
            },
        )
    }

    /// Run one live connection to completion.
    ///
    /// Spawns the serve worker, arms both timers, and waits for the first
    /// of: serve termination, inactivity expiry, age expiry, cancellation.
    /// The serve worker is always joined before this returns.
    async fn run_connection(&mut self, client: Arc<dyn ClientServer>) -> Result<()> {
        // Handlers get weak references: they are stored in the client's own
        // registry, and a strong back-reference would keep every client
        // alive forever across reconnects.
        let weak_client = Arc::downgrade(&client);
        client.add_request_handler(Arc::new(HeartbeatHandler::new(weak_client.clone())));
        client.add_request_handler(Arc::new(PayloadHandler::new(
            weak_client.clone(),
            Arc::clone(&self.task_engine),
            &self.config.cluster,
            &self.identity.container_instance_arn,
            self.latest_seq_num.clone(),
        )));
        client.add_request_handler(Arc::new(RefreshCredentialsHandler::new(
            weak_client,
            Arc::clone(&self.credentials_manager),
            Arc::clone(&self.task_engine),
            &self.config.cluster,
            &self.identity.container_instance_arn,
        )));

        let heartbeat = Arc::new(ResettableTimer::new(
            self.config.heartbeat_timeout,
            self.config.heartbeat_jitter,
        ));
        let hook_timer = Arc::clone(&heartbeat);
        client.set_any_request_handler(Arc::new(move |_frame| hook_timer.reset()));

        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            connected = client.connect() => connected?,
            _ = cancelled(&mut cancel_rx) => return Ok(()),
        }
        // The endpoint pushes credentials on the first connect only; from
        // here on it sends them at its own cadence.
        self.send_credentials = false;
        heartbeat.reset();

        let serve_client = Arc::clone(&client);
        let mut serve_worker = tokio::spawn(async move { serve_client.serve().await });

        let age_limit = add_jitter(self.config.connection_time, self.config.connection_jitter);
        let age = tokio::time::sleep(age_limit);
        tokio::pin!(age);

        let mut cancel_rx = self.cancel_rx.clone();

        let result = tokio::select! {
            joined = &mut serve_worker => flatten_serve(joined),
            _ = heartbeat.expired() => {
                warn!(
                    timeout = ?self.config.heartbeat_timeout,
                    "No inbound traffic within heartbeat window, closing connection"
                );
                let _ = client.close().await;
                flatten_serve((&mut serve_worker).await)
            }
            _ = &mut age => {
                info!(limit = ?age_limit, "Connection reached maximum age, rotating");
                let _ = client.write_close_message().await;
                let _ = client.close().await;
                flatten_serve((&mut serve_worker).await)
            }
            _ = cancelled(&mut cancel_rx) => {
                info!("Session cancelled, closing connection");
                let _ = client.write_close_message().await;
                let _ = client.close().await;
                let _ = (&mut serve_worker).await;
                Ok(())
            }
        };
        // Idempotent; guarantees the transport is released before the next
        // attempt starts.
        let _ = client.close().await;
        result
    }

    fn publish_deregistration(&self, error: &SessionError) {
        let Some(stream) = &self.deregister_stream else {
            return;
        };
        stream.publish(InstanceEvent {
            container_instance_arn: self.identity.container_instance_arn.clone(),
            reason: error.to_string(),
        });
    }

    fn reconnect_delay(&mut self, inactive_instance: bool) -> Duration {
        if inactive_instance {
            self.config.inactive_instance_reconnect_delay
        } else {
            self.backoff.delay()
        }
    }

    /// Sleep for `delay`, or less if cancellation fires. Returns false when
    /// the session was cancelled during the wait.
    async fn wait_for(&self, delay: Duration) -> bool {
        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancelled(&mut cancel_rx) => false,
        }
    }
}

/// Resolve when the session is cancelled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn flatten_serve(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(error) => Err(SessionError::Transport(format!(
            "serve worker failed: {}",
            error
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Credentials, ManagedTask, TaskCredentials};
    use crate::protocol::{OutboundMessage, PayloadMessage};
    use crate::wsclient::{AnyFrameHook, MessageHandler};
    use std::sync::atomic::AtomicUsize;

    struct NullResolver;

    #[async_trait::async_trait]
    impl EndpointResolver for NullResolver {
        async fn resolve(&self, _arn: &str) -> Result<String> {
            Ok("http://endpoint.tld".to_string())
        }
    }

    struct NullEngine;

    #[async_trait::async_trait]
    impl TaskEngine for NullEngine {
        fn version(&self) -> Result<String> {
            Ok("Docker version result".to_string())
        }
        async fn deliver_payload(&self, _payload: PayloadMessage) -> Result<()> {
            Ok(())
        }
        fn task_by_arn(&self, _arn: &str) -> Option<Arc<dyn ManagedTask>> {
            None
        }
    }

    struct NullManager;

    impl CredentialsManager for NullManager {
        fn set_task_credentials(&self, _credentials: TaskCredentials) -> Result<()> {
            Ok(())
        }
    }

    struct NullProvider;

    impl CredentialsProvider for NullProvider {
        fn credentials(&self) -> Result<Credentials> {
            Ok(Credentials {
                access_key_id: "test-id".to_string(),
                secret_access_key: "test-secret".to_string(),
                session_token: "test-token".to_string(),
            })
        }
    }

    struct NullClient;

    #[async_trait::async_trait]
    impl ClientServer for NullClient {
        fn add_request_handler(&self, _handler: Arc<dyn MessageHandler>) {}
        fn set_any_request_handler(&self, _hook: AnyFrameHook) {}
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn serve(&self) -> Result<()> {
            Err(SessionError::EndOfStream)
        }
        async fn make_request(&self, _message: &OutboundMessage) -> Result<()> {
            Ok(())
        }
        async fn write_close_message(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullFactory;

    impl ClientFactory for NullFactory {
        fn new_client(
            &self,
            _url: &str,
            _credentials: Credentials,
            _config: &SessionConfig,
        ) -> Arc<dyn ClientServer> {
            Arc::new(NullClient)
        }
    }

    struct FixedBackoff {
        delay: Duration,
        delays: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    impl Backoff for FixedBackoff {
        fn delay(&mut self) -> Duration {
            self.delays.fetch_add(1, Ordering::SeqCst);
            self.delay
        }
        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_session(config: SessionConfig) -> Session {
        Session::new(
            config,
            AgentIdentity {
                container_instance_arn: "myArn".to_string(),
                agent_version: "1.0.0".to_string(),
                agent_hash: "deadbeef".to_string(),
            },
            Arc::new(NullResolver),
            Arc::new(NullFactory),
            Arc::new(NullProvider),
            Arc::new(NullEngine),
            Arc::new(NullManager),
        )
    }

    #[tokio::test]
    async fn test_reconnect_delay_for_inactive_instance() {
        let config = SessionConfig {
            inactive_instance_reconnect_delay: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        let mut session = test_session(config);
        assert_eq!(
            session.reconnect_delay(true),
            Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn test_reconnect_delay_for_active_instance_uses_backoff() {
        let delays = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let mut session = test_session(SessionConfig::default()).with_backoff(Box::new(
            FixedBackoff {
                delay: Duration::from_millis(5),
                delays: Arc::clone(&delays),
                resets: Arc::clone(&resets),
            },
        ));
        assert_eq!(session.reconnect_delay(false), Duration::from_millis(5));
        assert_eq!(delays.load(Ordering::SeqCst), 1);
        assert_eq!(resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_for_uninterrupted_returns_true() {
        let session = test_session(SessionConfig::default());
        assert!(session.wait_for(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_cancelled_returns_false() {
        let session = test_session(SessionConfig::default());
        session.cancel_handle().cancel();
        assert!(!session.wait_for(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_cancel_handle_observes_cancellation() {
        let session = test_session(SessionConfig::default());
        let handle = session.cancel_handle();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn test_build_url_defaults_seq_num_to_one() {
        let session = test_session(SessionConfig {
            cluster: "someCluster".to_string(),
            ..SessionConfig::default()
        });
        let url = session.build_url("http://endpoint.tld").unwrap();
        assert!(url.contains("seqNum=1"));
        assert!(url.contains("sendCredentials=true"));
    }

    #[tokio::test]
    async fn test_build_url_reads_live_sequence_counter() {
        let cursor = Arc::new(AtomicI64::new(42));
        let session = test_session(SessionConfig::default())
            .with_sequence_counter(Arc::clone(&cursor));
        let url = session.build_url("http://endpoint.tld").unwrap();
        assert!(url.contains("seqNum=42"));
    }
}
