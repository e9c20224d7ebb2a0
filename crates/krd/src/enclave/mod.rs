//! The enclave client: owns the channel and correlates requests with the
//! phone's responses.
//!
//! Local servers hand a [`Request`] to [`EnclaveClient::request`], which seals
//! it, queues it for the send worker and waits for the matching response. The
//! dispatcher task started by [`EnclaveClient::start`] feeds every inbound
//! envelope through [`EnclaveClient::handle_envelope`].
//!
//! Lock order: the channel lock is never held while taking the correlation
//! lock.

mod approval;
mod pending;

use std::sync::Arc;
use std::time::Duration;

use kr_core::config::TimeoutConfig;
use kr_core::protocol::{
    Fingerprint, MeRequest, MeResponse, PairingPayload, PairingStatus, Profile, Request,
    RequestBody, RequestKind, Response, ResponseBody, UnpairRequest, unix_now,
};
use kr_crypto::{Header, envelope};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{Channel, ChannelState, PairingStore};
use crate::error::DaemonError;
use crate::transport::{Outbound, QueuePair, SendResult, TransportError};

pub use approval::ApprovalWindow;
pub use pending::{PendingRequest, PendingTable, Waiter};

/// What an inbound envelope turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pairing completed with this envelope.
    Paired,
    /// A waiter received its response.
    Resolved,
    /// A waiter's deadline was extended.
    Acknowledged,
    /// Only channel metadata was carried.
    Metadata,
    /// The phone unpaired this workstation.
    Unpaired,
    /// Duplicate, late, or uncorrelated; nothing happened.
    Ignored,
}

/// Snapshot served on `GET /dashboard`.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub version: String,
    pub state: ChannelState,
    pub workstation_name: Option<String>,
    pub channel_id: Option<String>,
    pub outbound_queue: Option<String>,
    pub inbound_queue: Option<String>,
    pub pending_requests: usize,
    /// Age of the oldest pending request.
    pub oldest_pending_ms: Option<u64>,
    pub approvals: usize,
    pub profile_email: Option<String>,
    /// `authorized_keys` line for the phone's SSH key.
    pub authorized_key: Option<String>,
}

#[derive(Debug, Default)]
struct Correlation {
    pending: PendingTable,
    approvals: ApprovalWindow,
}

pub struct EnclaveClient {
    channel: RwLock<Option<Channel>>,
    correlation: Mutex<Correlation>,
    profile: RwLock<Option<Profile>>,
    store: PairingStore,
    outbound: mpsc::Sender<Outbound>,
    queues: watch::Sender<Option<QueuePair>>,
    timeouts: TimeoutConfig,
    version: semver::Version,
}

impl std::fmt::Debug for EnclaveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnclaveClient")
            .field("version", &self.version)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl EnclaveClient {
    /// Build a client around whatever pairing `store` holds.
    pub fn new(
        store: PairingStore,
        timeouts: TimeoutConfig,
        version: semver::Version,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let channel = store.load();
        let (queues, _) = watch::channel(channel.as_ref().map(Channel::queues));
        Self {
            channel: RwLock::new(channel),
            correlation: Mutex::new(Correlation::default()),
            profile: RwLock::new(None),
            store,
            outbound,
            queues,
            timeouts,
            version,
        }
    }

    /// Queue pair the receive poller should follow.
    pub fn subscribe_queues(&self) -> watch::Receiver<Option<QueuePair>> {
        self.queues.subscribe()
    }

    /// Spawn the dispatcher that feeds inbound envelopes through [`Self::handle_envelope`].
    pub fn start(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let half_paired = client
                .channel
                .read()
                .await
                .as_ref()
                .filter(|c| !c.is_paired())
                .map(Channel::channel_id);
            if let Some(channel_id) = half_paired {
                client.schedule_pairing_expiry(channel_id);
            }

            loop {
                tokio::select! {
                    next = inbound.recv() => {
                        let Some(envelope) = next else { return };
                        client.dispatch(&envelope).await;
                    }
                    _ = shutdown.changed() => {
                        debug!("Dispatcher shutting down");
                        return;
                    }
                }
            }
        })
    }

    async fn dispatch(self: &Arc<Self>, envelope: &[u8]) {
        match self.handle_envelope(envelope).await {
            Ok(Delivery::Paired) => self.spawn_profile_refresh(),
            Ok(delivery) => debug!(?delivery, "Envelope handled"),
            Err(e @ DaemonError::ProtocolViolation(_)) => {
                warn!(tag = e.tag(), error = %e, "Dropping response");
            }
            Err(e) => debug!(tag = e.tag(), error = %e, "Dropping envelope"),
        }
    }

    // --- Inbound ---

    /// Process one decoded envelope from the inbound queue.
    pub async fn handle_envelope(&self, envelope: &[u8]) -> Result<Delivery, DaemonError> {
        let (header, body) = envelope::split(envelope)?;
        match header {
            Header::WrappedKey => Err(DaemonError::MalformedEnvelope(
                "wrapped-key envelopes are not accepted".into(),
            )),
            Header::WrappedPublicKey => self.complete_pairing(body).await,
            Header::Ciphertext => {
                let response = {
                    let guard = self.channel.read().await;
                    let channel = guard.as_ref().ok_or(DaemonError::Unpaired)?;
                    channel.open_response(body)?
                };
                self.handle_response(response).await
            }
        }
    }

    async fn complete_pairing(&self, body: &[u8]) -> Result<Delivery, DaemonError> {
        let mut guard = self.channel.write().await;
        let channel = guard.as_mut().ok_or(DaemonError::Unpaired)?;
        if !channel.complete_pairing(body)? {
            debug!(channel_id = %channel.channel_id(), "Ignoring repeated pairing completion");
            return Ok(Delivery::Ignored);
        }
        if let Err(e) = self.store.save(channel) {
            warn!(error = %e, "Paired, but failed to persist pairing");
        }
        info!(channel_id = %channel.channel_id(), "Pairing complete");
        Ok(Delivery::Paired)
    }

    async fn handle_response(&self, response: Response) -> Result<Delivery, DaemonError> {
        if matches!(response.body, Some(ResponseBody::Unpair(_))) {
            info!("Phone ended the pairing");
            self.forget().await?;
            return Ok(Delivery::Unpaired);
        }

        self.apply_metadata(&response).await;

        let mut correlation = self.correlation.lock().await;
        let Some(body) = &response.body else {
            return Ok(Delivery::Metadata);
        };
        if response.is_ack() {
            return Ok(if correlation.pending.acknowledge(&response.request_id) {
                Delivery::Acknowledged
            } else {
                Delivery::Ignored
            });
        }

        let Some(expected) = correlation
            .pending
            .get(&response.request_id)
            .map(|p| p.kind)
        else {
            debug!(request_id = %response.request_id, "Dropping uncorrelated response");
            return Ok(Delivery::Ignored);
        };
        let answered = body.answers();
        if answered != Some(expected) {
            return Err(DaemonError::ProtocolViolation(format!(
                "{expected} request {} answered with {}",
                response.request_id,
                answered.map_or("nothing", RequestKind::as_str)
            )));
        }

        let Some(pending) = correlation.pending.take(&response.request_id) else {
            return Ok(Delivery::Ignored);
        };
        if let Some(fingerprint) = pending.fingerprint {
            if response.is_rejection() {
                correlation.approvals.revoke(&fingerprint);
            } else if let Some(until) = response.approved_until {
                correlation.approvals.grant(fingerprint, until, unix_now());
            }
        }
        drop(correlation);

        if let Some(ResponseBody::Me(me)) = &response.body {
            *self.profile.write().await = Some(me.me.clone());
        }

        let request_id = response.request_id.clone();
        if pending.resolve(response) {
            debug!(%request_id, "Response delivered");
            Ok(Delivery::Resolved)
        } else {
            debug!(%request_id, "Waiter already gone");
            Ok(Delivery::Ignored)
        }
    }

    async fn apply_metadata(&self, response: &Response) {
        if response.sns_endpoint_arn.is_none() && response.tracking_id.is_none() {
            return;
        }
        let mut guard = self.channel.write().await;
        let Some(channel) = guard.as_mut() else {
            return;
        };
        if channel.update_metadata(response) {
            if let Err(e) = self.store.save(channel) {
                warn!(error = %e, "Failed to persist channel metadata");
            }
        }
    }

    // --- Pairing ---

    /// Replace any current channel with a fresh half-paired one and return
    /// the QR payload.
    pub async fn pair(
        self: &Arc<Self>,
        name: Option<String>,
    ) -> Result<PairingPayload, DaemonError> {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(default_workstation_name);
        let fresh = Channel::create(name, self.version.clone());
        let payload = fresh.pairing_payload();
        let channel_id = fresh.channel_id();

        // Disk, memory and the poller's queue watch change together.
        {
            let mut guard = self.channel.write().await;
            self.store.save(&fresh)?;
            if let Some(old) = guard.as_ref().filter(|c| c.is_paired()) {
                self.notify_unpair(old);
            }
            self.queues.send_replace(Some(fresh.queues()));
            *guard = Some(fresh);
            self.reset_correlation().await;
        }
        *self.profile.write().await = None;

        info!(%channel_id, workstation_name = %payload.workstation_name, "Pairing started");
        self.schedule_pairing_expiry(channel_id);
        Ok(payload)
    }

    /// Tell the phone (when paired) and drop the channel.
    pub async fn unpair(&self) -> Result<(), DaemonError> {
        {
            let guard = self.channel.read().await;
            let channel = guard.as_ref().ok_or(DaemonError::Unpaired)?;
            if channel.is_paired() {
                self.notify_unpair(channel);
            }
        }
        self.forget().await
    }

    fn notify_unpair(&self, channel: &Channel) {
        let request = Request::new(RequestBody::Unpair(UnpairRequest {}));
        match channel.seal_request(&request) {
            Ok(envelope) => self.enqueue_unconfirmed(channel.queues().outbound, envelope),
            Err(e) => warn!(error = %e, "Failed to seal unpair notice"),
        }
    }

    fn enqueue_unconfirmed(&self, queue: String, envelope: Vec<u8>) {
        let outbound = Outbound {
            queue,
            envelope,
            result: None,
        };
        if let Err(e) = self.outbound.try_send(outbound) {
            warn!(error = %e, "Dropping fire-and-forget envelope");
        }
    }

    async fn forget(&self) -> Result<(), DaemonError> {
        self.forget_if(|_| true).await.map(|_| ())
    }

    /// Drop the current channel if `matches` accepts it. Returns whether it was dropped.
    async fn forget_if(
        &self,
        matches: impl FnOnce(Option<&Channel>) -> bool,
    ) -> Result<bool, DaemonError> {
        let previous = {
            let mut guard = self.channel.write().await;
            if !matches(guard.as_ref()) {
                return Ok(false);
            }
            self.store.delete()?;
            self.queues.send_replace(None);
            self.reset_correlation().await;
            guard.take()
        };
        *self.profile.write().await = None;
        if let Some(channel) = previous {
            info!(channel_id = %channel.channel_id(), "Unpaired");
        }
        Ok(true)
    }

    async fn reset_correlation(&self) {
        let mut correlation = self.correlation.lock().await;
        let cancelled = correlation.pending.clear();
        correlation.approvals.clear();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending requests");
        }
    }

    fn schedule_pairing_expiry(self: &Arc<Self>, channel_id: Uuid) {
        let client = Arc::downgrade(self);
        let after = self.timeouts.pair();
        tokio::spawn(async move {
            sleep(after).await;
            let Some(client) = client.upgrade() else {
                return;
            };
            let expired = client
                .forget_if(|c| c.is_some_and(|c| c.channel_id() == channel_id && !c.is_paired()))
                .await;
            match expired {
                Ok(true) => info!(%channel_id, "Pairing was not completed in time"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to discard expired pairing"),
            }
        });
    }

    fn spawn_profile_refresh(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let request = Request::new(RequestBody::Me(MeRequest::default()));
            let deadline = client.timeouts.pair();
            match client.round_trip(request, Some(deadline)).await {
                Ok(_) => debug!("Profile refreshed"),
                Err(e) => debug!(tag = e.tag(), error = %e, "Profile refresh failed"),
            }
        });
    }

    // --- Requests ---

    /// Forward `request` to the phone and wait for its answer.
    ///
    /// An empty `request_id` is replaced with a fresh UUID. `noop` is sent
    /// without waiting and answered with an empty response. `unpair` ends
    /// the pairing locally.
    pub async fn request(&self, mut request: Request) -> Result<Response, DaemonError> {
        if request.request_id.is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }
        request.validate()?;

        match request.body {
            RequestBody::NoOp => {
                self.send_noop(&request).await;
                Ok(Response {
                    body: None,
                    ..Response::new(request.request_id, ResponseBody::Ack(Default::default()))
                })
            }
            RequestBody::Unpair(_) => {
                self.unpair().await?;
                Ok(Response::new(
                    request.request_id,
                    ResponseBody::Unpair(Default::default()),
                ))
            }
            RequestBody::Me(MeRequest { pgp_user_id: None }) => {
                if let Some(me) = self.cached_profile().await {
                    return Ok(Response::new(
                        request.request_id,
                        ResponseBody::Me(MeResponse { me }),
                    ));
                }
                self.round_trip(request, None).await
            }
            _ => self.round_trip(request, None).await,
        }
    }

    /// Fire-and-forget noop. Does nothing unless paired.
    pub async fn send_noop(&self, request: &Request) {
        let guard = self.channel.read().await;
        let Some(channel) = guard.as_ref().filter(|c| c.is_paired()) else {
            return;
        };
        match channel.seal_request(request) {
            Ok(envelope) => self.enqueue_unconfirmed(channel.queues().outbound, envelope),
            Err(e) => warn!(error = %e, "Failed to seal noop"),
        }
    }

    /// The phone's profile; served from cache unless a PGP user id is given.
    pub async fn request_me(&self, pgp_user_id: Option<String>) -> Result<Profile, DaemonError> {
        let response = self
            .request(Request::new(RequestBody::Me(MeRequest { pgp_user_id })))
            .await?;
        match response.body {
            Some(ResponseBody::Me(me)) => Ok(me.me),
            _ => Err(DaemonError::ProtocolViolation(
                "me request answered without a profile".into(),
            )),
        }
    }

    const fn deadline_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Sign | RequestKind::GitSign => self.timeouts.sign(),
            RequestKind::Me
            | RequestKind::List
            | RequestKind::Hosts
            | RequestKind::Unpair
            | RequestKind::NoOp => self.timeouts.me(),
        }
    }

    async fn round_trip(
        &self,
        request: Request,
        deadline: Option<Duration>,
    ) -> Result<Response, DaemonError> {
        let kind = request.kind();
        let fingerprint = request.fingerprint();

        let (queue, envelope) = {
            let guard = self.channel.read().await;
            let channel = guard.as_ref().ok_or(DaemonError::Unpaired)?;
            (channel.queues().outbound, channel.seal_request(&request)?)
        };

        let (waiter, approved) = {
            let mut correlation = self.correlation.lock().await;
            let waiter = correlation
                .pending
                .insert(&request.request_id, kind, fingerprint)?;
            let now = unix_now();
            let approved =
                fingerprint.is_some_and(|fp| correlation.approvals.is_approved(&fp, now));
            (waiter, approved)
        };

        let deadline = if approved {
            self.timeouts.approved()
        } else {
            deadline.unwrap_or_else(|| self.deadline_for(kind))
        };
        let evict = fingerprint.filter(|_| approved);

        let (result_tx, result_rx) = oneshot::channel();
        let outbound = Outbound {
            queue,
            envelope,
            result: Some(result_tx),
        };
        if self.outbound.send(outbound).await.is_err() {
            self.abandon(&request.request_id, evict).await;
            return Err(DaemonError::RelayFatal("send worker stopped".into()));
        }
        debug!(request_id = %request.request_id, %kind, approved, deadline_ms = deadline.as_millis(), "Request sent");

        match self.await_response(waiter, result_rx, deadline).await {
            Ok(response) if response.is_rejection() => {
                info!(request_id = %request.request_id, %kind, "Request rejected on phone");
                Err(DaemonError::Rejected)
            }
            Ok(response) => Ok(response),
            Err(e) => {
                self.abandon(&request.request_id, evict).await;
                debug!(request_id = %request.request_id, tag = e.tag(), "Request failed");
                Err(e)
            }
        }
    }

    async fn await_response(
        &self,
        waiter: Waiter,
        sent: oneshot::Receiver<SendResult>,
        deadline: Duration,
    ) -> Result<Response, DaemonError> {
        let Waiter { mut response, ack } = waiter;
        let mut ack = Some(ack);
        let mut sent = Some(sent);
        let timer = sleep(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                r = &mut response => return r.map_err(|_| DaemonError::Unpaired),
                Some(()) = recv_once(&mut ack) => {
                    timer.as_mut().reset(Instant::now() + self.timeouts.ack_delay());
                    debug!("Phone acknowledged request");
                }
                Some(result) = recv_once(&mut sent) => {
                    if let Err(TransportError::Fatal(msg)) = result {
                        return Err(DaemonError::RelayFatal(msg));
                    }
                }
                () = &mut timer => return Err(DaemonError::Timeout),
            }
        }
    }

    async fn abandon(&self, request_id: &str, evict: Option<Fingerprint>) {
        let mut correlation = self.correlation.lock().await;
        correlation.pending.take(request_id);
        if let Some(fingerprint) = evict {
            correlation.approvals.revoke(&fingerprint);
        }
    }

    // --- Status ---

    pub async fn state(&self) -> ChannelState {
        self.channel
            .read()
            .await
            .as_ref()
            .map_or(ChannelState::Unpaired, Channel::state)
    }

    /// `GET /pair`: paired channel details, never waiting on the phone.
    pub async fn pairing_status(&self) -> Result<PairingStatus, DaemonError> {
        let mut status = {
            let guard = self.channel.read().await;
            let channel = guard.as_ref().ok_or(DaemonError::Unpaired)?;
            if !channel.is_paired() {
                return Err(DaemonError::WaitingForKey);
            }
            channel.pairing_status()
        };
        status.profile = self.profile.read().await.clone();
        Ok(status)
    }

    pub async fn cached_profile(&self) -> Option<Profile> {
        self.profile.read().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.correlation.lock().await.pending.len()
    }

    pub async fn dashboard(&self) -> Dashboard {
        let mut dashboard = {
            let guard = self.channel.read().await;
            let channel = guard.as_ref();
            let queues = channel.map(Channel::queues);
            Dashboard {
                version: self.version.to_string(),
                state: channel.map_or(ChannelState::Unpaired, Channel::state),
                workstation_name: channel.map(|c| c.workstation_name().to_string()),
                channel_id: channel.map(|c| c.channel_id().to_string()),
                outbound_queue: queues.as_ref().map(|q| q.outbound.clone()),
                inbound_queue: queues.map(|q| q.inbound),
                pending_requests: 0,
                oldest_pending_ms: None,
                approvals: 0,
                profile_email: None,
                authorized_key: None,
            }
        };
        {
            let correlation = self.correlation.lock().await;
            dashboard.pending_requests = correlation.pending.len();
            dashboard.oldest_pending_ms = correlation
                .pending
                .oldest_age()
                .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX));
            dashboard.approvals = correlation.approvals.live_count(unix_now());
        }
        if let Some(profile) = self.profile.read().await.as_ref() {
            dashboard.profile_email = Some(profile.email.clone());
            dashboard.authorized_key = profile.authorized_key();
        }
        dashboard
    }

    /// Write the current channel to disk.
    pub async fn flush(&self) -> Result<(), DaemonError> {
        match self.channel.read().await.as_ref() {
            Some(channel) => self.store.save(channel),
            None => Ok(()),
        }
    }
}

async fn recv_once<T>(slot: &mut Option<oneshot::Receiver<T>>) -> Option<T> {
    let Some(rx) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let value = rx.await.ok();
    *slot = None;
    value
}

/// `user@host`, falling back to whichever half is known.
pub fn default_workstation_name() -> String {
    let user = std::env::var("USER").ok().filter(|u| !u.is_empty());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty());
    match (user, host) {
        (Some(user), Some(host)) => format!("{user}@{host}"),
        (Some(name), None) | (None, Some(name)) => name,
        (None, None) => "workstation".to_string(),
    }
}
