//! REST-backed sync runtime.
//!
//! Wires the core merge/poller/unread logic to the app's REST API and
//! the host platform services. Consumers drive the runtime through
//! `ChatCommand`s and observe it through `ChatEvent`s; nothing in here
//! depends on a UI framework.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sync_core::{
    AppLifecycle, ChatCommand, ChatEvent, EventDetail, Message, MessageLog, MessageType,
    PollDirective, PollPolicy, PollerStateMachine, Room, SendOutcome, StopReason, SyncChannelError,
    SyncChannels, SyncError, SyncErrorCategory, SyncTuning, TickOutcome, UnreadIndex,
    classify_http_status, normalize_fatal_error, normalize_send_outcome, reads_on_arrival,
    should_notify, unread_in_window,
};
use sync_platform::{KvStore, KvStoreError, Notifier, ScopedKvStore};
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const KV_SCOPE: &str = "app.tripchat.sync";
const WATERMARK_KEY_PREFIX: &str = "read-watermark";
const UNREAD_TOTAL_KEY: &str = "unread-total";
const NOTIFICATION_TITLE: &str = "New message";

const DEFAULT_POLL_BASE_MS: u64 = 3_000;
const DEFAULT_POLL_STEP_MS: u64 = 1_000;
const DEFAULT_POLL_MAX_MS: u64 = 10_000;
const DEFAULT_POLL_IDLE_AFTER_MS: u64 = 30_000;
const DEFAULT_POLL_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_UNREAD_SWEEP_INTERVAL_MS: u64 = 15_000;
const DEFAULT_UNREAD_WINDOW: u16 = 50;
const DEFAULT_PAGE_SIZE: u16 = 50;
const DEFAULT_LOG_MAX_ITEMS: usize = 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const SERVER_PAGE_LIMIT_CAP: u16 = 100;

/// Fully resolved engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub poll_base_ms: u64,
    pub poll_step_ms: u64,
    pub poll_max_ms: u64,
    pub poll_idle_after_ms: u64,
    pub poll_failure_threshold: u32,
    pub unread_sweep_interval_ms: u64,
    pub unread_window: u16,
    pub page_size: u16,
    pub log_max_items: usize,
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_base_ms: DEFAULT_POLL_BASE_MS,
            poll_step_ms: DEFAULT_POLL_STEP_MS,
            poll_max_ms: DEFAULT_POLL_MAX_MS,
            poll_idle_after_ms: DEFAULT_POLL_IDLE_AFTER_MS,
            poll_failure_threshold: DEFAULT_POLL_FAILURE_THRESHOLD,
            unread_sweep_interval_ms: DEFAULT_UNREAD_SWEEP_INTERVAL_MS,
            unread_window: DEFAULT_UNREAD_WINDOW,
            page_size: DEFAULT_PAGE_SIZE,
            log_max_items: DEFAULT_LOG_MAX_ITEMS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Merge `Init` tuning overrides over engine defaults.
    pub fn resolve(tuning: Option<SyncTuning>) -> Self {
        let tuning = tuning.unwrap_or_default();
        let defaults = Self::default();
        Self {
            poll_base_ms: tuning.poll_base_ms.unwrap_or(defaults.poll_base_ms),
            poll_step_ms: tuning.poll_step_ms.unwrap_or(defaults.poll_step_ms),
            poll_max_ms: tuning.poll_max_ms.unwrap_or(defaults.poll_max_ms),
            poll_idle_after_ms: tuning
                .poll_idle_after_ms
                .unwrap_or(defaults.poll_idle_after_ms),
            poll_failure_threshold: tuning
                .poll_failure_threshold
                .unwrap_or(defaults.poll_failure_threshold),
            unread_sweep_interval_ms: tuning
                .unread_sweep_interval_ms
                .unwrap_or(defaults.unread_sweep_interval_ms),
            unread_window: tuning.unread_window.unwrap_or(defaults.unread_window),
            page_size: tuning.page_size.unwrap_or(defaults.page_size),
            log_max_items: tuning.log_max_items.unwrap_or(defaults.log_max_items),
            request_timeout_ms: tuning
                .request_timeout_ms
                .unwrap_or(defaults.request_timeout_ms),
        }
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.poll_base_ms,
            self.poll_step_ms,
            self.poll_max_ms,
            self.poll_idle_after_ms,
        )
    }

    /// Clamp a page limit against safety and server caps; always `1..=100`.
    pub fn bounded_page_size(&self) -> u16 {
        self.page_size.max(1).min(SERVER_PAGE_LIMIT_CAP)
    }

    fn bounded_unread_window(&self) -> u16 {
        self.unread_window.max(1).min(SERVER_PAGE_LIMIT_CAP)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RoomsResponse {
    #[serde(default)]
    rooms: Vec<Room>,
}

/// Malformed or empty bodies decode as "no messages" rather than erroring.
#[derive(Debug, Clone, Deserialize, Default)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    body: &'a str,
    message_type: MessageType,
}

/// Thin bearer-authenticated client for the app's REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: String,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        auth_token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Config,
                "invalid_base_url",
                format!("invalid base URL '{base_url}': {err}"),
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Config,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            http,
            base_url,
            auth_token: auth_token.into(),
        })
    }

    /// `GET /rooms`
    pub async fn list_rooms(&self) -> Result<Vec<Room>, SyncError> {
        let url = self.endpoint(&["rooms"])?;
        let response: RoomsResponse = self.get_json(url).await?;
        Ok(response.rooms)
    }

    /// `GET /rooms/{id}/messages?page&limit` — newest-first page.
    pub async fn messages(
        &self,
        room_id: &str,
        page: u32,
        limit: u16,
    ) -> Result<Vec<Message>, SyncError> {
        let mut url = self.endpoint(&["rooms", room_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        let response: MessagesResponse = self.get_json(url).await?;
        Ok(response.messages)
    }

    /// `POST /rooms/{id}/messages` — returns the created message.
    pub async fn send_message(
        &self,
        room_id: &str,
        body: &str,
        message_type: MessageType,
    ) -> Result<Message, SyncError> {
        let url = self.endpoint(&["rooms", room_id, "messages"])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.auth_token)
            .json(&SendMessageRequest { body, message_type })
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode(response).await
    }

    /// `GET /events/{id}`
    pub async fn event_detail(&self, event_id: &str) -> Result<EventDetail, SyncError> {
        let url = self.endpoint(&["events", event_id])?;
        self.get_json(url).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SyncError::new(
                    SyncErrorCategory::Config,
                    "invalid_base_url",
                    "base URL cannot be a base for API paths",
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::new(
                classify_http_status(status.as_u16()),
                "api_http_error",
                format!("API returned {status}"),
            ));
        }

        response.json::<T>().await.map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Serialization,
                "api_decode_error",
                err.to_string(),
            )
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> SyncError {
    match err.status() {
        Some(status) => SyncError::new(
            classify_http_status(status.as_u16()),
            "api_http_error",
            err.to_string(),
        ),
        None => SyncError::new(
            SyncErrorCategory::Network,
            "api_transport_error",
            err.to_string(),
        ),
    }
}

fn watermark_key(room_id: &str) -> String {
    format!("{WATERMARK_KEY_PREFIX}:{room_id}")
}

fn map_store_error(operation: &str, err: KvStoreError) -> SyncError {
    match err {
        KvStoreError::NotFound => SyncError::new(
            SyncErrorCategory::Config,
            "store_key_not_found",
            format!("key missing during {operation}"),
        ),
        KvStoreError::Unavailable(message) => SyncError::new(
            SyncErrorCategory::Storage,
            "store_unavailable",
            format!("key-value store unavailable during {operation}: {message}"),
        ),
        KvStoreError::Backend(message) => SyncError::new(
            SyncErrorCategory::Storage,
            "store_error",
            format!("key-value store backend error during {operation}: {message}"),
        ),
    }
}

/// Cloneable handle to a spawned sync runtime.
#[derive(Clone, Debug)]
pub struct SyncRuntimeHandle {
    channels: SyncChannels,
}

impl SyncRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), SyncChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> sync_core::EventStream {
        self.channels.subscribe()
    }
}

/// Spawn the runtime on the current tokio runtime and return its handle.
pub fn spawn_runtime(store: Arc<dyn KvStore>, notifier: Arc<dyn Notifier>) -> SyncRuntimeHandle {
    let (channels, command_rx) = SyncChannels::new(128, 512);
    let runtime = SyncRuntime::new(channels.clone(), command_rx, store, notifier);
    tokio::spawn(async move {
        runtime.run().await;
    });

    SyncRuntimeHandle { channels }
}

#[derive(Debug)]
struct RunningTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningTask {
    async fn cancel(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

#[derive(Clone)]
struct Session {
    client: Arc<RestClient>,
    viewer_id: String,
    config: EngineConfig,
}

struct OpenRoom {
    room_id: String,
    log: Arc<Mutex<MessageLog>>,
    poller: RunningTask,
}

struct SyncRuntime {
    channels: SyncChannels,
    command_rx: mpsc::Receiver<ChatCommand>,
    store: ScopedKvStore<Arc<dyn KvStore>>,
    notifier: Arc<dyn Notifier>,
    session: Option<Session>,
    rooms: Vec<Room>,
    unread: UnreadIndex,
    open_room: Option<OpenRoom>,
    sweeper: Option<RunningTask>,
    lifecycle_tx: watch::Sender<AppLifecycle>,
    epoch: Instant,
}

impl SyncRuntime {
    fn new(
        channels: SyncChannels,
        command_rx: mpsc::Receiver<ChatCommand>,
        store: Arc<dyn KvStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (lifecycle_tx, _) = watch::channel(AppLifecycle::Active);
        Self {
            channels,
            command_rx,
            store: ScopedKvStore::new(store, KV_SCOPE),
            notifier,
            session: None,
            rooms: Vec::new(),
            unread: UnreadIndex::new(),
            open_room: None,
            sweeper: None,
            lifecycle_tx,
            epoch: Instant::now(),
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.command_rx.recv().await {
            if let Err(err) = self.handle_command(command).await {
                let recoverable = matches!(
                    err.category,
                    SyncErrorCategory::Network | SyncErrorCategory::RateLimited
                );
                self.channels.emit(normalize_fatal_error(err, recoverable));
            }
        }

        // Handle dropped; tear down background tasks before exiting.
        self.detach_room().await;
        self.stop_sweeper().await;
    }

    async fn handle_command(&mut self, command: ChatCommand) -> Result<(), SyncError> {
        match command {
            ChatCommand::Init {
                base_url,
                auth_token,
                viewer_id,
                config,
            } => self.handle_init(base_url, auth_token, viewer_id, config).await,
            ChatCommand::RefreshRooms => self.handle_refresh_rooms().await,
            ChatCommand::OpenRoom { room_id } => self.handle_open_room(room_id).await,
            ChatCommand::CloseRoom => {
                self.detach_room().await;
                Ok(())
            }
            ChatCommand::MarkRead { room_id } => self.handle_mark_read(room_id).await,
            ChatCommand::RefreshUnread => self.handle_refresh_unread().await,
            ChatCommand::SendMessage {
                room_id,
                client_txn_id,
                body,
                message_type,
            } => {
                self.handle_send_message(room_id, client_txn_id, body, message_type)
                    .await;
                Ok(())
            }
            ChatCommand::FetchEventDetail { event_id } => {
                self.handle_fetch_event_detail(event_id).await
            }
            ChatCommand::AppStateChanged { state } => self.handle_app_state(state).await,
        }
    }

    async fn handle_init(
        &mut self,
        base_url: String,
        auth_token: String,
        viewer_id: String,
        tuning: Option<SyncTuning>,
    ) -> Result<(), SyncError> {
        let config = EngineConfig::resolve(tuning);
        let client = Arc::new(RestClient::new(
            &base_url,
            auth_token,
            Duration::from_millis(config.request_timeout_ms),
        )?);

        // Re-init replaces any previous session and its background tasks.
        self.detach_room().await;
        self.stop_sweeper().await;
        self.rooms.clear();
        self.unread = UnreadIndex::new();

        self.session = Some(Session {
            client,
            viewer_id: viewer_id.clone(),
            config,
        });
        self.start_sweeper(config.unread_sweep_interval_ms);
        self.channels.emit(ChatEvent::Ready { viewer_id });
        Ok(())
    }

    async fn handle_refresh_rooms(&mut self) -> Result<(), SyncError> {
        let session = self.require_session()?.clone();
        let rooms = session.client.list_rooms().await?;

        self.rooms = rooms.clone();
        let live: HashSet<String> = rooms.iter().map(|room| room.id.clone()).collect();
        if self.unread.retain_rooms(&live) {
            self.publish_unread();
        }

        self.channels.emit(ChatEvent::RoomListUpdated { rooms });
        Ok(())
    }

    async fn handle_open_room(&mut self, room_id: String) -> Result<(), SyncError> {
        let session = self.require_session()?.clone();

        // Exactly one poller per mounted view: a previous room (or a
        // duplicate open of the same room) is detached first.
        self.detach_room().await;

        let page = session
            .client
            .messages(&room_id, 1, session.config.bounded_page_size())
            .await
            .map_err(|err| SyncError {
                code: "initial_load_failed".to_owned(),
                ..err
            })?;

        let mut log = MessageLog::new(session.config.log_max_items);
        log.load_initial(page);
        self.channels.emit(ChatEvent::RoomSnapshot {
            room_id: room_id.clone(),
            messages: log.messages().to_vec(),
        });

        // Opening a room acknowledges everything fetched so far.
        if let Some(latest) = log.latest_id().map(ToOwned::to_owned) {
            self.store_watermark(&room_id, &latest)?;
        }
        self.unread.clear_room(&room_id);
        self.publish_unread();

        let log = Arc::new(Mutex::new(log));
        let poller = self.spawn_room_poller(&session, room_id.clone(), Arc::clone(&log));
        self.open_room = Some(OpenRoom {
            room_id,
            log,
            poller,
        });
        Ok(())
    }

    async fn handle_mark_read(&mut self, room_id: String) -> Result<(), SyncError> {
        let session = self.require_session()?.clone();

        let latest = if let Some(open) = &self.open_room
            && open.room_id == room_id
        {
            open.log.lock().await.latest_id().map(ToOwned::to_owned)
        } else {
            session
                .client
                .messages(&room_id, 1, 1)
                .await?
                .first()
                .map(|msg| msg.id.clone())
        };

        if let Some(latest) = latest {
            self.store_watermark(&room_id, &latest)?;
        }
        self.unread.clear_room(&room_id);
        self.publish_unread();
        Ok(())
    }

    /// One full unread pass across all known rooms.
    ///
    /// Fetches run concurrently, one bounded window per room; a room
    /// whose fetch fails keeps its previous count instead of corrupting
    /// the batch.
    async fn handle_refresh_unread(&mut self) -> Result<(), SyncError> {
        let session = self.require_session()?.clone();
        if self.rooms.is_empty() {
            self.rooms = session.client.list_rooms().await?;
        }

        let window = session.config.bounded_unread_window();
        let targets: Vec<(String, Option<String>)> = self
            .rooms
            .iter()
            .map(|room| (room.id.clone(), self.load_watermark(&room.id)))
            .collect();

        let fetches = targets.into_iter().map(|(room_id, watermark)| {
            let client = Arc::clone(&session.client);
            let viewer_id = session.viewer_id.clone();
            async move {
                match client.messages(&room_id, 1, window).await {
                    Ok(page) => {
                        let count = unread_in_window(&page, watermark.as_deref(), &viewer_id);
                        (room_id, Some(count))
                    }
                    Err(err) => {
                        warn!(room_id = %room_id, error = %err, "unread sweep fetch failed");
                        (room_id, None)
                    }
                }
            }
        });

        if self.unread.apply_sweep(join_all(fetches).await) {
            self.publish_unread();
        }
        Ok(())
    }

    async fn handle_send_message(
        &mut self,
        room_id: String,
        client_txn_id: String,
        body: String,
        message_type: MessageType,
    ) {
        let session = match self.require_session() {
            Ok(session) => session.clone(),
            Err(err) => {
                self.channels.emit(normalize_send_outcome(
                    client_txn_id,
                    SendOutcome::Failure { error: err },
                ));
                return;
            }
        };

        let outcome = match session
            .client
            .send_message(&room_id, &body, message_type)
            .await
        {
            Ok(message) => {
                self.reflect_own_message(&room_id, &message).await;
                SendOutcome::Success {
                    message_id: message.id,
                }
            }
            Err(error) => SendOutcome::Failure { error },
        };

        self.channels
            .emit(normalize_send_outcome(client_txn_id, outcome));
    }

    /// Show the freshly sent message in the open room without waiting
    /// for the next poll tick, and treat it as read.
    async fn reflect_own_message(&self, room_id: &str, message: &Message) {
        let Some(open) = &self.open_room else {
            return;
        };
        if open.room_id != room_id {
            return;
        }

        let report = open.log.lock().await.merge_page(&[message.clone()]);
        if report.is_empty() {
            return;
        }
        if let Err(err) = self.store_watermark(room_id, &message.id) {
            warn!(room_id = %room_id, error = %err, "failed to advance watermark after send");
        }
        self.channels.emit(ChatEvent::RoomDelta {
            room_id: room_id.to_owned(),
            appended: report.appended,
            updated: report.updated,
        });
    }

    async fn handle_fetch_event_detail(&mut self, event_id: String) -> Result<(), SyncError> {
        let session = self.require_session()?.clone();
        let event = session.client.event_detail(&event_id).await?;
        self.channels.emit(ChatEvent::EventDetailLoaded { event });
        Ok(())
    }

    async fn handle_app_state(&mut self, state: AppLifecycle) -> Result<(), SyncError> {
        let previous = *self.lifecycle_tx.borrow();
        if previous == state {
            return Ok(());
        }

        self.lifecycle_tx.send_replace(state);
        debug!(?previous, ?state, "app lifecycle transition");

        // Coming back to the foreground catches up immediately instead
        // of waiting for the next sweep tick.
        if !previous.is_foreground() && state.is_foreground() && self.session.is_some() {
            self.handle_refresh_unread().await?;
        }
        Ok(())
    }

    fn spawn_room_poller(
        &self,
        session: &Session,
        room_id: String,
        log: Arc<Mutex<MessageLog>>,
    ) -> RunningTask {
        let stop = CancellationToken::new();
        let poller = RoomPoller {
            client: Arc::clone(&session.client),
            room_id,
            viewer_id: session.viewer_id.clone(),
            config: session.config,
            log,
            store: self.store.clone(),
            notifier: Arc::clone(&self.notifier),
            events: self.channels.event_sender(),
            lifecycle: self.lifecycle_tx.subscribe(),
            stop: stop.child_token(),
            epoch: self.epoch,
        };
        let task = tokio::spawn(poller.run());
        RunningTask { stop, task }
    }

    fn start_sweeper(&mut self, interval_ms: u64) {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let commands = self.channels.command_sender();
        let lifecycle = self.lifecycle_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms.max(1))) => {}
                }
                // Suspension is checked at tick time, not scheduling time.
                if !lifecycle.borrow().is_foreground() {
                    continue;
                }
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    result = commands.send(ChatCommand::RefreshUnread) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.sweeper = Some(RunningTask { stop, task });
    }

    async fn detach_room(&mut self) {
        if let Some(open) = self.open_room.take() {
            open.poller.cancel().await;
        }
    }

    async fn stop_sweeper(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.cancel().await;
        }
    }

    fn require_session(&self) -> Result<&Session, SyncError> {
        self.session.as_ref().ok_or_else(|| {
            SyncError::new(
                SyncErrorCategory::Config,
                "engine_not_initialized",
                "engine is not initialized; send Init first",
            )
        })
    }

    fn load_watermark(&self, room_id: &str) -> Option<String> {
        match self.store.get(&watermark_key(room_id)) {
            Ok(value) => Some(value),
            Err(KvStoreError::NotFound) => None,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "failed to load read watermark");
                None
            }
        }
    }

    fn store_watermark(&self, room_id: &str, message_id: &str) -> Result<(), SyncError> {
        self.store
            .set(&watermark_key(room_id), message_id)
            .map_err(|err| map_store_error("set_watermark", err))
    }

    /// Persist the badge total and fan the new counts out.
    fn publish_unread(&mut self) {
        let total = self.unread.total();
        if let Err(err) = self.store.set(UNREAD_TOTAL_KEY, &total.to_string()) {
            warn!(error = %err, "failed to persist unread total");
        }
        if let Err(err) = self.notifier.set_badge(total) {
            warn!(error = %err, "failed to set badge count");
        }
        self.channels.emit(ChatEvent::UnreadChanged {
            counts: self.unread.counts().clone(),
            total,
        });
    }
}

/// Per-room poll task: one timer chain driven by the core state machine.
struct RoomPoller {
    client: Arc<RestClient>,
    room_id: String,
    viewer_id: String,
    config: EngineConfig,
    log: Arc<Mutex<MessageLog>>,
    store: ScopedKvStore<Arc<dyn KvStore>>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<ChatEvent>,
    lifecycle: watch::Receiver<AppLifecycle>,
    stop: CancellationToken,
    epoch: Instant,
}

impl RoomPoller {
    async fn run(self) {
        let mut machine = PollerStateMachine::new(
            self.config.poll_policy(),
            self.config.poll_failure_threshold,
        );
        if machine.start(self.now_ms()).is_err() {
            return;
        }
        self.emit_status(&machine);

        loop {
            let sleep_ms = machine.interval_ms();
            tokio::select! {
                _ = self.stop.cancelled() => {
                    machine.stop();
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            }

            if machine.begin_tick().is_err() {
                break;
            }
            let outcome = self.tick().await;
            match machine.finish_tick(outcome, self.now_ms()) {
                Ok(PollDirective::Sleep { .. }) => self.emit_status(&machine),
                Ok(PollDirective::Stop { reason }) => {
                    if reason == StopReason::AuthExpired {
                        self.emit(ChatEvent::SessionExpired);
                    }
                    break;
                }
                Err(err) => {
                    warn!(room_id = %self.room_id, error = %err, "poller invariant break");
                    break;
                }
            }
        }

        self.emit_status(&machine);
    }

    async fn tick(&self) -> TickOutcome {
        // Backgrounded apps skip the fetch entirely; the streak and the
        // interval stay untouched.
        if !self.lifecycle.borrow().is_foreground() {
            return TickOutcome::Skipped;
        }

        let page = match self
            .client
            .messages(&self.room_id, 1, self.config.bounded_page_size())
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "poll fetch failed");
                return TickOutcome::Failed {
                    auth: err.is_auth(),
                };
            }
        };

        // Stale response: the view was detached while the fetch was in
        // flight; drop the page instead of mutating torn-down state.
        if self.stop.is_cancelled() {
            return TickOutcome::Skipped;
        }

        let report = self.log.lock().await.merge_page(&page);
        if report.is_empty() {
            return TickOutcome::NoChange;
        }

        // The app may have left the foreground while the fetch ran;
        // gate read-on-arrival and notifications on the state now.
        let lifecycle = *self.lifecycle.borrow();
        if reads_on_arrival(lifecycle)
            && let Some(latest) = report.appended.last()
            && let Err(err) = self.store.set(&watermark_key(&self.room_id), &latest.id)
        {
            warn!(room_id = %self.room_id, error = %err, "failed to advance watermark on arrival");
        }

        for message in &report.appended {
            if should_notify(lifecycle, &message.sender_id, &self.viewer_id)
                && let Err(err) =
                    self.notifier
                        .notify(NOTIFICATION_TITLE, &message.body, &self.room_id)
            {
                warn!(room_id = %self.room_id, error = %err, "failed to show notification");
            }
        }

        self.emit(ChatEvent::RoomDelta {
            room_id: self.room_id.clone(),
            appended: report.appended,
            updated: report.updated,
        });
        TickOutcome::NewMessages
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, machine: &PollerStateMachine) {
        self.emit(ChatEvent::PollerStatus {
            room_id: self.room_id.clone(),
            state: machine.state(),
            interval_ms: machine.interval_ms(),
            stop_reason: machine.stop_reason(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sync_core::SendAck;
    use sync_platform::{InMemoryKvStore, NoopNotifier};
    use tokio::time::timeout;

    use super::*;

    fn spawn_test_runtime() -> SyncRuntimeHandle {
        spawn_runtime(
            Arc::new(InMemoryKvStore::default()),
            Arc::new(NoopNotifier),
        )
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = RestClient::new("not a url", "token", Duration::from_secs(15))
            .expect_err("invalid base URL must fail");
        assert_eq!(err.code, "invalid_base_url");
    }

    #[test]
    fn watermark_keys_are_stable() {
        assert_eq!(watermark_key("room-1"), "read-watermark:room-1");
    }

    #[test]
    fn config_defaults_mirror_the_original_client() {
        let config = EngineConfig::resolve(None);
        assert_eq!(config.poll_base_ms, 3_000);
        assert_eq!(config.poll_max_ms, 10_000);
        assert_eq!(config.poll_idle_after_ms, 30_000);
        assert_eq!(config.poll_failure_threshold, 5);
        assert_eq!(config.unread_window, 50);
        assert_eq!(config.request_timeout_ms, 15_000);
    }

    #[test]
    fn config_overrides_apply_over_defaults() {
        let config = EngineConfig::resolve(Some(SyncTuning {
            poll_base_ms: Some(1_000),
            unread_window: Some(20),
            ..SyncTuning::default()
        }));
        assert_eq!(config.poll_base_ms, 1_000);
        assert_eq!(config.unread_window, 20);
        assert_eq!(config.poll_max_ms, 10_000);
    }

    #[test]
    fn page_limits_are_bounded_for_safety() {
        let floor = EngineConfig {
            page_size: 0,
            unread_window: 0,
            ..EngineConfig::default()
        };
        assert_eq!(floor.bounded_page_size(), 1);
        assert_eq!(floor.bounded_unread_window(), 1);

        let ceiling = EngineConfig {
            page_size: 500,
            unread_window: 500,
            ..EngineConfig::default()
        };
        assert_eq!(ceiling.bounded_page_size(), 100);
        assert_eq!(ceiling.bounded_unread_window(), 100);
    }

    #[test]
    fn empty_message_body_decodes_as_no_messages() {
        let response: MessagesResponse =
            serde_json::from_str("{}").expect("empty object should decode");
        assert!(response.messages.is_empty());
    }

    #[tokio::test]
    async fn runtime_emits_fatal_error_before_init() {
        let handle = spawn_test_runtime();
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::OpenRoom {
                room_id: "room-1".into(),
            })
            .await
            .expect("command should enqueue");

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");

        match event {
            ChatEvent::FatalError { code, .. } => {
                assert_eq!(code, "engine_not_initialized");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_before_init_emits_send_ack_failure() {
        let handle = spawn_test_runtime();
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::SendMessage {
                room_id: "room-1".into(),
                client_txn_id: "tx-1".into(),
                body: "hello".into(),
                message_type: MessageType::Text,
            })
            .await
            .expect("command should enqueue");

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");

        match event {
            ChatEvent::SendAck(SendAck {
                client_txn_id,
                message_id,
                error_code,
            }) => {
                assert_eq!(client_txn_id, "tx-1");
                assert_eq!(message_id, None);
                assert_eq!(error_code.as_deref(), Some("engine_not_initialized"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_room_without_open_room_is_a_silent_no_op() {
        let handle = spawn_test_runtime();
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::CloseRoom)
            .await
            .expect("close should enqueue");
        handle
            .send(ChatCommand::CloseRoom)
            .await
            .expect("second close should enqueue");
        handle
            .send(ChatCommand::RefreshRooms)
            .await
            .expect("refresh should enqueue");

        // The first event observed is the refresh failure, proving both
        // closes produced neither an event nor an error.
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");
        match event {
            ChatEvent::FatalError { code, .. } => assert_eq!(code, "engine_not_initialized"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn init_with_invalid_url_reports_config_error() {
        let handle = spawn_test_runtime();
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::Init {
                base_url: "not a url".into(),
                auth_token: "token".into(),
                viewer_id: "user-me".into(),
                config: None,
            })
            .await
            .expect("command should enqueue");

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");

        match event {
            ChatEvent::FatalError {
                code, recoverable, ..
            } => {
                assert_eq!(code, "invalid_base_url");
                assert!(!recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn init_emits_ready_and_lifecycle_noise_is_tolerated() {
        let handle = spawn_test_runtime();
        let mut events = handle.subscribe();

        handle
            .send(ChatCommand::AppStateChanged {
                state: AppLifecycle::Background,
            })
            .await
            .expect("lifecycle should enqueue");
        handle
            .send(ChatCommand::Init {
                base_url: "https://api.example.org".into(),
                auth_token: "token".into(),
                viewer_id: "user-me".into(),
                config: None,
            })
            .await
            .expect("init should enqueue");

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");

        match event {
            ChatEvent::Ready { viewer_id } => assert_eq!(viewer_id, "user-me"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
