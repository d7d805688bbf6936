//! Connection lifecycle management.
//!
//! One `Gateway` per process. It owns the protocol-client handle, the status
//! record, and the reconnect policy:
//!
//! `Idle → Connecting → {Connected, AwaitingScan} → Connecting` on a
//! transient close, or `→ Terminal` on logout. Terminal purges the session
//! files, pushes a final status, and exits so the supervising process
//! manager restarts the service with a clean slate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use wacore::types::events::Event;
use wacore::types::message::MessageInfo;
use wacore_binary::jid::Jid;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use crate::broadcast::{Broadcaster, STATUS_EVENT};
use crate::config::WhatsAppConfig;
use crate::error::{Result, WagateError};
use crate::gateway::{qr, store, ConnectedUser, ConnectionStatus, SessionStore};
use crate::scheduler::Scheduler;

/// Delay before retrying after a transient disconnect.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Grace period between the terminal status push and process exit.
pub const EXIT_GRACE: Duration = Duration::from_secs(1);

pub struct Gateway {
    config: WhatsAppConfig,
    status: RwLock<ConnectionStatus>,
    client: Mutex<Option<Arc<Client>>>,
    /// Guard against overlapping connection attempts.
    connecting: AtomicBool,
    /// Set once on the logout path; no transition leaves it.
    terminal: AtomicBool,
    /// Cancels the running client task when the session is replaced.
    bot_task: Mutex<Option<AbortHandle>>,
    broadcaster: Arc<Broadcaster>,
    scheduler: OnceCell<Arc<Scheduler>>,
}

impl Gateway {
    pub fn new(config: WhatsAppConfig, broadcaster: Arc<Broadcaster>) -> Arc<Self> {
        Arc::new(Self {
            config,
            status: RwLock::new(ConnectionStatus::initializing()),
            client: Mutex::new(None),
            connecting: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            bot_task: Mutex::new(None),
            broadcaster,
            scheduler: OnceCell::new(),
        })
    }

    /// Wire the scheduler in after construction (the scheduler itself needs
    /// the gateway to send, so the two are linked post-hoc).
    pub fn attach_scheduler(&self, scheduler: Arc<Scheduler>) {
        let _ = self.scheduler.set(scheduler);
    }

    /// Snapshot of the current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.status.read().await.connected
    }

    /// Replace the status wholesale and push it to all subscribers.
    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status.clone();
        self.broadcaster.publish(STATUS_EVENT, status).await;
    }

    /// Establish the protocol session. A no-op while another attempt is in
    /// flight or after the terminal transition.
    pub async fn connect(self: &Arc<Self>) {
        if self.terminal.load(Ordering::SeqCst) {
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connection attempt already in flight");
            return;
        }
        self.set_status(ConnectionStatus::disconnected("Connecting to WhatsApp"))
            .await;

        if let Err(e) = self.open_session().await {
            error!("failed to open WhatsApp session: {e}");
            self.connecting.store(false, Ordering::SeqCst);
            self.set_status(ConnectionStatus::disconnected(
                "Connection failed, retrying",
            ))
            .await;
            self.schedule_reconnect();
        }
    }

    /// Open the session store and run a fresh client. The HTTP client handed
    /// to the builder fetches the current WhatsApp Web version descriptor;
    /// the store supplies the persisted pairing state.
    async fn open_session(self: &Arc<Self>) -> Result<()> {
        let session_dir = self.config.session_dir();
        std::fs::create_dir_all(&session_dir)?;
        let db_path = session_dir.join(store::SESSION_DB_FILE);

        let backend = Arc::new(
            SessionStore::new(db_path.to_string_lossy().as_ref())
                .await
                .map_err(|e| WagateError::Store(e.to_string()))?,
        );

        match backend.device_exists().await {
            Ok(true) => info!("paired session found, resuming"),
            Ok(false) => info!("no paired session, QR pairing required"),
            Err(e) => warn!("could not check pairing state: {e}"),
        }

        // A reconnect replaces the previous client wholesale.
        if let Some(previous) = self.bot_task.lock().await.take() {
            previous.abort();
        }

        let gateway = self.clone();
        let event_store = backend.clone();
        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(self.config.device_name.clone()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let gateway = gateway.clone();
                let event_store = event_store.clone();
                async move {
                    match event {
                        Event::PairingQrCode { code, .. } => gateway.on_qr(&code).await,
                        Event::PairSuccess(_) => info!("pairing successful"),
                        Event::Connected(_) => gateway.on_connected(client, &event_store).await,
                        Event::Disconnected(_) => gateway.on_disconnected().await,
                        Event::LoggedOut(_) => gateway.on_logged_out().await,
                        Event::Message(msg, msg_info) => {
                            let _ = msg;
                            gateway.on_message(&msg_info).await;
                        }
                        other => debug!("unhandled client event: {other:?}"),
                    }
                }
            })
            .build()
            .await
            .map_err(|e| WagateError::Transport(e.to_string()))?;

        let run_handle = bot
            .run()
            .await
            .map_err(|e| WagateError::Transport(e.to_string()))?;

        *self.bot_task.lock().await = Some(run_handle.abort_handle());
        let _ = tokio::spawn(async move {
            if let Err(e) = run_handle.await {
                warn!("client task ended abnormally: {e:?}");
            }
        });
        Ok(())
    }

    /// A pairing QR code arrived (WhatsApp rotates them periodically).
    async fn on_qr(&self, code: &str) {
        info!("pairing QR code received, scan it with your phone");
        if let Some(art) = qr::render_qr_terminal(code) {
            info!("\n{art}");
        }
        match qr::render_qr_data_url(code) {
            Some(url) => self.set_status(ConnectionStatus::awaiting_scan(url)).await,
            None => warn!("failed to render pairing QR code"),
        }
    }

    async fn on_connected(&self, client: Arc<Client>, session: &SessionStore) {
        self.connecting.store(false, Ordering::SeqCst);
        *self.client.lock().await = Some(client);

        let user = match session.paired_identity().await {
            Ok(Some((raw_jid, name))) => Some(ConnectedUser::from_raw_jid(&raw_jid, &name)),
            Ok(None) => None,
            Err(e) => {
                debug!("paired identity unavailable: {e}");
                None
            }
        };
        info!(
            number = user.as_ref().map(|u| u.number.as_str()).unwrap_or("unknown"),
            "WhatsApp connected"
        );
        self.set_status(ConnectionStatus::connected(user)).await;

        if let Some(scheduler) = self.scheduler.get() {
            scheduler.publish_jobs().await;
        }
    }

    /// Transient close: clear the handle and retry after the fixed delay.
    async fn on_disconnected(self: &Arc<Self>) {
        if self.terminal.load(Ordering::SeqCst) {
            return;
        }
        *self.client.lock().await = None;
        self.connecting.store(false, Ordering::SeqCst);
        warn!(
            "connection lost, reconnecting in {}s",
            RECONNECT_DELAY.as_secs()
        );
        self.set_status(ConnectionStatus::disconnected(
            "Connection lost, reconnecting",
        ))
        .await;
        self.schedule_reconnect();
    }

    /// The server invalidated the session. Terminal: purge the session and
    /// let the supervisor restart the process for a fresh pairing.
    async fn on_logged_out(self: &Arc<Self>) {
        warn!("logged out by the server");
        self.terminal_shutdown().await;
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let gateway = self.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            gateway.connect().await;
        });
    }

    /// Own outbound traffic carries our full JID; use it to keep the
    /// connected-user identity fresh (the client does not expose it).
    async fn on_message(&self, msg_info: &MessageInfo) {
        if !msg_info.source.is_from_me {
            debug!(
                sender = %msg_info.source.sender,
                "inbound message ignored (send-only gateway)"
            );
            return;
        }
        let current = self.status.read().await.clone();
        if !current.connected {
            return;
        }
        let raw = msg_info.source.sender.to_string();
        let name = if msg_info.push_name.is_empty() {
            current
                .user
                .as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_default()
        } else {
            msg_info.push_name.clone()
        };
        let user = ConnectedUser::from_raw_jid(&raw, &name);
        if current.user.as_ref() != Some(&user) {
            self.set_status(ConnectionStatus::connected(Some(user))).await;
        }
    }

    /// Send a text message right now.
    ///
    /// Fails with `NotConnected` unless the status says connected and a live
    /// handle exists; with `UnknownRecipient` when the recipient cannot be
    /// addressed; transport errors propagate unchanged.
    pub async fn send_message(&self, recipient: &str, body: &str) -> Result<String> {
        if !self.status.read().await.connected {
            return Err(WagateError::NotConnected);
        }
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(WagateError::NotConnected)?;

        let jid = normalize_recipient(recipient)?;
        let message = waproto::whatsapp::Message {
            conversation: Some(body.to_string()),
            ..Default::default()
        };
        let message_id = client
            .send_message(jid.clone(), message)
            .await
            .map_err(|e| WagateError::Transport(e.to_string()))?;
        info!(recipient = %jid, message_id = %message_id, "message dispatched");
        Ok(message_id)
    }

    /// User-requested logout. The client surface has no unlink RPC, so this
    /// goes straight to the terminal path; dropping the handle closes the
    /// socket when the process exits.
    pub async fn logout(self: &Arc<Self>) {
        let had_client = self.client.lock().await.take().is_some();
        if had_client {
            info!("logout requested, closing active session");
        } else {
            info!("logout requested with no active session");
        }
        self.terminal_shutdown().await;
    }

    async fn terminal_shutdown(self: &Arc<Self>) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.client.lock().await = None;
        self.connecting.store(false, Ordering::SeqCst);
        if let Some(task) = self.bot_task.lock().await.take() {
            task.abort();
        }

        match store::purge_session_dir(&self.config.session_dir()) {
            Ok(n) => info!("removed {n} session file(s)"),
            // Cleanup failures are logged, never propagated.
            Err(e) => error!("{e}"),
        }

        self.set_status(ConnectionStatus::disconnected(
            "Logged out. Restart the service to pair again.",
        ))
        .await;

        info!(
            "exiting in {}s for a supervised restart",
            EXIT_GRACE.as_secs()
        );
        let _ = tokio::spawn(async {
            tokio::time::sleep(EXIT_GRACE).await;
            std::process::exit(0);
        });
    }
}

/// Normalize a user-supplied phone number into WhatsApp's addressing form
/// (`<digits>@s.whatsapp.net`). Accepts E.164-ish input with `+`, spaces,
/// dots, dashes, and parentheses.
pub fn normalize_recipient(recipient: &str) -> Result<Jid> {
    let stripped: String = recipient
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return Err(WagateError::UnknownRecipient(recipient.to_string()));
    }
    // Shortest national numbers are 5 digits; E.164 caps at 15.
    if !(5..=15).contains(&stripped.len()) {
        return Err(WagateError::UnknownRecipient(recipient.to_string()));
    }

    format!("{stripped}@s.whatsapp.net")
        .parse::<Jid>()
        .map_err(|_| WagateError::UnknownRecipient(recipient.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway() -> Arc<Gateway> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = WhatsAppConfig {
            data_dir: dir.keep(),
            device_name: "Wagate Test".into(),
        };
        Gateway::new(config, Arc::new(Broadcaster::new()))
    }

    #[test]
    fn test_normalize_plain_number() {
        let jid = normalize_recipient("15551234567").unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_normalize_e164_formatting() {
        let jid = normalize_recipient("+1 (555) 123-4567").unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_recipient("not-a-number"),
            Err(WagateError::UnknownRecipient(_))
        ));
        assert!(matches!(
            normalize_recipient(""),
            Err(WagateError::UnknownRecipient(_))
        ));
        assert!(matches!(
            normalize_recipient("123"),
            Err(WagateError::UnknownRecipient(_))
        ));
        assert!(matches!(
            normalize_recipient("12345678901234567890"),
            Err(WagateError::UnknownRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_initial_status_is_initializing() {
        let gateway = test_gateway();
        let status = gateway.status().await;
        assert!(!status.connected);
        assert_eq!(status.message, "Initializing");
        assert!(!gateway.is_connected().await);
    }

    #[tokio::test]
    async fn test_send_fails_not_connected() {
        let gateway = test_gateway();
        let result = gateway.send_message("15551234567", "hi").await;
        assert!(matches!(result, Err(WagateError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_checks_connection_before_recipient() {
        // Disconnected wins over a bad recipient.
        let gateway = test_gateway();
        let result = gateway.send_message("garbage", "hi").await;
        assert!(matches!(result, Err(WagateError::NotConnected)));
    }

    #[tokio::test]
    async fn test_transient_close_transitions_to_reconnecting() {
        let gateway = test_gateway();
        gateway
            .set_status(ConnectionStatus::connected(None))
            .await;

        gateway.on_disconnected().await;

        let status = gateway.status().await;
        assert!(!status.connected);
        assert_eq!(status.message, "Connection lost, reconnecting");
        // The handle is gone; sends fail immediately.
        assert!(matches!(
            gateway.send_message("15551234567", "hi").await,
            Err(WagateError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_status_broadcast_on_transition() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut rx = broadcaster.subscribe("watcher".into()).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let config = WhatsAppConfig {
            data_dir: dir.keep(),
            device_name: "Wagate Test".into(),
        };
        let gateway = Gateway::new(config, broadcaster);

        gateway
            .set_status(ConnectionStatus::disconnected("Connecting to WhatsApp"))
            .await;

        let event: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("status event")).expect("json");
        assert_eq!(event["event"], "status");
        assert_eq!(event["data"]["connected"], false);
        assert_eq!(event["data"]["message"], "Connecting to WhatsApp");
    }
}
