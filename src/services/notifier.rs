//! Operator alerts over Telegram.
//!
//! Alerts are queued on a bounded channel and posted by a single worker
//! task. Producers never wait: [`AlertNotifier::send_alert`] drops the alert
//! when the queue is full or delivery is disabled.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;

/// Telegram rejects messages above 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

/// A single operator alert
#[derive(Debug, Clone, Default)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub stack: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Plain-text rendering sent to the chat
    pub fn render(&self, source: &str) -> String {
        let mut text = format!("[{source}] {}\n{}", self.subject, self.message);

        if !self.metadata.is_empty() {
            text.push('\n');
            for (key, value) in &self.metadata {
                text.push_str(&format!("\n{key}: {value}"));
            }
        }

        if let Some(stack) = &self.stack {
            text.push_str("\n\n");
            text.push_str(stack);
        }

        if text.chars().count() > MAX_MESSAGE_CHARS {
            text = text.chars().take(MAX_MESSAGE_CHARS).collect();
            text.push_str("\n...");
        }
        text
    }
}

/// Fire-and-forget alert queue
#[derive(Clone)]
pub struct AlertNotifier {
    tx: Option<mpsc::Sender<Alert>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AlertNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertNotifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AlertNotifier {
    /// Start the delivery worker, or return a disabled notifier when
    /// Telegram is not fully configured
    pub fn start(config: &TelegramConfig, source: impl Into<String>) -> Self {
        if !config.is_active() {
            info!("Telegram alerts disabled");
            return Self::disabled();
        }

        let http = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(http) => http,
            Err(e) => {
                warn!(error = %e, "Failed to build Telegram client, alerts disabled");
                return Self::disabled();
            }
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let worker = TelegramWorker {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
            source: source.into(),
        };
        let handle = tokio::spawn(worker.run(rx, shutdown.clone()));

        info!(capacity = config.queue_capacity, "Telegram alerts enabled");
        Self {
            tx: Some(tx),
            worker: Arc::new(Mutex::new(Some(handle))),
            shutdown,
        }
    }

    /// Notifier that drops every alert
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Notifier whose queue is drained by the caller instead of a worker
    pub fn with_receiver(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let notifier = Self {
            tx: Some(tx),
            worker: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        };
        (notifier, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an alert without waiting; returns whether it was accepted
    pub fn send_alert(&self, alert: Alert) -> bool {
        let Some(tx) = &self.tx else {
            debug!(subject = %alert.subject, "Alert dropped, notifier disabled");
            metrics::counter!("alerts_dropped_total").increment(1);
            return false;
        };

        match tx.try_send(alert) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Alert dropped");
                metrics::counter!("alerts_dropped_total").increment(1);
                false
            }
        }
    }

    /// Stop the worker and wait for it to finish
    pub async fn close(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Alert worker terminated abnormally");
            }
        }
    }
}

struct TelegramWorker {
    http: reqwest::Client,
    endpoint: String,
    chat_id: String,
    source: String,
}

impl TelegramWorker {
    async fn run(self, mut rx: mpsc::Receiver<Alert>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Deliver what is already queued, then stop
                    while let Ok(alert) = rx.try_recv() {
                        self.deliver(&alert).await;
                    }
                    break;
                }
                next = rx.recv() => match next {
                    Some(alert) => self.deliver(&alert).await,
                    None => break,
                },
            }
        }
        debug!("Alert worker stopped");
    }

    async fn deliver(&self, alert: &Alert) {
        let body = json!({
            "chat_id": self.chat_id,
            "text": alert.render(&self.source),
            "disable_web_page_preview": true,
        });

        let result = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => debug!(subject = %alert.subject, "Alert delivered"),
            Err(e) => warn!(subject = %alert.subject, error = %e, "Alert delivery failed"),
        }
    }
}
