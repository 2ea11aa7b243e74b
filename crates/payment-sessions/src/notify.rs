//! Payment lifecycle notifications.
//!
//! Delivery is best effort: sinks log failures and never report them to the
//! caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use telegram_client::TelegramClient;
use tracing::{debug, info, warn};

/// Fields shared by every payment event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDetails {
    pub payment_id: String,
    pub amount: String,
    /// Currency label, e.g. `BTC` or `Card Payment (EUR)`.
    pub currency: String,
    pub network: Option<String>,
    pub username: Option<String>,
    pub order_description: Option<String>,
    pub pay_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventDetails {
    pub fn new(
        payment_id: impl Into<String>,
        amount: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            amount: amount.into(),
            currency: currency.into(),
            network: None,
            username: None,
            order_description: None,
            pay_address: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_network(mut self, network: Option<impl Into<String>>) -> Self {
        self.network = network.map(Into::into);
        self
    }

    pub fn with_username(mut self, username: Option<impl Into<String>>) -> Self {
        self.username = username.map(Into::into);
        self
    }

    pub fn with_order_description(mut self, description: impl Into<String>) -> Self {
        self.order_description = Some(description.into());
        self
    }

    pub fn with_pay_address(mut self, address: impl Into<String>) -> Self {
        self.pay_address = Some(address.into());
        self
    }

    /// Timestamp in a human-readable UTC form.
    pub fn human_time(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// A payment lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    PaymentCreated(EventDetails),
    /// `status` is the raw status string, which may come from a webhook.
    PaymentStatusChanged { details: EventDetails, status: String },
    PaymentCancelled(EventDetails),
}

impl PaymentEvent {
    pub fn details(&self) -> &EventDetails {
        match self {
            PaymentEvent::PaymentCreated(details)
            | PaymentEvent::PaymentCancelled(details)
            | PaymentEvent::PaymentStatusChanged { details, .. } => details,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "created",
            PaymentEvent::PaymentStatusChanged { .. } => "status_changed",
            PaymentEvent::PaymentCancelled(_) => "cancelled",
        }
    }
}

/// Receives payment events. Fire-and-forget.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: PaymentEvent);
}

/// Sink that only logs events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: PaymentEvent) {
        let details = event.details();
        match &event {
            PaymentEvent::PaymentStatusChanged { status, .. } => info!(
                payment_id = %details.payment_id,
                status = %status,
                "Payment status changed"
            ),
            _ => info!(
                payment_id = %details.payment_id,
                amount = %details.amount,
                currency = %details.currency,
                "Payment {}",
                event.kind()
            ),
        }
    }
}

/// Sink posting HTML messages to a Telegram chat.
pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: String,
    footer: Option<String>,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, chat_id: impl Into<String>, footer: Option<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
            footer,
        }
    }

    /// Render an event as a Telegram HTML message.
    pub fn format_message(&self, event: &PaymentEvent) -> String {
        let details = event.details();
        let network = details
            .network
            .as_deref()
            .map(|n| format!(" ({})", escape_html(n)))
            .unwrap_or_default();
        let amount = format!(
            "💵 <b>Amount:</b> <code>{} {}</code>{}",
            escape_html(&details.amount),
            escape_html(&details.currency),
            network
        );

        let mut lines = Vec::new();
        match event {
            PaymentEvent::PaymentCreated(_) => {
                lines.push("💰 <b>New Payment Created</b>".to_string());
                lines.push(String::new());
                push_user(&mut lines, details);
                lines.push(amount);
                push_order(&mut lines, details);
                lines.push(payment_id_line(details));
                if let Some(address) = &details.pay_address {
                    lines.push(format!("📬 <b>Address:</b> <code>{}</code>", escape_html(address)));
                }
            }
            PaymentEvent::PaymentStatusChanged { status, .. } => {
                lines.push(format!(
                    "{} <b>Payment Status: {}</b>",
                    status_emoji(status),
                    escape_html(&status.to_uppercase())
                ));
                lines.push(String::new());
                lines.push(payment_id_line(details));
                lines.push(amount);
            }
            PaymentEvent::PaymentCancelled(_) => {
                lines.push("🗑️ <b>Payment Cancelled</b>".to_string());
                lines.push(String::new());
                push_user(&mut lines, details);
                lines.push(amount);
                push_order(&mut lines, details);
                lines.push(payment_id_line(details));
            }
        }
        lines.push(format!("🕒 <b>Time:</b> {}", details.human_time()));

        if let Some(footer) = &self.footer {
            lines.push(String::new());
            lines.push("━━━━━━━━━━━━━━━━━━━━".to_string());
            lines.push(format!("<i>{}</i>", escape_html(footer)));
        }

        lines.join("\n")
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, event: PaymentEvent) {
        let text = self.format_message(&event);

        match self.client.send_message(&self.chat_id, &text).await {
            Ok(_) => debug!("Sent {} notification for {}", event.kind(), event.details().payment_id),
            Err(e) => warn!(
                "Failed to send {} notification for {}: {}",
                event.kind(),
                event.details().payment_id,
                e
            ),
        }
    }
}

fn push_user(lines: &mut Vec<String>, details: &EventDetails) {
    if let Some(user) = &details.username {
        lines.push(format!("👤 <b>User:</b> <code>{}</code>", escape_html(user)));
    }
}

fn push_order(lines: &mut Vec<String>, details: &EventDetails) {
    if let Some(order) = &details.order_description {
        lines.push(format!("📦 <b>Order:</b> {}", escape_html(order)));
    }
}

fn payment_id_line(details: &EventDetails) -> String {
    format!(
        "🔑 <b>Payment ID:</b> <code>{}</code>",
        escape_html(&details.payment_id)
    )
}

fn status_emoji(status: &str) -> &'static str {
    match status.to_ascii_lowercase().as_str() {
        "waiting" => "⏳",
        "processing" => "🔄",
        "sending" => "📤",
        "finished" | "completed" => "✅",
        "failed" => "❌",
        "rejected" => "🚫",
        "cancelled" => "🗑️",
        _ => "📊",
    }
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
