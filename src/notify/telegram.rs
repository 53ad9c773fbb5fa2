//! Telegram Bot API delivery

use super::{CycleOpenedNotice, Notifier, PaymentDueNotice, WinnerNotice};
use crate::config::TelegramConfig;
use crate::error::{ChitError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    parse_mode: String,
}

/// Posts cycle and settlement notices to a Telegram chat
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    chat_id: String,
    notify_winners: bool,
    notify_payments: bool,
    notify_cycles: bool,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: Client::new(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            notify_winners: config.notify_winners,
            notify_payments: config.notify_payments,
            notify_cycles: config.notify_cycles,
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    /// Point at a different Bot API host (local bot server, test double)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    async fn send(&self, text: String) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: self.chat_id.clone(),
            text,
            parse_mode: "HTML".to_string(),
        };

        let response = self.http.post(self.send_url()).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(ChitError::Notification(format!(
                "Telegram responded with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_cycle_opened(&self, notice: CycleOpenedNotice) -> Result<()> {
        if !self.notify_cycles {
            return Ok(());
        }
        self.send(notice.message()).await
    }

    async fn notify_winner(&self, notice: WinnerNotice) -> Result<()> {
        if !self.notify_winners {
            return Ok(());
        }
        self.send(notice.message()).await
    }

    async fn notify_payment_due(&self, notice: PaymentDueNotice) -> Result<()> {
        if !self.notify_payments {
            return Ok(());
        }
        self.send(notice.message()).await
    }
}
