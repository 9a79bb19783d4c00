//! Transactional email.
//!
//! Every send in the order pipeline goes through [`OrderNotifier`], which is the single
//! place where delivery failures are caught, logged and converted into a boolean.
//! Nothing outside this module ever sees a [`NotificationError`].

pub mod templates;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{config::AppConfig, entities::OrderModel};
pub use templates::ReceiptLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("email delivery is not configured")]
    NotConfigured,
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("mail provider did not respond within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotificationError>;
}

/// Stand-in used when no mail provider key is configured. Every send fails, so
/// callers report `false` instead of pretending mail went out.
#[derive(Debug, Default, Clone)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &Email) -> Result<(), NotificationError> {
        Err(NotificationError::NotConfigured)
    }
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Resend HTTP API client.
#[derive(Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        from: impl Into<String>,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &Email) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&ResendPayload {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Builds the mailer the configuration asks for.
pub fn mailer_from_config(config: &AppConfig) -> Result<Arc<dyn Mailer>, NotificationError> {
    match config.resend_api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Ok(Arc::new(ResendMailer::new(
            key,
            config.resend_api_base.clone(),
            config.email_from.clone(),
        )?)),
        None => {
            warn!("no mail provider key configured; order emails are disabled");
            Ok(Arc::new(DisabledMailer))
        }
    }
}

/// Outcome of the post-payment email step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub customer_email_sent: bool,
    pub admin_email_sent: bool,
}

#[derive(Clone)]
pub struct OrderNotifier {
    mailer: Arc<dyn Mailer>,
    admin_email: Option<String>,
    timeout: Duration,
}

impl OrderNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, admin_email: Option<String>, timeout: Duration) -> Self {
        Self {
            mailer,
            admin_email: admin_email.filter(|a| !a.trim().is_empty()),
            timeout,
        }
    }

    /// Sends one email, bounded by the configured timeout. Returns whether it was accepted.
    async fn deliver(&self, kind: &'static str, email: Email, reference: &str) -> bool {
        let result = match tokio::time::timeout(self.timeout, self.mailer.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(self.timeout)),
        };
        match result {
            Ok(()) => {
                debug!(kind, reference, to = %email.to, "email sent");
                counter!("storefront_notifications.sent", 1, "kind" => kind);
                true
            }
            Err(err) => {
                warn!(kind, reference, error = %err, "email not sent");
                counter!("storefront_notifications.failed", 1, "kind" => kind);
                false
            }
        }
    }

    /// Customer confirmation plus operator notice for a newly recorded order.
    #[instrument(skip(self, order, lines), fields(order_id = %order.id))]
    pub async fn order_confirmed(&self, order: &OrderModel, lines: &[ReceiptLine]) -> NotificationReport {
        let reference = order.id.to_string();
        let customer_email_sent = self
            .deliver(
                "order_confirmation",
                templates::customer_confirmation(order, lines),
                &reference,
            )
            .await;
        let admin_email_sent = match &self.admin_email {
            Some(admin) => {
                self.deliver(
                    "admin_new_order",
                    templates::admin_new_order(admin, order, lines),
                    &reference,
                )
                .await
            }
            None => false,
        };
        NotificationReport {
            customer_email_sent,
            admin_email_sent,
        }
    }

    /// Operator heads-up that a visitor was sent to the payment page.
    pub async fn checkout_started(
        &self,
        session_id: &str,
        customer_email: &str,
        customer_name: Option<&str>,
        lines: &[ReceiptLine],
        currency: &str,
    ) -> bool {
        let Some(admin) = &self.admin_email else {
            return false;
        };
        self.deliver(
            "admin_checkout_started",
            templates::admin_checkout_started(admin, customer_email, customer_name, lines, currency),
            session_id,
        )
        .await
    }

    pub async fn order_dispatched(&self, order: &OrderModel, to: &str) -> bool {
        self.deliver(
            "order_dispatched",
            templates::customer_dispatched(to, order),
            &order.id.to_string(),
        )
        .await
    }

    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }
}

impl std::fmt::Debug for OrderNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderNotifier")
            .field("admin_email", &self.admin_email)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<(), NotificationError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(NotificationError::Transport("connection refused".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn order() -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            customer_email: "a@b.com".into(),
            customer_name: None,
            customer_phone: None,
            shipping_address: None,
            billing_address: None,
            status: OrderStatus::Pending,
            total_amount: dec!(10),
            currency: "gbp".into(),
            stripe_payment_intent_id: "pi_1".into(),
            stripe_session_id: None,
            created_at: Utc::now(),
            updated_at: None,
            dispatched_at: None,
        }
    }

    #[tokio::test]
    async fn reports_both_sends() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = OrderNotifier::new(
            mailer.clone(),
            Some("ops@shop.test".into()),
            Duration::from_secs(1),
        );
        let report = notifier.order_confirmed(&order(), &[]).await;
        assert_eq!(
            report,
            NotificationReport {
                customer_email_sent: true,
                admin_email_sent: true
            }
        );
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].to, "ops@shop.test");
    }

    #[tokio::test]
    async fn failures_become_false() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let notifier = OrderNotifier::new(mailer, None, Duration::from_secs(1));
        let report = notifier.order_confirmed(&order(), &[]).await;
        assert_eq!(report, NotificationReport::default());
    }

    #[tokio::test]
    async fn slow_mailer_is_cut_off() {
        let mailer = Arc::new(RecordingMailer {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let notifier = OrderNotifier::new(mailer, None, Duration::from_millis(20));
        assert!(!notifier.order_dispatched(&order(), "a@b.com").await);
    }

    #[tokio::test]
    async fn disabled_mailer_never_reports_success() {
        let notifier = OrderNotifier::new(
            Arc::new(DisabledMailer),
            Some("ops@shop.test".into()),
            Duration::from_secs(1),
        );
        let report = notifier.order_confirmed(&order(), &[]).await;
        assert!(!report.customer_email_sent);
        assert!(!report.admin_email_sent);
    }

    #[test]
    fn blank_admin_address_is_treated_as_unset() {
        let notifier = OrderNotifier::new(
            Arc::new(DisabledMailer),
            Some("  ".into()),
            Duration::from_secs(1),
        );
        assert!(notifier.admin_email().is_none());
    }
}
