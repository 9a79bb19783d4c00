pub mod checkout;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    notifications::{self, Mailer, OrderNotifier},
    services::{
        checkout::{CheckoutService, CheckoutSettings},
        orders::{OrderService, OrderStore, SeaOrmOrderStore},
        payment_provider::{PaymentProvider, StripeClient},
    },
    webhooks::{SignatureVerifier, WebhookProcessor},
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires the services around an explicit payment provider and mailer.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        provider: Arc<dyn PaymentProvider>,
        mailer: Arc<dyn Mailer>,
        event_sender: Option<EventSender>,
    ) -> Self {
        let store: Arc<dyn OrderStore> = Arc::new(SeaOrmOrderStore::new(db_pool));
        let notifier = OrderNotifier::new(
            mailer,
            config.admin_email.clone(),
            config.email_timeout(),
        );

        let checkout = Arc::new(CheckoutService::new(
            provider.clone(),
            store.clone(),
            notifier.clone(),
            CheckoutSettings::from(config),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            SignatureVerifier::new(
                config.payment_webhook_secret.clone(),
                config.payment_webhook_tolerance_secs,
            ),
            provider,
            store.clone(),
            notifier.clone(),
            event_sender.clone(),
            config.checkout_currency.to_lowercase(),
        ));
        let orders = Arc::new(OrderService::new(store, notifier, event_sender));

        Self {
            checkout,
            webhooks,
            orders,
        }
    }

    /// Production wiring: Stripe plus the configured mail provider.
    pub fn from_config(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<EventSender>,
    ) -> Result<Self, ServiceError> {
        let provider: Arc<dyn PaymentProvider> = Arc::new(StripeClient::new(
            config.stripe_secret_key.clone(),
            config.stripe_api_base.clone(),
        )?);
        let mailer = notifications::mailer_from_config(config)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        Ok(Self::new(db_pool, config, provider, mailer, event_sender))
    }
}
