// Checkout and payment provider
pub mod checkout;
pub mod payment_provider;
pub mod pricing;

// Order persistence, queries and lifecycle
pub mod orders;
