//! billing-resilience: payment retry with grace-period downgrade, and
//! usage-credit metering per subscription plan.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod testing;

pub use error::BillingError;
