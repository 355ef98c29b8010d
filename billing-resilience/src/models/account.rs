//! Billing account model.

use crate::models::PlanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant of the invoicing product, as far as billing is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub plan: PlanId,
    pub plan_assigned_at: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: Uuid, plan: PlanId, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            plan,
            plan_assigned_at: now,
            created_utc: now,
            updated_utc: now,
        }
    }
}
