//! Payment records and the STK push state machine.
//!
//! A record is created `pending` once the gateway accepts a push request and
//! moves exactly once, to `completed` or `failed`, when the provider's
//! callback arrives. There is no transition out of a terminal state: the
//! provider may redeliver the same callback and the handler must converge
//! without double side effects. `cancelled` is reserved for manual
//! intervention; no code path here produces it.
//!
//! Progress is driven entirely from outside: the provider via the webhook,
//! the client via polling. A push that never gets a callback stays `pending`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    error::AppError,
    state::State,
    utils::{normalize_phone, parse_transaction_date},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub id: u64,
    pub user_id: u64,
    /// Cart captured at initiation. The callback closes this cart, not
    /// whichever cart happens to be active for the user by then.
    pub cart_id: u64,
    pub phone_number: String,
    pub amount: i64,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<u64, PaymentRecord>,
    by_checkout_id: HashMap<String, u64>,
}

#[derive(Default, Clone)]
pub struct PaymentStore {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

/// Terminal data extracted from a callback, applied to a pending record.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub result_code: i64,
    pub result_desc: String,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
}

pub enum Finalize {
    /// First delivery: the record just left `pending`.
    Applied(PaymentRecord),
    /// Redelivery: the record was already terminal, nothing changed.
    AlreadyFinal(PaymentRecord),
    NotFound,
}

impl PaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        user_id: u64,
        cart_id: u64,
        phone_number: &str,
        amount: i64,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> PaymentRecord {
        let now = Utc::now();
        let record = PaymentRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            user_id,
            cart_id,
            phone_number: phone_number.to_string(),
            amount,
            merchant_request_id: merchant_request_id.to_string(),
            checkout_request_id: checkout_request_id.to_string(),
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner
            .by_checkout_id
            .insert(record.checkout_request_id.clone(), record.id);
        inner.records.insert(record.id, record.clone());

        record
    }

    /// Owner-scoped lookup for polling; another user's record is not found.
    pub async fn get_for_user(&self, payment_id: u64, user_id: u64) -> Option<PaymentRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(&payment_id)
            .filter(|record| record.user_id == user_id)
            .cloned()
    }

    pub async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Option<PaymentRecord> {
        let inner = self.inner.read().await;
        let id = inner.by_checkout_id.get(checkout_request_id)?;
        inner.records.get(id).cloned()
    }

    /// Applies a callback outcome keyed by checkout request id. The status is
    /// checked under the write lock, so concurrent redeliveries resolve to
    /// one `Applied` and the rest `AlreadyFinal`.
    pub async fn finalize(&self, checkout_request_id: &str, outcome: CallbackOutcome) -> Finalize {
        let mut inner = self.inner.write().await;

        let Some(&id) = inner.by_checkout_id.get(checkout_request_id) else {
            return Finalize::NotFound;
        };
        let Some(record) = inner.records.get_mut(&id) else {
            return Finalize::NotFound;
        };

        if record.status.is_terminal() {
            return Finalize::AlreadyFinal(record.clone());
        }

        record.result_code = Some(outcome.result_code.to_string());
        record.result_desc = Some(outcome.result_desc);
        record.status = if outcome.result_code == 0 {
            record.mpesa_receipt_number = outcome.mpesa_receipt_number;
            record.transaction_date = outcome.transaction_date;
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };
        record.updated_at = Utc::now();

        Finalize::Applied(record.clone())
    }
}

// Provider callback envelope:
// {Body: {stkCallback: {MerchantRequestID, CheckoutRequestID, ResultCode,
//   ResultDesc, CallbackMetadata: {Item: [{Name, Value}, ...]}}}}

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<MetadataItem>,
}

/// Metadata items arrive as a heterogeneous name/value list; values can be
/// strings or numbers and the order is not guaranteed.
#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    fn metadata_value(&self, name: &str) -> Option<String> {
        let items = &self.callback_metadata.as_ref()?.item;
        let value = items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()?;

        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn outcome(&self) -> CallbackOutcome {
        let (mpesa_receipt_number, transaction_date) = if self.result_code == 0 {
            (
                self.metadata_value("MpesaReceiptNumber"),
                self.metadata_value("TransactionDate")
                    .and_then(|raw| parse_transaction_date(&raw)),
            )
        } else {
            (None, None)
        };

        CallbackOutcome {
            result_code: self.result_code,
            result_desc: self.result_desc.clone().unwrap_or_default(),
            mpesa_receipt_number,
            transaction_date,
        }
    }
}

/// Validates the active cart, submits the push, and persists a `pending`
/// record on acceptance. Gateway rejection or unreachability persists nothing.
pub async fn initiate(state: &State, user_id: u64, phone_raw: &str) -> Result<PaymentRecord, AppError> {
    let mpesa = &state.config.mpesa;
    let cart = state.carts.active_cart(user_id).await;
    let amount = cart.total_cost();

    // Sandbox override: floor the submitted amount to 1 instead of rejecting,
    // while the record keeps the true cart amount.
    let submitted = if amount <= 0 {
        if mpesa.sandbox_floor {
            1
        } else {
            return Err(AppError::EmptyCart);
        }
    } else {
        amount
    };

    let phone = normalize_phone(phone_raw, &mpesa.country_code);
    let reference = format!("{}-{user_id}", mpesa.account_prefix);

    let token = state.gateway.access_token().await?;
    let accept = state
        .gateway
        .stk_push(&token, &phone, submitted, &reference)
        .await?;

    let record = state
        .payments
        .create(
            user_id,
            cart.id,
            &phone,
            amount,
            &accept.merchant_request_id,
            &accept.checkout_request_id,
        )
        .await;

    info!(
        "Payment {} pending for user {user_id}, checkout request {}",
        record.id, record.checkout_request_id
    );

    Ok(record)
}

/// Reconciles a provider callback against the record it correlates to.
///
/// Runs purely off the persisted record: initiation may still be in flight,
/// or the callback may be a redelivery. An unmatched correlation id is logged
/// and dropped so the route can still ack the provider.
pub async fn apply_callback(state: &State, callback: StkCallback) {
    let outcome = callback.outcome();
    let checkout_request_id = &callback.checkout_request_id;

    match state.payments.finalize(checkout_request_id, outcome).await {
        Finalize::NotFound => {
            warn!("Payment not found for checkout request {checkout_request_id}");
        }
        Finalize::AlreadyFinal(record) => {
            info!(
                "Callback redelivered for payment {}, already {:?}",
                record.id, record.status
            );
        }
        Finalize::Applied(record) => {
            info!(
                "Payment {} finalized as {:?} ({})",
                record.id,
                record.status,
                record.result_desc.as_deref().unwrap_or("")
            );

            if record.status == PaymentStatus::Completed {
                if !state.carts.close(record.cart_id).await {
                    info!("Cart {} already closed", record.cart_id);
                }

                // Best effort only; a dead notifier never fails the callback.
                if let Err(e) = state.notifier.payment_completed(&record).await {
                    warn!("Payment notification failed, continuing: {e}");
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollStatus {
    pub status: PaymentStatus,
    pub result_desc: Option<String>,
    pub mpesa_receipt: Option<String>,
    /// True once the status has left `pending`; tells the client to stop
    /// polling and refresh.
    pub should_refresh: bool,
}

pub async fn poll(state: &State, user_id: u64, payment_id: u64) -> Result<PollStatus, AppError> {
    let record = state
        .payments
        .get_for_user(payment_id, user_id)
        .await
        .ok_or(AppError::RecordNotFound)?;

    Ok(PollStatus {
        status: record.status,
        result_desc: record.result_desc,
        mpesa_receipt: record.mpesa_receipt_number,
        should_refresh: record.status.is_terminal(),
    })
}
