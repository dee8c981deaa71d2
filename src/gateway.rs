//! Daraja (M-Pesa) gateway client.
//!
//! Two outbound calls: the OAuth client-credentials exchange and the STK push
//! itself. Tokens are short-lived and not cached; every initiation
//! re-authenticates, which is fine at this volume.
//!
//! Sandbox smoke test:
//! ```sh
//! curl -u "$CONSUMER_KEY:$CONSUMER_SECRET" \
//!   "https://sandbox.safaricom.co.ke/oauth/v1/generate?grant_type=client_credentials"
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::MpesaConfig, error::AppError, utils::MPESA_TIMESTAMP_FORMAT};

/// Provider identifiers returned on an accepted push request. The checkout
/// request id is the correlation key the callback will carry back.
#[derive(Debug, Clone)]
pub struct StkPushAccept {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn access_token(&self) -> Result<String, AppError>;

    async fn stk_push(
        &self,
        token: &str,
        phone: &str,
        amount: i64,
        account_reference: &str,
    ) -> Result<StkPushAccept, AppError>;
}

pub struct DarajaGateway {
    config: MpesaConfig,
    http: Client,
}

impl DarajaGateway {
    pub fn new(config: MpesaConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("HTTP client construction failed");

        Self { config, http }
    }

    /// `base64(shortcode + passkey + timestamp)`, per the Daraja spec.
    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{timestamp}",
            self.config.shortcode, self.config.passkey
        ))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
struct StkPushRequest<'a> {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: &'a str,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
    #[serde(rename = "Amount")]
    amount: i64,
    #[serde(rename = "PartyA")]
    party_a: &'a str,
    #[serde(rename = "PartyB")]
    party_b: &'a str,
    #[serde(rename = "PhoneNumber")]
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    #[serde(rename = "AccountReference")]
    account_reference: &'a str,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: &'static str,
}

#[derive(Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[async_trait]
impl PushGateway for DarajaGateway {
    async fn access_token(&self) -> Result<String, AppError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| AppError::AuthError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::AuthError(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(e.to_string()))?;

        Ok(token.access_token)
    }

    async fn stk_push(
        &self,
        token: &str,
        phone: &str,
        amount: i64,
        account_reference: &str,
    ) -> Result<StkPushAccept, AppError> {
        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let timestamp = Local::now().format(MPESA_TIMESTAMP_FORMAT).to_string();

        let request = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: phone,
            party_b: &self.config.shortcode,
            phone_number: phone,
            call_back_url: &self.config.callback_url,
            account_reference,
            transaction_desc: "Food Order Payment",
        };

        debug!("Submitting STK push for {phone}, amount {amount}");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GatewayUnreachable(e.to_string()))?;

        let body: StkPushResponse = response
            .json()
            .await
            .map_err(|e| AppError::GatewayUnreachable(e.to_string()))?;

        if body.response_code.as_deref() == Some("0") {
            match (body.merchant_request_id, body.checkout_request_id) {
                (Some(merchant_request_id), Some(checkout_request_id)) => Ok(StkPushAccept {
                    merchant_request_id,
                    checkout_request_id,
                }),
                _ => Err(AppError::GatewayRejected(
                    "Accepted response missing request identifiers".to_string(),
                )),
            }
        } else {
            Err(AppError::GatewayRejected(
                body.error_message
                    .unwrap_or_else(|| "Payment request failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
pub mod fake {
    //! Canned gateway for exercising the payment flow without the network.

    use std::sync::{Arc, Mutex};

    use super::*;

    enum Mode {
        Accept {
            merchant_request_id: String,
            checkout_request_id: String,
        },
        Reject(String),
        Unreachable,
    }

    pub struct FakeGateway {
        mode: Mode,
        /// (phone, amount) pairs for every push submitted.
        pub pushes: Arc<Mutex<Vec<(String, i64)>>>,
    }

    impl FakeGateway {
        pub fn accepting(checkout_request_id: &str) -> Self {
            Self {
                mode: Mode::Accept {
                    merchant_request_id: format!("merchant-{checkout_request_id}"),
                    checkout_request_id: checkout_request_id.to_string(),
                },
                pushes: Arc::default(),
            }
        }

        pub fn rejecting(message: &str) -> Self {
            Self {
                mode: Mode::Reject(message.to_string()),
                pushes: Arc::default(),
            }
        }

        pub fn unreachable() -> Self {
            Self {
                mode: Mode::Unreachable,
                pushes: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl PushGateway for FakeGateway {
        async fn access_token(&self) -> Result<String, AppError> {
            Ok("test-token".to_string())
        }

        async fn stk_push(
            &self,
            _token: &str,
            phone: &str,
            amount: i64,
            _account_reference: &str,
        ) -> Result<StkPushAccept, AppError> {
            self.pushes
                .lock()
                .unwrap()
                .push((phone.to_string(), amount));

            match &self.mode {
                Mode::Accept {
                    merchant_request_id,
                    checkout_request_id,
                } => Ok(StkPushAccept {
                    merchant_request_id: merchant_request_id.clone(),
                    checkout_request_id: checkout_request_id.clone(),
                }),
                Mode::Reject(message) => Err(AppError::GatewayRejected(message.clone())),
                Mode::Unreachable => {
                    Err(AppError::GatewayUnreachable("connection timed out".to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let gateway = DarajaGateway::new(MpesaConfig::for_tests());
        let password = gateway.password("20240115143022");

        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240115143022");
    }
}
