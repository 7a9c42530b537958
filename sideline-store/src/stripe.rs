use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sideline_core::payment::{
    AccountStatus, Charge, CheckoutSession, CheckoutSessionRequest, MerchantAccount,
    PaymentProcessor, ProcessorError, Refund,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Stripe Connect client: express accounts, destination-charge checkout and refunds
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AccountResponse {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
}

#[derive(Deserialize)]
struct AccountLinkResponse {
    url: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    payment_intent: Option<String>,
    amount: i64,
    #[serde(default)]
    refunded: bool,
}

#[derive(Deserialize)]
struct ChargeList {
    data: Vec<ChargeResponse>,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    charge: Option<String>,
    amount: i64,
}

fn transport_error(e: reqwest::Error) -> ProcessorError {
    if e.is_timeout() {
        ProcessorError::Timeout
    } else {
        ProcessorError::Transient(e.to_string())
    }
}

fn params(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

impl StripeClient {
    pub fn new(secret_key: &str, api_base: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProcessorError> {
        let response = request
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ProcessorError::Transient(format!("unreadable processor response: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Payment processor returned an error");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ProcessorError::Transient(format!("status {}", status)));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProcessorError::Permission(text));
        }
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => Err(ProcessorError::InvalidRequest {
                code: envelope.error.code,
                message: envelope.error.message.unwrap_or_else(|| status.to_string()),
            }),
            Err(_) => Err(ProcessorError::InvalidRequest { code: None, message: text }),
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, email))]
    async fn create_account(&self, coach_id: Uuid, email: &str) -> Result<MerchantAccount, ProcessorError> {
        let form = params(&[
            ("type", "express".to_string()),
            ("email", email.to_string()),
            ("capabilities[card_payments][requested]", "true".to_string()),
            ("capabilities[transfers][requested]", "true".to_string()),
            ("metadata[coach_id]", coach_id.to_string()),
        ]);
        let account: AccountResponse = self.send(self.client.post(self.url("accounts")).form(&form)).await?;
        debug!(account_id = %account.id, "Express account created");
        Ok(MerchantAccount {
            id: account.id,
            charges_enabled: account.charges_enabled,
            details_submitted: account.details_submitted,
        })
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError> {
        let _: serde_json::Value = self
            .send(self.client.delete(self.url(&format!("accounts/{}", account_id))))
            .await?;
        Ok(())
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError> {
        let form = params(&[
            ("account", account_id.to_string()),
            ("refresh_url", refresh_url.to_string()),
            ("return_url", return_url.to_string()),
            ("type", "account_onboarding".to_string()),
        ]);
        let link: AccountLinkResponse = self.send(self.client.post(self.url("account_links")).form(&form)).await?;
        Ok(link.url)
    }

    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, ProcessorError> {
        let account: AccountResponse = self
            .send(self.client.get(self.url(&format!("accounts/{}", account_id))))
            .await?;
        Ok(AccountStatus {
            charges_enabled: account.charges_enabled,
            details_submitted: account.details_submitted,
        })
    }

    #[instrument(skip(self, request), fields(booking_id = %request.booking_id))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        let mut form = params(&[
            ("mode", "payment".to_string()),
            ("client_reference_id", request.booking_id.to_string()),
            ("metadata[booking_id]", request.booking_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", request.amount.to_string()),
            ("line_items[0][price_data][product_data][name]", request.product_name.clone()),
            ("payment_intent_data[application_fee_amount]", request.application_fee.to_string()),
            ("payment_intent_data[transfer_data][destination]", request.destination_account.clone()),
            ("payment_intent_data[metadata][booking_id]", request.booking_id.to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
        ]);
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        let session: SessionResponse = self
            .send(
                self.client
                    .post(self.url("checkout/sessions"))
                    .header("Idempotency-Key", format!("checkout-{}", request.booking_id))
                    .form(&form),
            )
            .await?;
        let url = session.url.ok_or_else(|| ProcessorError::InvalidRequest {
            code: None,
            message: "checkout session has no url".to_string(),
        })?;
        Ok(CheckoutSession { id: session.id, url })
    }

    async fn retrieve_charge(&self, payment_intent_id: &str) -> Result<Option<Charge>, ProcessorError> {
        let list: ChargeList = self
            .send(
                self.client
                    .get(self.url("charges"))
                    .query(&[("payment_intent", payment_intent_id), ("limit", "1")]),
            )
            .await?;
        Ok(list.data.into_iter().next().map(|c| Charge {
            payment_intent_id: c.payment_intent.unwrap_or_else(|| payment_intent_id.to_string()),
            id: c.id,
            amount: c.amount,
            refunded: c.refunded,
        }))
    }

    #[instrument(skip(self))]
    async fn refund_charge(&self, charge_id: &str, idempotency_key: &str) -> Result<Refund, ProcessorError> {
        let form = params(&[
            ("charge", charge_id.to_string()),
            ("reverse_transfer", "true".to_string()),
            ("refund_application_fee", "true".to_string()),
        ]);
        let refund: RefundResponse = self
            .send(
                self.client
                    .post(self.url("refunds"))
                    .header("Idempotency-Key", idempotency_key)
                    .form(&form),
            )
            .await?;
        Ok(Refund {
            id: refund.id,
            charge_id: refund.charge.unwrap_or_else(|| charge_id.to_string()),
            amount: refund.amount,
        })
    }
}
