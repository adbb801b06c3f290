//! Request and response shapes for the credit REST endpoints.
//!
//! Monetary values are decimals on the server and arrive either as JSON
//! strings (`"1.50"`) or numbers depending on the endpoint; both are
//! accepted and held as `f64`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Number-or-string decimal deserialization.
pub(crate) mod decimal {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    fn convert<E: serde::de::Error>(raw: Raw) -> Result<f64, E> {
        match raw {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| E::custom(format!("invalid decimal {s:?}: {e}"))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        convert(Raw::deserialize(d)?)
    }

    pub fn option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Option::<Raw>::deserialize(d)?.map(convert).transpose()
    }
}

/// `GET /credit/config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditConfig {
    #[serde(rename = "CREDIT_EXCHANGE_RATIO", deserialize_with = "decimal::deserialize")]
    pub exchange_ratio: f64,
    #[serde(rename = "EZFP_PAY_PRIORITY", default)]
    pub pay_priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleModel {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiParams {
    #[serde(default)]
    pub model: SimpleModel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "decimal::option")]
    pub total_price: Option<f64>,
    #[serde(default, deserialize_with = "decimal::option")]
    pub prompt_unit_price: Option<f64>,
    #[serde(default, deserialize_with = "decimal::option")]
    pub completion_unit_price: Option<f64>,
    #[serde(default, deserialize_with = "decimal::option")]
    pub request_unit_price: Option<f64>,
    #[serde(default, deserialize_with = "decimal::option")]
    pub feature_price: Option<f64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditLogDetail {
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub api_params: ApiParams,
    #[serde(default)]
    pub usage: Usage,
}

/// One row of a user's credit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLog {
    pub id: String,
    pub user_id: String,
    #[serde(deserialize_with = "decimal::deserialize")]
    pub credit: f64,
    #[serde(default)]
    pub detail: CreditLogDetail,
    pub created_at: i64,
    /// Filled in by the admin listing only.
    #[serde(default)]
    pub username: Option<String>,
}

/// Paginated listing envelope used by admin endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: u64,
    pub results: Vec<T>,
}

/// `DELETE /credit/logs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteLogsResponse {
    pub affect_rows: u64,
}

/// A payment ticket opened with the payment provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTicket {
    pub id: String,
    pub user_id: String,
    #[serde(deserialize_with = "decimal::deserialize")]
    pub amount: f64,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub created_at: i64,
}

/// Per-model price table keyed by model id. Prices are free-form objects.
pub type ModelPrices = HashMap<String, serde_json::Value>;

/// Admin usage statistics. The chart payloads are passed through untouched.
pub type Statistics = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionCode {
    pub code: String,
    pub purpose: String,
    #[serde(deserialize_with = "decimal::deserialize")]
    pub amount: f64,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub expired_at: Option<i64>,
    #[serde(default)]
    pub received_at: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
}

/// `POST /credit/redemption_codes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRedemptionCodes {
    pub purpose: String,
    pub count: u32,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
}

impl CreateRedemptionCodes {
    /// Server-side limits, checked before sending.
    pub fn validate(&self) -> Result<(), String> {
        if self.purpose.is_empty() || self.purpose.chars().count() > 255 {
            return Err("purpose must be 1..=255 characters".into());
        }
        if !(1..=1000).contains(&self.count) {
            return Err("count must be between 1 and 1000".into());
        }
        if self.amount.is_nan() || self.amount <= 0.0 {
            return Err("amount must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCodes {
    pub total: u64,
}

/// `PUT /credit/redemption_codes/{code}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRedemptionCode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_accept_strings_and_numbers() {
        let log: CreditLog = serde_json::from_str(
            r#"{"id":"a","user_id":"u","credit":"12.50","created_at":1,
                "detail":{"desc":"chat","usage":{"total_price":0.25,"total_tokens":40}}}"#,
        )
        .unwrap();
        assert_eq!(log.credit, 12.5);
        assert_eq!(log.detail.usage.total_price, Some(0.25));
        assert_eq!(log.detail.usage.total_tokens, Some(40));
        assert_eq!(log.username, None);
    }

    #[test]
    fn malformed_decimal_is_rejected() {
        let err = serde_json::from_str::<TradeTicket>(
            r#"{"id":"t","user_id":"u","amount":"lots","created_at":1}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid decimal"));
    }

    #[test]
    fn config_uses_server_key_names() {
        let cfg: CreditConfig =
            serde_json::from_str(r#"{"CREDIT_EXCHANGE_RATIO":"1.0","EZFP_PAY_PRIORITY":"qrcode"}"#)
                .unwrap();
        assert_eq!(cfg.exchange_ratio, 1.0);
        assert_eq!(cfg.pay_priority, "qrcode");
    }

    #[test]
    fn update_form_omits_absent_fields() {
        let form = UpdateRedemptionCode {
            amount: Some(5.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&form).unwrap(), r#"{"amount":5.0}"#);
    }

    #[test]
    fn create_form_limits() {
        let mut form = CreateRedemptionCodes {
            purpose: "promo".into(),
            count: 10,
            amount: 1.0,
            expired_at: None,
        };
        assert!(form.validate().is_ok());
        form.count = 0;
        assert!(form.validate().is_err());
        form.count = 1;
        form.amount = 0.0;
        assert!(form.validate().is_err());
    }
}
