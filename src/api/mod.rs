//! # Credit API client
//!
//! Typed access to the chat backend's credit, billing and redemption-code
//! endpoints, used by the `chat-augment` CLI. The DOM engine never calls it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let client = CreditClient::builder("https://chat.example.com/api/v1")
//!     .token(token)
//!     .build()?;
//! let logs = client.list_credit_logs(Some(1)).await?;
//! ```

pub mod client;
pub mod models;

pub use client::{error_detail, ApiError, CreditClient, CreditClientBuilder, CreditClientConfig};
pub use models::{
    CreateRedemptionCodes, CreatedCodes, CreditConfig, CreditLog, DeleteLogsResponse, ModelPrices,
    Page, RedemptionCode, Statistics, TradeTicket, UpdateRedemptionCode,
};
