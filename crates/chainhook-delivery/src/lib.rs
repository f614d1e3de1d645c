//! chainhook-delivery: posts captured events to subscriber webhooks and
//! drives the retry state machine.

pub mod client;
pub mod worker;

pub use client::{HttpWebhookSender, WebhookBody, WebhookResponse, WebhookSender};
pub use worker::{DeliveryReport, DeliveryWorker, EventOutcome};
