//! Tutorbot — conversation orchestrator for a tutoring practice.
//!
//! Runs inside the webhook handler of the customer-messaging platform:
//! every inbound message is classified, routed by its stored pending
//! intent, and answered by one of the flow handlers. All durable state
//! lives in the platform's contact/conversation attribute maps.

pub mod analysis;
pub mod calendar;
pub mod config;
pub mod dedup;
pub mod error;
pub mod flows;
pub mod guard;
pub mod i18n;
pub mod menu;
pub mod payments;
pub mod platform;
pub mod segment;
pub mod server;
pub mod signature;
pub mod slots;
pub mod state;
