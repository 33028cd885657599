//! whatsapp-service: conversational invoice creation over WhatsApp and Messenger.
//!
//! An inbound chat message drives a persisted per-conversation wizard
//! (client lookup, item entry, dates, confirmation) that ends with an invoice
//! being created, rendered and delivered back through the originating channel.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
