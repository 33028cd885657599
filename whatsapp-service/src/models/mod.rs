//! Domain models for whatsapp-service.

mod client;
mod conversation;
mod invoice;
mod organization;

pub use client::Client;
pub use conversation::{ClientRef, ConversationRow, ConversationState, DraftItem};
pub use invoice::{CreatedInvoice, Invoice, InvoiceItem, InvoiceStatus};
pub use organization::Organization;
