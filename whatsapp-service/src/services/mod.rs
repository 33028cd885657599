pub mod database;
pub mod flow;
pub mod metrics;
pub mod numbering;
pub mod providers;
pub mod renderer;
pub mod totals;

pub use database::Database;
pub use flow::{handle_incoming_message, FlowSettings, InboundMessage, TurnOutcome};
pub use providers::{Channel, MessageGateway, MessagingProvider};
pub use renderer::{DocumentRenderer, HtmlRenderer};
