//! Adapters to the outside world.
//!
//! - Schedule fetching from the airport site (`AirportScheduleClient`)
//! - HTML schedule parsing (`parse_schedule`)
//! - Discord webhook delivery (`DiscordWebhook`)

pub mod discord;
pub mod message;
pub mod parse;
pub mod schedule;

pub use discord::{DiscordWebhook, LogNotifier, Notifier};
pub use parse::parse_schedule;
pub use schedule::{AirportScheduleClient, ScheduleSource};
