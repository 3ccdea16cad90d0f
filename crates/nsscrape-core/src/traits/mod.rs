//! Core traits for the name-server scraper
//!
//! This module defines the boundaries the scraper talks across.
//!
//! - [`NameServerQuery`]: Fetch the observed NS records under a root domain
//! - [`ChangeNotifier`]: Receive the owner key of a drifted subdomain

pub mod query;
pub mod notifier;

pub use query::{NameServerQuery, NameServerQueryFactory, NameServerSet, NameServers};
pub use notifier::{
    ChangeNotifier, ChangeStream, ChannelNotifier, OwnerKey, notification_channel,
};
