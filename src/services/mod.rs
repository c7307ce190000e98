//! Desktop network services.
//!
//! The firmware core only needs something implementing
//! [`MqttClient`](crate::traits::MqttClient). On desktop that is
//! [`RumqttcClient`], which drives a `rumqttc` event loop on a tokio runtime
//! and hands inbound frames to the synchronous supervisor loop through a
//! channel.
//!
//! ```ignore
//! use relay_bank::config::MqttConfig;
//! use relay_bank::services::RumqttcClient;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let client = RumqttcClient::new(&MqttConfig::default(), runtime.handle().clone());
//! ```

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::*;
