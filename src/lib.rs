//! Real-time sync core for a unified WhatsApp / Instagram / Gmail inbox.
//!
//! Channel proxies are reached through [`api::adapter::ChannelAdapter`],
//! records are normalized by [`mapper::Mapper`], and [`store::Store`]
//! reconciles full refreshes, live events and optimistic sends. The
//! [`sync::Inbox`] loop ties them together.

pub mod api;
pub mod app;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod store;
pub mod sync;
pub mod utils;
