pub mod adapter;
pub mod audit;
pub mod client;
pub mod events;
pub mod live;
pub mod models;
