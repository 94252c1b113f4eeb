//! TrackMyORDER support chat server.
//!
//! Customers chat with support staff about an order using only its tracking
//! identifier. Conversations are stored durably and every update is fanned
//! out over websockets to the conversation's room and to the admin
//! dashboard feed.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod ws;
