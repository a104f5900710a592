//! Transport plumbing shared by the attendance client: the backend's JSON
//! envelope over HTTP, and the multiplexed WebSocket channel.

pub mod http;
pub mod ws;
