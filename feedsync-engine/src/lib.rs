//! Client-side feed synchronization: the cached feed, uploads with
//! attachments, push-driven refreshes and the single shared audio player.

pub mod config;
pub mod error;
pub mod feed;
pub mod playback;
pub mod realtime;
pub mod upload;

#[cfg(test)]
mod testing;
