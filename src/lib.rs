//! # wound-stream-backend
//!
//! Real-time media-analysis gateway. A browser-class client negotiates a
//! WebRTC peer connection over `POST /offer`; the server consumes its video
//! and audio tracks through per-session pipelines, locates wounds in video
//! frames via a remote inference service (with an optional local fallback),
//! scores speech windows acoustically, and streams structured detection
//! events back over the `detections` data channel.
//!
//! Nothing is persisted: the process holds only in-flight session state,
//! and a restart drops every live session.
//!
//! ## Module Map:
//! - **config / state / error / health / middleware**: HTTP service shell
//! - **signaling / rtc**: the `/offer` route and the opaque WebRTC seams
//! - **stream**: buffers, session counters, processors, orchestrator
//! - **media / inference / audio**: frame preprocessing, detection
//!   dispatch, acoustic analysis

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod inference;
pub mod loader;
pub mod media;
pub mod middleware;
pub mod rtc;
pub mod signaling;
pub mod state;
pub mod stream;
