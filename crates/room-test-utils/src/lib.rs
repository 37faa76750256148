//! # Room Test Utilities
//!
//! Shared test utilities for the room session.
//!
//! This crate provides mock collaborators and fixtures so a full `Room` can
//! be driven in tests without a real transport engine or platform.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable transport engine that records every call
//! - `mock_platform` - Reachability monitor, audio handler and key provider
//! - `fixtures` - Participant/track/join-response builders and tokens
//! - `assertions` - Event stream and eventual-consistency helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockEngine::builder()
//!         .join_response(join_response("RM_1", TestParticipant::new("me").build(), vec![]))
//!         .build();
//!     let room = Room::builder(engine.clone()).build();
//!     let mut events = room.events();
//!
//!     room.connect(TEST_URL, test_token(), ConnectOptions::default()).await.unwrap();
//!     expect_event(&mut events, "connected").await;
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_engine;
pub mod mock_platform;

// Re-export commonly used items
pub use assertions::*;
pub use fixtures::*;
pub use mock_engine::*;
pub use mock_platform::*;
