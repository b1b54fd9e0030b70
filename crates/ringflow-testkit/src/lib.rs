//! # Ringflow Testkit
//!
//! Testing utilities for ringflow.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a temporary shared root with a ring's namespaces set up
//! - **Evaluators**: scripted, recording, failing and slow predicate stand-ins
//! - **Faulty store**: a [`PacketStore`](ringflow_store::PacketStore) wrapper
//!   that injects delivery and storage failures
//! - **Generators**: proptest strategies for peers, rings and packets
//! - **Wire vectors**: packet files as other ring participants write them
//!
//! ## Wire Vectors
//!
//! ```rust
//! use ringflow_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for vector in all_vectors() {
//!     println!("{}: {:?}", vector.name, vector.expected());
//! }
//! assert!(verify_all_vectors().is_ok());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use ringflow_testkit::generators::packet;
//!
//! proptest! {
//!     #[test]
//!     fn packets_are_valid(p in packet()) {
//!         prop_assert!(p.validate().is_ok());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use ringflow_testkit::fixtures::RingFixture;
//!
//! let fixture = RingFixture::new(&["alice", "bob"]);
//! let store = fixture.fs_store();
//! assert_eq!(fixture.ring().len(), 2);
//! ```

pub mod evaluators;
pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use evaluators::{FailingEvaluator, RecordingEvaluator, ScriptedEvaluator, SlowEvaluator};
pub use faulty::FaultyStore;
pub use fixtures::{claim, name, peer, ring, RingFixture};
pub use vectors::{all_vectors, corrupt_vectors, verify_all_vectors, WireVector};
