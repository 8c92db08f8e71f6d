//! Committed protocol bindings for the pub/sub wire surface.
//!
//! Generated from `proto/pubsub.proto` with prost-build/tonic-build and
//! checked in, so builds need neither `protoc` nor a `build.rs`. Keep
//! `pubsub.v1.rs` in sync with the `.proto` file when the schema changes.

pub mod pubsub {
    pub mod v1 {
        include!("pubsub.v1.rs");
    }
}
