//! Stream hub
//!
//! Multiplexes run events to every subscriber of that run. Delivery is
//! non-blocking: each subscriber gets a bounded channel, and a
//! subscriber that falls behind is disconnected rather than ever
//! blocking the publisher. Sequence numbers are assigned under the
//! run's entry at publication time, so every subscriber observes the
//! same strictly increasing order.

pub mod hub;

pub use hub::{HubStats, StreamHub, Subscription};
