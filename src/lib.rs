//! promoctl - serialized Promotion scheduling for GitOps Stages
//!
//! Promotions request that a Stage adopt a new state. At most one
//! Promotion runs per Stage at a time; the rest wait in creation order.

pub mod api;
pub mod charts;
pub mod cli;
pub mod controller;
pub mod observability;
pub mod scheduling;
pub mod store;
pub mod workqueue;
