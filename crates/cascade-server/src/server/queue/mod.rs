//! In-process partitioned queue transport decoupling ingress from workers.
//!
//! ## Structure
//!
//! - [`broker`] - key-affine publisher and per-partition receivers.

pub mod broker;
