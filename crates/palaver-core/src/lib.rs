//! Provider abstraction and streaming orchestration for Palaver.
//!
//! This crate is the gateway core: the [`ChatAdapter`] capability trait
//! concrete providers implement, the [`ProviderRegistry`] that routes
//! requests to adapters, the [`Dispatcher`] that applies timeout, retry
//! and cancellation policy uniformly, and the [`AggregatingStream`] that
//! folds a live event stream into a final response. It depends only on
//! `palaver-types` and async plumbing -- never on any provider crate.
//!
//! [`ChatAdapter`]: adapter::ChatAdapter
//! [`ProviderRegistry`]: registry::ProviderRegistry
//! [`Dispatcher`]: dispatch::Dispatcher
//! [`AggregatingStream`]: aggregate::AggregatingStream

pub mod adapter;
pub mod aggregate;
pub mod box_adapter;
pub mod dispatch;
pub mod registry;

pub use adapter::{ChatAdapter, EventStream};
pub use aggregate::{AggregatingStream, collect_response};
pub use box_adapter::BoxChatAdapter;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use registry::{ProviderRegistry, RegistryBuilder};
