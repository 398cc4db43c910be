//! Asynchronous product update service.
//!
//! Producers post full product records over HTTP; the records are admitted
//! into a bounded queue without ever waiting, and a fixed pool of workers
//! applies them to an in-memory store that the query endpoint reads from.
//!
//! - [`queue`] is the bounded FIFO with non-blocking admission and an explicit
//!   close, turning overload into a rejection instead of a stalled request.
//! - [`worker`] runs the pool of consumers and its cancellation protocol.
//! - [`store`] holds the latest record per product behind sharded locks.
//! - [`product`] defines the record and validates inbound events.
//! - [`http`] maps the pipeline onto `POST /events` and `GET /products/:id`.
//! - [`service`] binds everything into one process and owns shutdown.
//! - [`config`] resolves settings from flags, environment and a TOML file.

pub mod config;
pub mod error;
pub mod http;
pub mod product;
pub mod queue;
pub mod service;
pub mod store;
pub mod worker;
