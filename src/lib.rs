//! # rota
//!
//! Lets any number of independent workers share one periodic job. Exactly
//! one worker runs it at a time, workers take turns in registration order,
//! and a worker that dies holding the turn is eventually worked around. All
//! coordination goes through a single transactional document; workers never
//! talk to each other.
//!
//! Also provides a durable seen set so items discovered by the job are not
//! acted on twice across runs.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod job;
pub mod model;
pub mod poller;
pub mod registry;
pub mod store;
pub mod telemetry;
