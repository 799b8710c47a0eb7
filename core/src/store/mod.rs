// Store module — durable command queue

pub mod outbox;

pub use outbox::{CommandSender, FlushReport, Outbox, OutboxEntry, OutboxError};
