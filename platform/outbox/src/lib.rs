//! # Transactional Outbox / Inbox
//!
//! Reliability layer shared by every saga service. Business mutations and
//! the events they produce commit in one local transaction; a background
//! publisher drains the `outbox_events` table to the event bus, and the
//! `inbox_events` table makes consumption idempotent under at-least-once
//! redelivery.
//!
//! Every service owns identically-shaped `outbox_events` / `inbox_events`
//! tables in its own schema, so these helpers are table-name agnostic by
//! convention rather than parameterization.
//!
//! Outbox row lifecycle:
//!
//! ```text
//! PENDING --claim--> PROCESSING --ack--> SENT
//!    ^                   |
//!    +----requeue--------+   (publish failure, or stale claim after 30s)
//! ```

mod inbox;
mod outbox;
mod publisher;

pub use inbox::{inbox_seen, mark_inbox};
pub use outbox::{
    claim_outbox_batch, enqueue_event, mark_outbox_sent, requeue_outbox_event,
    update_outbox_backlog_metrics, ClaimedEvent,
};
pub use publisher::{run_outbox_publisher, PublisherConfig};
