//! Message-level building blocks: topics, payload codec, envelopes, client ids
//!
//! Everything here is pure and synchronous apart from [`Envelope::send`],
//! which hands the envelope to a [`crate::ConnectionFactory`].

pub mod client_id;
pub mod codec;
pub mod envelope;
pub mod topics;

pub use codec::Payload;
pub use envelope::{Envelope, EnvelopeError};
pub use topics::{topic_matches, validate_publish_topic, validate_subscribe_topic, TopicError};
