pub mod config;
pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod message_id;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod sinks;
pub mod time;
pub mod validate;
pub mod worker;
