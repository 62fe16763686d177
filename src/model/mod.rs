//! Shared data model and key schema (C9): canonical key formats and the
//! entity shapes every other subsystem reads or writes.

pub mod job_history;
pub mod key;
pub mod provider;
pub mod provider_title;
pub mod title;
pub mod title_stream;

pub use job_history::{JobHistory, JobStatus};
pub use key::{
    episode_stream_id, is_valid_stream_id, parse_episode_stream_id, parse_title_key, title_key,
    ContentType, MAIN_STREAM_ID,
};
pub use provider::{ApiRate, Provider, ProviderType};
pub use provider_title::ProviderTitle;
pub use title::{EpisodeDescriptor, Title};
pub use title_stream::TitleStream;
