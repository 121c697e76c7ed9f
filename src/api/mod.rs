// Thorium API 模块

pub mod client;
pub mod hash;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ProgressCallback, ThoriumClient, TransferClient};
pub use types::{
    BulkReactionResponse, CarvedOrigin, Origin, PcapNetworkProtocol, PipelineSelection,
    ReactionOutcome, ReactionRequest, SampleRequest, SampleSubmissionResponse,
};
