//! Ghost Council advisory deliberator.
//!
//! A panel of weighted AI personas deliberates on proposals and serious
//! issues under the tri-perspective protocol, producing a weighted consensus
//! opinion with a content-addressed cache in front of it.

pub mod deliberation;
pub mod llm;
pub mod members;
pub mod sanitize;
pub mod service;

pub use deliberation::{
    CouncilOpinion, CouncilVote, PerspectiveAnalysis, PerspectiveType, Proposal, VoteChoice,
};
pub use llm::{LlmClient, LlmMessage, LlmResponse, MockLlm};
pub use members::{CouncilMember, CouncilProfile};
pub use service::{
    CouncilConfig, CouncilStats, GhostCouncil, IssueCategory, IssueSeverity, SeriousIssue,
};
