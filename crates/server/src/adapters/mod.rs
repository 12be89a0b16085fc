//! HTTP implementations of the pipeline's outbound collaborators.

pub mod escrow;
pub mod llm;
pub mod mailgun;

pub use escrow::HttpEscrowProvider;
pub use llm::OpenAiCompatibleGenerator;
pub use mailgun::{MailgunTransport, UnconfiguredTransport};
