pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, ReplyFlow};
pub use states::{ReplyAction, ReplyContext, ReplyEvent, ReplyState, TransitionOutcome};
