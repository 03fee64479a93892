mod messages;

pub use messages::{
    AgentEvent, ContentBlock, Delta, PartialEvent, TurnContent, TurnMessage, UsageSummary,
};
