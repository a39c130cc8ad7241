pub mod interaction;
pub mod message;
pub mod session;

pub use interaction::{
    EventLimits, Interaction, InteractionEvent, InteractionType, NewInteraction, TimeRange,
};
pub use message::{
    Delivery, InteractionMessage, MessageAction, OutboundMessage, SessionEventMessage,
    SessionEventType, Topic,
};
pub use session::{LifecycleTransition, NewSession, ParticipantRole, Session, SessionStatus};
