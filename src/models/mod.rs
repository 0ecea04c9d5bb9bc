//! Domain value types: events, rules, channels, alert envelopes.

pub mod alert;
pub mod channel;
pub mod event;
pub mod rule;

pub use alert::AlertEnvelope;
pub use channel::{AlertChannel, ChannelConfig, ChannelKind};
pub use event::{EventKind, ProgramEvent, Severity};
pub use rule::{AlertRule, ConditionOperator, FieldCondition, RateLimit};
