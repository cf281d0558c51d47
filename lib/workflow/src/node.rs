//! Workflow node types and configurations.
//!
//! Nodes are the building blocks of collection workflows. Each node has:
//! - A unique ID within the workflow
//! - A kind (Trigger, Message, Wait, Condition, etc.)
//! - Configuration specific to its type
//!
//! Nodes carry data only, never behavior. Anything a node *does* happens in
//! the execution engine or behind the action adapter boundary.

use crate::condition::ConditionSpec;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("node_").unwrap_or(s);
        Ulid::from_str(raw).map(Self)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point that initiates workflow execution.
    Trigger,
    /// Sends a message to the debtor over a channel.
    Message,
    /// Suspends the execution for a fixed duration.
    Wait,
    /// Branches on a context variable comparison.
    Condition,
    /// Bounded repetition over a subgraph.
    Loop,
    /// Suspends until an inbound reply from the debtor arrives.
    WaitResponse,
    /// Hands the case off to a human operator queue.
    TransferToHuman,
    /// Updates the case status in the host CRM.
    UpdateStatus,
    /// Calls an external HTTP endpoint.
    CallWebhook,
    /// Delegates the conversation to the AI negotiation agent.
    AiNegotiate,
    /// Terminal node.
    EndFlow,
}

/// The domain event class a trigger node reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// An invoice crossed its overdue threshold.
    InvoiceOverdue,
    /// A payment agreement was broken.
    AgreementBroken,
    /// An external system posted to a webhook path.
    Webhook,
    /// Started by an operator.
    Manual,
}

impl TriggerKind {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceOverdue => "invoice_overdue",
            Self::AgreementBroken => "agreement_broken",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice_overdue" => Ok(Self::InvoiceOverdue),
            "agreement_broken" => Ok(Self::AgreementBroken),
            "webhook" => Ok(Self::Webhook),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger kind: {other}")),
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for trigger nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerNodeConfig {
    /// Fires when an invoice is this many days overdue.
    InvoiceOverdue {
        /// Days past the due date.
        days: u32,
    },
    /// Fires when a payment agreement is broken.
    AgreementBroken,
    /// Fires on an inbound webhook call.
    Webhook {
        /// The webhook path (e.g., "/hooks/acordo-quebrado").
        path: String,
    },
    /// Started manually by an operator.
    Manual,
}

impl TriggerNodeConfig {
    /// Returns the trigger kind this configuration reacts to.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::InvoiceOverdue { .. } => TriggerKind::InvoiceOverdue,
            Self::AgreementBroken => TriggerKind::AgreementBroken,
            Self::Webhook { .. } => TriggerKind::Webhook,
            Self::Manual => TriggerKind::Manual,
        }
    }
}

/// The channel a message node sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Whatsapp,
    Sms,
    Email,
}

impl MessageChannel {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// Configuration for message nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNodeConfig {
    /// The delivery channel.
    pub channel: MessageChannel,
    /// Message body with `{{variable}}` placeholders.
    pub template: String,
}

/// Configuration for wait (delay) nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WaitNodeConfig {
    /// Days to wait.
    #[serde(default)]
    pub days: u32,
    /// Hours to wait.
    #[serde(default)]
    pub hours: u32,
    /// Minutes to wait.
    #[serde(default)]
    pub minutes: u32,
}

impl WaitNodeConfig {
    /// Creates a wait of the given number of days.
    #[must_use]
    pub fn days(days: u32) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    /// Returns the total wait duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.days))
            + Duration::hours(i64::from(self.hours))
            + Duration::minutes(i64::from(self.minutes))
    }
}

/// Configuration for loop nodes.
///
/// A loop node bounds a cycle in the graph. The `yes` edge re-enters the loop
/// body; the `no` edge is the exit taken when the exit condition holds or the
/// iteration cap is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopNodeConfig {
    /// Hard cap on iterations. Reaching the cap forces the exit edge.
    pub max_iterations: u32,
    /// Optional early-exit condition evaluated against the context.
    #[serde(default)]
    pub exit_condition: Option<ConditionSpec>,
}

/// Configuration for wait-response nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WaitResponseNodeConfig {
    /// Context variable the inbound reply is stored under.
    #[serde(default)]
    pub capture_as: Option<String>,
}

impl WaitResponseNodeConfig {
    /// Returns the context key the reply is captured under.
    #[must_use]
    pub fn capture_key(&self) -> &str {
        self.capture_as.as_deref().unwrap_or("response")
    }
}

/// Configuration for transfer-to-human nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferNodeConfig {
    /// The operator queue receiving the case.
    pub queue: String,
    /// Optional note for the operator, with `{{variable}}` placeholders.
    #[serde(default)]
    pub note: Option<String>,
}

/// Configuration for status-update nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatusNodeConfig {
    /// The case status to set (e.g., "em_negociacao").
    pub new_status: String,
}

/// Configuration for webhook-call nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookNodeConfig {
    /// Target URL, with `{{variable}}` placeholders.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_webhook_method")]
    pub method: String,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

/// Configuration for AI negotiation nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiNegotiateNodeConfig {
    /// Negotiation instructions, with `{{variable}}` placeholders.
    pub instructions: String,
}

/// Configuration for a node, varying by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger node configuration.
    Trigger(TriggerNodeConfig),
    /// Message node configuration.
    Message(MessageNodeConfig),
    /// Wait node configuration.
    Wait(WaitNodeConfig),
    /// Condition node configuration.
    Condition(ConditionSpec),
    /// Loop node configuration.
    Loop(LoopNodeConfig),
    /// Wait-response node configuration.
    WaitResponse(WaitResponseNodeConfig),
    /// Transfer-to-human node configuration.
    TransferToHuman(TransferNodeConfig),
    /// Status-update node configuration.
    UpdateStatus(UpdateStatusNodeConfig),
    /// Webhook-call node configuration.
    CallWebhook(WebhookNodeConfig),
    /// AI negotiation node configuration.
    AiNegotiate(AiNegotiateNodeConfig),
    /// Terminal node.
    EndFlow,
}

impl NodeConfig {
    /// Returns the kind of this node configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger(_) => NodeKind::Trigger,
            Self::Message(_) => NodeKind::Message,
            Self::Wait(_) => NodeKind::Wait,
            Self::Condition(_) => NodeKind::Condition,
            Self::Loop(_) => NodeKind::Loop,
            Self::WaitResponse(_) => NodeKind::WaitResponse,
            Self::TransferToHuman(_) => NodeKind::TransferToHuman,
            Self::UpdateStatus(_) => NodeKind::UpdateStatus,
            Self::CallWebhook(_) => NodeKind::CallWebhook,
            Self::AiNegotiate(_) => NodeKind::AiNegotiate,
            Self::EndFlow => NodeKind::EndFlow,
        }
    }

    /// Returns true if this node performs an external side effect through an
    /// action adapter.
    #[must_use]
    pub fn is_effect(&self) -> bool {
        matches!(
            self,
            Self::Message(_)
                | Self::TransferToHuman(_)
                | Self::UpdateStatus(_)
                | Self::CallWebhook(_)
                | Self::AiNegotiate(_)
        )
    }

    /// Returns true if this node branches on a handle (condition or loop).
    #[must_use]
    pub fn is_branching(&self) -> bool {
        matches!(self, Self::Condition(_) | Self::Loop(_))
    }

    /// One-line human description, used by the simulator log.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Trigger(t) => format!("trigger: {}", t.kind()),
            Self::Message(m) => format!("send {} message: {}", m.channel.as_str(), m.template),
            Self::Wait(w) => format!(
                "wait {}d {}h {}m",
                w.days, w.hours, w.minutes
            ),
            Self::Condition(c) => format!("condition: {} {} {}", c.variable, c.operator, c.value),
            Self::Loop(l) => format!("loop: up to {} iterations", l.max_iterations),
            Self::WaitResponse(w) => format!("wait for response into '{}'", w.capture_key()),
            Self::TransferToHuman(t) => format!("transfer to queue '{}'", t.queue),
            Self::UpdateStatus(u) => format!("update status to '{}'", u.new_status),
            Self::CallWebhook(w) => format!("call webhook {} {}", w.method, w.url),
            Self::AiNegotiate(a) => format!("ai negotiation: {}", a.instructions),
            Self::EndFlow => "end of flow".to_string(),
        }
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// Node configuration (determines type and data).
    pub config: NodeConfig,
}

impl Node {
    /// Creates a new node with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            config,
        }
    }

    /// Creates a new node with a specific ID.
    #[must_use]
    pub fn with_id(id: NodeId, name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id,
            name: name.into(),
            config,
        }
    }

    /// Returns the kind of this node.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}
