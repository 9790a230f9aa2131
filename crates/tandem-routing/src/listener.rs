//! A listener: an ordered rule list plus a default action.

use serde::{Deserialize, Serialize};
use tandem_core::TargetGroupId;
use tracing::debug;

use crate::error::{RoutingError, RoutingResult};
use crate::ipset::IpSet;
use crate::rule::{Action, Decision, ListenerRule, Predicate, RequestInfo, DENY_STATUS};

/// Priority of the allow rule on a restricted listener.
const ALLOW_RULE_PRIORITY: u32 = 1;

/// Deserialized listeners pass through [`ListenerBuilder::build`], so a
/// stored or submitted listener is held to the same rules as a built one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ListenerFields")]
pub struct Listener {
    name: String,
    /// Sorted by ascending priority; priorities are unique.
    rules: Vec<ListenerRule>,
    default_action: Action,
    /// Restricted listeners must keep a deny default.
    restricted: bool,
}

impl Listener {
    pub fn builder(name: &str) -> ListenerBuilder {
        ListenerBuilder {
            name: name.to_string(),
            rules: Vec::new(),
            default_action: None,
            restricted: false,
        }
    }

    /// Allow-list listener: sources in `allow` reach `target`, everyone
    /// else gets the fixed deny.
    pub fn restricted(name: &str, allow: IpSet, target: TargetGroupId) -> RoutingResult<Self> {
        Self::builder(name)
            .restricted()
            .rule(ListenerRule {
                priority: ALLOW_RULE_PRIORITY,
                predicate: Predicate::SourceIp(allow),
                action: Action::forward(target),
            })
            .default_action(Action::deny())
            .build()
    }

    /// Unrestricted listener forwarding everything to `live`.
    pub fn open(name: &str, live: TargetGroupId) -> RoutingResult<Self> {
        Self::builder(name).default_action(Action::forward(live)).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[ListenerRule] {
        &self.rules
    }

    pub fn default_action(&self) -> &Action {
        &self.default_action
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Target of the default action, when it forwards.
    pub fn default_target(&self) -> Option<&TargetGroupId> {
        self.default_action.target()
    }

    /// First matching rule in priority order wins; otherwise the default.
    pub fn evaluate(&self, req: &RequestInfo) -> Decision {
        for rule in &self.rules {
            if rule.predicate.matches(req) {
                debug!(listener = %self.name, priority = rule.priority, "rule matched");
                return Decision {
                    action: rule.action.clone(),
                    matched_priority: Some(rule.priority),
                };
            }
        }
        Decision {
            action: self.default_action.clone(),
            matched_priority: None,
        }
    }

    /// Point the default at a different target group. Only valid on an
    /// open listener whose default already forwards.
    pub(crate) fn with_default_target(&self, target: TargetGroupId) -> RoutingResult<Self> {
        if self.restricted || self.default_target().is_none() {
            return Err(RoutingError::DefaultNotForwarding(self.name.clone()));
        }
        Ok(Self {
            default_action: Action::forward(target),
            ..self.clone()
        })
    }
}

#[derive(Deserialize)]
struct ListenerFields {
    name: String,
    rules: Vec<ListenerRule>,
    default_action: Action,
    #[serde(default)]
    restricted: bool,
}

impl TryFrom<ListenerFields> for Listener {
    type Error = RoutingError;

    fn try_from(fields: ListenerFields) -> RoutingResult<Self> {
        let builder = fields
            .rules
            .into_iter()
            .fold(Listener::builder(&fields.name), ListenerBuilder::rule)
            .default_action(fields.default_action);
        if fields.restricted {
            builder.restricted().build()
        } else {
            builder.build()
        }
    }
}

pub struct ListenerBuilder {
    name: String,
    rules: Vec<ListenerRule>,
    default_action: Option<Action>,
    restricted: bool,
}

impl ListenerBuilder {
    pub fn rule(mut self, rule: ListenerRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn default_action(mut self, action: Action) -> Self {
        self.default_action = Some(action);
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn build(self) -> RoutingResult<Listener> {
        let name = self.name;
        let default_action = self
            .default_action
            .ok_or_else(|| RoutingError::MissingDefault(name.clone()))?;
        validate_action(&name, &default_action)?;

        if self.restricted {
            match &default_action {
                Action::FixedResponse { status, .. } if *status == DENY_STATUS => {}
                _ => {
                    return Err(RoutingError::InvalidRule {
                        listener: name,
                        reason: "restricted listener must deny by default".to_string(),
                    });
                }
            }
        }

        let mut rules = self.rules;
        rules.sort_by_key(|r| r.priority);
        for pair in rules.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(RoutingError::DuplicatePriority {
                    listener: name,
                    priority: pair[0].priority,
                });
            }
        }
        for rule in &rules {
            if let Predicate::PathPrefix(prefix) = &rule.predicate {
                if !prefix.starts_with('/') {
                    return Err(RoutingError::InvalidRule {
                        listener: name,
                        reason: format!("path prefix '{prefix}' must start with '/'"),
                    });
                }
            }
            validate_action(&name, &rule.action)?;
        }

        Ok(Listener {
            name,
            rules,
            default_action,
            restricted: self.restricted,
        })
    }
}

fn validate_action(listener: &str, action: &Action) -> RoutingResult<()> {
    match action {
        Action::Forward { target } if target.as_str().is_empty() => Err(RoutingError::InvalidRule {
            listener: listener.to_string(),
            reason: "forward target is empty".to_string(),
        }),
        Action::FixedResponse { status, .. } if !(100..=599).contains(status) => {
            Err(RoutingError::InvalidRule {
                listener: listener.to_string(),
                reason: format!("status {status} is not a valid HTTP status"),
            })
        }
        _ => Ok(()),
    }
}
