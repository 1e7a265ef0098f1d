//! Compiled rules
//!
//! The engine consumes rules that an external compiler already reduced to
//! a name, a priority, an optional agenda group, and a list of actions.
//! Actions receive the [`ActionContext`](crate::context::ActionContext)
//! and may re-enter the session.

use std::rc::Rc;

use crate::context::ActionContext;
use crate::errors::Result;

/// A rule action.
pub type ActionFn = Rc<dyn Fn(&mut ActionContext<'_, '_>) -> Result<()>>;

/// A compiled rule: metadata plus its actions. The conditions live in the
/// network the rule's terminal node hangs off.
pub struct RuleDefinition {
    name: Rc<str>,
    priority: i32,
    group: Option<Rc<str>>,
    actions: Vec<ActionFn>,
}

impl RuleDefinition {
    /// Create a rule with default priority 0 and no group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Rc::from(name.into()),
            priority: 0,
            group: None,
            actions: Vec::new(),
        }
    }

    /// Set the priority; higher fires first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Assign the rule to an agenda group for pop-time filtering.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(Rc::from(group.into()));
        self
    }

    /// Append an action; actions run in registration order on fire.
    pub fn action(
        mut self,
        action: impl Fn(&mut ActionContext<'_, '_>) -> Result<()> + 'static,
    ) -> Self {
        self.actions.push(Rc::new(action));
        self
    }

    /// Rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        self.name.clone()
    }

    /// Rule priority.
    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    /// Agenda group, if any.
    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub(crate) fn group_rc(&self) -> Option<Rc<str>> {
        self.group.clone()
    }

    /// The rule's actions.
    pub fn actions(&self) -> &[ActionFn] {
        &self.actions
    }
}

impl std::fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("group", &self.group)
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_metadata_and_actions() {
        let rule = RuleDefinition::new("escalate")
            .priority(10)
            .group("alerts")
            .action(|_| Ok(()))
            .action(|_| Ok(()));

        assert_eq!(rule.name(), "escalate");
        assert_eq!(rule.priority_value(), 10);
        assert_eq!(rule.group_name(), Some("alerts"));
        assert_eq!(rule.actions().len(), 2);
    }
}
