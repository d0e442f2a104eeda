use std::future::Future;

use tracing::{debug, warn};

use crate::error::RouterError;

pub const AUTO_GROUP: &str = "auto";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupSelector {
    Explicit(String),
    /// Try each configured auto group in order.
    Auto,
}

impl GroupSelector {
    pub fn parse(group: &str) -> Self {
        if group == AUTO_GROUP {
            GroupSelector::Auto
        } else {
            GroupSelector::Explicit(group.to_string())
        }
    }
}

impl From<&str> for GroupSelector {
    fn from(group: &str) -> Self {
        Self::parse(group)
    }
}

/// Expands the `auto` pseudo-group into the configured group list.
#[derive(Clone, Debug, Default)]
pub struct AutoGroupResolver {
    groups: Vec<String>,
}

impl AutoGroupResolver {
    pub fn new(groups: Vec<String>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Runs `attempt` against the concrete group(s) behind `selector` and
    /// returns the first success with the group that produced it.
    ///
    /// In auto mode a failing group is logged and the next one tried; only
    /// when every group fails does the caller see `NotFound`.
    pub async fn resolve<T, F, Fut>(
        &self,
        selector: &GroupSelector,
        model: &str,
        mut attempt: F,
    ) -> Result<(T, String), RouterError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RouterError>>,
    {
        let groups = match selector {
            GroupSelector::Explicit(group) => {
                let found = attempt(group.clone()).await?;
                return Ok((found, group.clone()));
            }
            GroupSelector::Auto => &self.groups,
        };
        if groups.is_empty() {
            return Err(RouterError::AutoGroupsNotConfigured);
        }
        for group in groups {
            match attempt(group.clone()).await {
                Ok(found) => {
                    debug!(group = %group, model, "auto group resolved");
                    return Ok((found, group.clone()));
                }
                Err(err) if err.is_not_found() => {
                    debug!(group = %group, model, "no channel in auto group, trying next");
                }
                Err(err) => {
                    warn!(group = %group, model, error = %err, "auto group lookup failed, trying next");
                }
            }
        }
        Err(RouterError::not_found(AUTO_GROUP, model))
    }
}
