/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Job positions come from the identity directory as free text ("Area Manager",
 * "L1 Support", ...). They are normalized once, here, into the [`Role`] enum;
 * nothing else in the crate compares position strings.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::debug;

/// Role a user plays in the opname workflow.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// Regular staff; may run and cancel their own sessions.
    Staff,
    /// First approval tier for a site.
    AreaManager,
    /// Second approval tier; may also cancel any session.
    L1Support,
}

/// Mapping table from job positions to roles.
///
/// Positions are compared after trimming and lowercasing. Unknown positions
/// resolve to [`Role::Staff`].
#[derive(Debug, Clone)]
pub struct RoleMap {
    positions: HashMap<String, Role>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
        }
    }

    /// Builds a map from per-role position lists (as found in configuration).
    pub fn from_positions(
        area_manager_positions: &[String],
        l1_support_positions: &[String],
    ) -> Self {
        let mut map = Self::new();
        for position in area_manager_positions {
            map.insert(position, Role::AreaManager);
        }
        for position in l1_support_positions {
            map.insert(position, Role::L1Support);
        }
        map
    }

    pub fn insert(&mut self, position: &str, role: Role) {
        self.positions.insert(normalize_position(position), role);
    }

    /// Resolves a position string to a role.
    pub fn resolve(&self, position: &str) -> Role {
        let key = normalize_position(position);
        match self.positions.get(&key) {
            Some(role) => *role,
            None => {
                debug!(position = %position, "Position not mapped to a reviewer role");
                Role::Staff
            }
        }
    }

    /// Positions that resolve to the given role.
    pub fn positions_for(&self, role: Role) -> Vec<&str> {
        let mut positions: Vec<&str> = self
            .positions
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(p, _)| p.as_str())
            .collect();
        positions.sort_unstable();
        positions
    }
}

impl Default for RoleMap {
    fn default() -> Self {
        Self::from_positions(&["Area Manager".to_string()], &["L1 Support".to_string()])
    }
}

fn normalize_position(position: &str) -> String {
    position
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
