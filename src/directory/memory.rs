//! Directory backed by a JSON seed held in memory.
//!
//! Used by the CLI and by the integration tests. Positions in the seed are
//! mapped to roles with the configured [`RoleMap`].

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::{
    AssetDirectory, AssetSummary, DepartmentInfo, DetailRow, DirectoryError, IdentityDirectory,
    LocationDirectory, Recipient, RecapRow, ReportDataSource, SiteInfo, UserProfile,
};
use crate::auth::{Role, RoleMap};
use crate::models::{AssetBaseline, Location};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectorySeed {
    #[serde(default)]
    pub sites: Vec<SiteInfo>,
    #[serde(default)]
    pub departments: Vec<DepartmentSeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub assets: Vec<AssetSeed>,
    /// Report rows keyed by session id
    #[serde(default)]
    pub reports: HashMap<i64, ReportSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepartmentSeed {
    pub id: i64,
    pub name: String,
    pub site_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSeed {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub position: String,
    /// Site the user belongs to; area managers manage this site
    #[serde(default)]
    pub site_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetSeed {
    pub asset_tag: String,
    pub name: String,
    #[serde(default)]
    pub site_id: Option<i64>,
    #[serde(default)]
    pub dept_id: Option<i64>,
    #[serde(default)]
    pub baseline: AssetBaseline,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSeed {
    #[serde(default)]
    pub recap: Vec<RecapRow>,
    #[serde(default)]
    pub details: Vec<DetailRow>,
}

#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    seed: DirectorySeed,
    roles: RoleMap,
}

impl InMemoryDirectory {
    pub fn new(seed: DirectorySeed, roles: RoleMap) -> Result<Self, DirectoryError> {
        for dept in &seed.departments {
            if !seed.sites.iter().any(|s| s.id == dept.site_id) {
                return Err(DirectoryError::InvalidData(format!(
                    "department {} references unknown site {}",
                    dept.id, dept.site_id
                )));
            }
        }
        for asset in &seed.assets {
            if Location::from_ids(asset.site_id, asset.dept_id).is_err() {
                return Err(DirectoryError::InvalidData(format!(
                    "asset {} must belong to exactly one site or department",
                    asset.asset_tag
                )));
            }
        }
        Ok(Self { seed, roles })
    }

    pub fn from_json(json: &str, roles: RoleMap) -> Result<Self, DirectoryError> {
        let seed: DirectorySeed =
            serde_json::from_str(json).map_err(|e| DirectoryError::InvalidData(e.to_string()))?;
        Self::new(seed, roles)
    }

    pub async fn from_file(path: &Path, roles: RoleMap) -> Result<Self, DirectoryError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            DirectoryError::Unavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let directory = Self::from_json(&json, roles)?;
        info!(
            path = %path.display(),
            sites = directory.seed.sites.len(),
            users = directory.seed.users.len(),
            assets = directory.seed.assets.len(),
            "Loaded directory seed"
        );
        Ok(directory)
    }

    fn role_of(&self, user: &UserSeed) -> Role {
        self.roles.resolve(&user.position)
    }

    fn recipient(user: &UserSeed) -> Recipient {
        Recipient {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[async_trait]
impl LocationDirectory for InMemoryDirectory {
    async fn resolve_site(&self, site_id: i64) -> Result<SiteInfo, DirectoryError> {
        self.seed
            .sites
            .iter()
            .find(|s| s.id == site_id)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found("site", site_id))
    }

    async fn resolve_department(&self, dept_id: i64) -> Result<DepartmentInfo, DirectoryError> {
        let dept = self
            .seed
            .departments
            .iter()
            .find(|d| d.id == dept_id)
            .ok_or_else(|| DirectoryError::not_found("department", dept_id))?;
        let site = self.resolve_site(dept.site_id).await?;
        Ok(DepartmentInfo {
            id: dept.id,
            name: dept.name.clone(),
            site_id: site.id,
            site_name: site.name,
        })
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn get_user(&self, user_id: i64) -> Result<UserProfile, DirectoryError> {
        let user = self
            .seed
            .users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| DirectoryError::not_found("user", user_id))?;
        Ok(UserProfile {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            position: user.position.clone(),
            role: self.role_of(user),
        })
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<Recipient>, DirectoryError> {
        let mut users: Vec<Recipient> = self
            .seed
            .users
            .iter()
            .filter(|u| self.role_of(u) == role)
            .map(Self::recipient)
            .collect();
        users.sort_by_key(|u| u.id);
        debug!(role = %role, count = users.len(), "Listed users by role");
        Ok(users)
    }

    async fn area_manager_for(&self, site_id: i64) -> Result<Option<Recipient>, DirectoryError> {
        Ok(self
            .seed
            .users
            .iter()
            .filter(|u| u.site_id == Some(site_id) && self.role_of(u) == Role::AreaManager)
            .min_by_key(|u| u.id)
            .map(Self::recipient))
    }
}

#[async_trait]
impl AssetDirectory for InMemoryDirectory {
    async fn get_asset(&self, asset_tag: &str) -> Result<Option<AssetBaseline>, DirectoryError> {
        Ok(self
            .seed
            .assets
            .iter()
            .find(|a| a.asset_tag == asset_tag)
            .map(|a| a.baseline.clone()))
    }

    async fn assets_at_location(
        &self,
        location: Location,
    ) -> Result<Vec<AssetSummary>, DirectoryError> {
        Ok(self
            .seed
            .assets
            .iter()
            .filter(|a| a.site_id == location.site_id() && a.dept_id == location.dept_id())
            .map(|a| AssetSummary {
                asset_tag: a.asset_tag.clone(),
                name: a.name.clone(),
                serial_number: a.baseline.serial_number.clone(),
                room: a.baseline.room.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ReportDataSource for InMemoryDirectory {
    async fn recap_rows(&self, session_id: i64) -> Result<Vec<RecapRow>, DirectoryError> {
        Ok(self
            .seed
            .reports
            .get(&session_id)
            .map(|r| r.recap.clone())
            .unwrap_or_default())
    }

    async fn detail_rows(&self, session_id: i64) -> Result<Vec<DetailRow>, DirectoryError> {
        Ok(self
            .seed
            .reports
            .get(&session_id)
            .map(|r| r.details.clone())
            .unwrap_or_default())
    }
}
