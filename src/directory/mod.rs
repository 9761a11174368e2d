/*!
 * # Directories
 *
 * Read-only views of data owned by other systems: sites and departments,
 * users and their positions, the asset register, and the report rows of a
 * session. Services depend on these traits only; [`memory::InMemoryDirectory`]
 * implements all of them from a JSON seed.
 */

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;
use crate::models::{AssetBaseline, Location};

pub use memory::{DirectorySeed, InMemoryDirectory};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("invalid directory data: {0}")]
    InvalidData(String),
}

impl DirectoryError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        DirectoryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: i64,
    pub name: String,
    /// Site group, e.g. a region or a business unit
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentInfo {
    pub id: i64,
    pub name: String,
    pub site_id: i64,
    pub site_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub position: String,
    pub role: Role,
}

impl UserProfile {
    pub fn recipient(&self) -> Recipient {
        Recipient {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Someone a notification can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// An asset expected at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub asset_tag: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

/// One aggregated line of the BAP recap table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecapRow {
    /// `working_assets`, `broken_assets`, `misplaced_assets` or `missing_assets`
    pub category: String,
    pub product_variety: String,
    pub asset_count: i64,
}

/// One asset line of the BAP attachment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRow {
    pub category: String,
    #[serde(default)]
    pub company: String,
    pub asset_tag: String,
    pub asset_name: String,
    #[serde(default)]
    pub equipments: Option<String>,
    #[serde(default)]
    pub user_name_and_position: String,
    #[serde(default)]
    pub asset_status: String,
    #[serde(default)]
    pub action_notes: Option<String>,
    #[serde(default)]
    pub cost_center_id: Option<i64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn resolve_site(&self, site_id: i64) -> Result<SiteInfo, DirectoryError>;

    async fn resolve_department(&self, dept_id: i64) -> Result<DepartmentInfo, DirectoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<UserProfile, DirectoryError>;

    /// Users holding `role`, ordered by id.
    async fn list_users_by_role(&self, role: Role) -> Result<Vec<Recipient>, DirectoryError>;

    /// Area manager responsible for a site, if one is assigned.
    async fn area_manager_for(&self, site_id: i64) -> Result<Option<Recipient>, DirectoryError>;
}

#[async_trait]
pub trait AssetDirectory: Send + Sync {
    /// Recorded state of an asset; `None` when the tag is unknown.
    async fn get_asset(&self, asset_tag: &str) -> Result<Option<AssetBaseline>, DirectoryError>;

    /// Assets registered at a location, in register order.
    async fn assets_at_location(
        &self,
        location: Location,
    ) -> Result<Vec<AssetSummary>, DirectoryError>;
}

/// Aggregated report rows for a session. The aggregation itself lives with
/// the data owner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportDataSource: Send + Sync {
    async fn recap_rows(&self, session_id: i64) -> Result<Vec<RecapRow>, DirectoryError>;

    async fn detail_rows(&self, session_id: i64) -> Result<Vec<DetailRow>, DirectoryError>;
}

/// Display name and group of a location, as printed on the report.
pub async fn describe_location(
    locations: &dyn LocationDirectory,
    location: Location,
) -> Result<(String, String), DirectoryError> {
    match location {
        Location::Site(id) => {
            let site = locations.resolve_site(id).await?;
            Ok((site.name, site.group))
        }
        Location::Department(id) => {
            let dept = locations.resolve_department(id).await?;
            Ok((dept.name, dept.site_name))
        }
    }
}

/// Site whose area manager reviews sessions at `location`.
pub async fn owning_site(
    locations: &dyn LocationDirectory,
    location: Location,
) -> Result<i64, DirectoryError> {
    match location {
        Location::Site(id) => Ok(id),
        Location::Department(id) => Ok(locations.resolve_department(id).await?.site_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn department_reports_under_parent_site() {
        let mut locations = MockLocationDirectory::new();
        locations
            .expect_resolve_department()
            .with(eq(8))
            .returning(|id| {
                Ok(DepartmentInfo {
                    id,
                    name: "Finance".into(),
                    site_id: 2,
                    site_name: "Head Office Jakarta".into(),
                })
            });

        let (name, group) = describe_location(&locations, Location::Department(8))
            .await
            .unwrap();
        assert_eq!(name, "Finance");
        assert_eq!(group, "Head Office Jakarta");
        assert_eq!(
            owning_site(&locations, Location::Department(8)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn site_lookup_errors_propagate() {
        let mut locations = MockLocationDirectory::new();
        locations
            .expect_resolve_site()
            .returning(|id| Err(DirectoryError::not_found("site", id)));

        let err = describe_location(&locations, Location::Site(5))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "site 5 not found");
        assert_eq!(owning_site(&locations, Location::Site(5)).await.unwrap(), 5);
    }
}
