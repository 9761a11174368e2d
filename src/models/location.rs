use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ServiceError;

/// Where an opname session takes place: a whole site or one department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Site(i64),
    Department(i64),
}

impl Location {
    /// Builds a location from the nullable storage columns.
    /// Exactly one of the two ids must be present.
    pub fn from_ids(site_id: Option<i64>, dept_id: Option<i64>) -> Result<Self, ServiceError> {
        match (site_id, dept_id) {
            (Some(site), None) if site > 0 => Ok(Location::Site(site)),
            (None, Some(dept)) if dept > 0 => Ok(Location::Department(dept)),
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "either site_id or dept_id must be provided, not both".to_string(),
            )),
            (None, None) => Err(ServiceError::ValidationError(
                "either site_id or dept_id must be provided".to_string(),
            )),
            _ => Err(ServiceError::ValidationError(
                "location id must be positive".to_string(),
            )),
        }
    }

    pub fn site_id(&self) -> Option<i64> {
        match self {
            Location::Site(id) => Some(*id),
            Location::Department(_) => None,
        }
    }

    pub fn dept_id(&self) -> Option<i64> {
        match self {
            Location::Department(id) => Some(*id),
            Location::Site(_) => None,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Location::Site(id) | Location::Department(id) => *id,
        }
    }

    /// Path segment used by the frontend ("site" or "department").
    pub fn kind(&self) -> &'static str {
        match self {
            Location::Site(_) => "site",
            Location::Department(_) => "department",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn exactly_one_id_is_accepted() {
        assert_eq!(Location::from_ids(Some(3), None).unwrap(), Location::Site(3));
        assert_eq!(
            Location::from_ids(None, Some(9)).unwrap(),
            Location::Department(9)
        );
        assert_matches!(
            Location::from_ids(Some(3), Some(9)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            Location::from_ids(None, None),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            Location::from_ids(Some(0), None),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn accessors() {
        let dept = Location::Department(4);
        assert_eq!(dept.site_id(), None);
        assert_eq!(dept.dept_id(), Some(4));
        assert_eq!(dept.to_string(), "department 4");
        assert_eq!(Location::Site(2).kind(), "site");
    }
}
