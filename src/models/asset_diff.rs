//! Sparse per-asset diffs.
//!
//! An [`AssetDiff`] holds only the fields a scanner changed; a field that is
//! `None` means "same as the recorded baseline". [`AssetBaseline`] carries the
//! same field set as recorded in the asset register, where `None` means the
//! register has no value.

use serde::{Deserialize, Serialize};

macro_rules! asset_fields {
    ($($field:ident: $ty:ty),+ $(,)?) => {
        /// Fields changed during a scan. Absent fields are unchanged.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct AssetDiff {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        /// Recorded state of an asset in the register.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct AssetBaseline {
            $(
                #[serde(default)]
                pub $field: Option<$ty>,
            )+
        }

        impl AssetDiff {
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())+
            }

            /// Fields set in `self` whose value differs from `state`.
            pub fn changes_from(&self, state: &AssetBaseline) -> AssetDiff {
                AssetDiff {
                    $(
                        $field: match &self.$field {
                            Some(value) if state.$field.as_ref() != Some(value) => {
                                Some(value.clone())
                            }
                            _ => None,
                        },
                    )+
                }
            }

            /// Field-wise union; values from `newer` win.
            pub fn merge(&self, newer: &AssetDiff) -> AssetDiff {
                AssetDiff {
                    $(
                        $field: newer.$field.clone().or_else(|| self.$field.clone()),
                    )+
                }
            }

            /// Names of the fields carried by this diff, in declaration order.
            pub fn field_names(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.$field.is_some() {
                        names.push(stringify!($field));
                    }
                )+
                names
            }
        }

        impl AssetBaseline {
            /// The asset as it currently stands: baseline with `diff` applied.
            pub fn overlay(&self, diff: &AssetDiff) -> AssetBaseline {
                AssetBaseline {
                    $(
                        $field: diff.$field.clone().or_else(|| self.$field.clone()),
                    )+
                }
            }
        }
    };
}

asset_fields! {
    status: String,
    status_reason: String,
    serial_number: String,
    condition: bool,
    condition_notes: String,
    condition_photo_url: String,
    loss_notes: String,
    location: String,
    room: String,
    equipments: String,
    owner_id: i64,
    owner_position: String,
    owner_department: String,
    owner_division: String,
    owner_cost_center: i64,
    sub_site_id: i64,
    owner_site_id: i64,
}

impl AssetDiff {
    /// Photo URL carried by the diff, ignoring blank values.
    pub fn photo_url(&self) -> Option<&str> {
        self.condition_photo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(AssetDiff::default());
        }
        serde_json::from_value(value.clone())
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
