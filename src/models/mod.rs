// Storage entities
pub mod asset_change;
pub mod opname_session;

// Value types shared by the ledger, the state machine and the report path
pub mod asset_diff;
pub mod location;

pub use asset_change::ProcessingStatus;
pub use asset_diff::{AssetBaseline, AssetDiff};
pub use location::Location;
pub use opname_session::SessionStatus;
