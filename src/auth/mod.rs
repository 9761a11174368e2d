/*!
 * # Authorization
 *
 * Reviewer roles and the position-to-role mapping used by the opname
 * approval ladder. Authentication itself is handled upstream; this crate only
 * receives user ids and resolves roles through the identity directory.
 */

mod rbac;

pub use rbac::*;
