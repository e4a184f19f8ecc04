//! [`Visibility`]: read-path predicates consumers use to decide whether a
//! compiled query or open snapshot may still observe a tablet
//! (`spec.md` §4.6). Read-only — neither predicate mutates state, and both
//! only need the tablet's read lock (exposed here as `get_ddl_data`, which
//! the `Tablet` trait itself read-locks).

use crate::error::{CoordinatorError, Result};
use crate::ids::Version;
use crate::store::Tablet;

pub struct Visibility;

impl Visibility {
    /// Rejects a query compiled against a schema version older than the
    /// tablet's current binding.
    pub fn check_schema_version(tablet: &dyn Tablet, ver: Version) -> Result<()> {
        let record = tablet.get_ddl_data();
        if ver < record.schema_version {
            log::info!(
                "tablet {:?} schema version {:?} stale against {:?}",
                tablet.tablet_id(),
                ver,
                record.schema_version
            );
            return Err(CoordinatorError::SchemaRetry);
        }
        Ok(())
    }

    /// Rejects a snapshot that is either too new (the tablet has already
    /// been redefined out from under it) or too old (predates this
    /// binding's activation).
    pub fn check_snapshot_readable(tablet: &dyn Tablet, snap: Version) -> Result<()> {
        let record = tablet.get_ddl_data();
        if record.redefined && snap >= record.snapshot_version {
            log::info!(
                "tablet {:?} redefined at {:?}, snapshot {:?} must re-route",
                tablet.tablet_id(),
                record.snapshot_version,
                snap
            );
            return Err(CoordinatorError::SchemaRetry);
        }
        if !record.redefined && snap < record.snapshot_version {
            log::info!(
                "tablet {:?} snapshot {:?} predates binding activation {:?}",
                tablet.tablet_id(),
                snap,
                record.snapshot_version
            );
            return Err(CoordinatorError::SnapshotDiscarded);
        }
        Ok(())
    }
}
