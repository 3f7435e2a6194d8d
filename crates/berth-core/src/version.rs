//! Version range matching.
//!
//! Only the numeric `(major, minor, patch)` triple is compared; pre-release
//! and build suffixes never affect the result.

use berth_schema::{Version, VersionConstraint, VersionError};

/// Exclusive upper bound of a caret range: the next major for `X >= 1`,
/// the next minor for `0.Y.Z`. `None` when the major is already `u64::MAX`,
/// leaving the range open above.
fn caret_ceiling(floor: &Version) -> Option<(u64, u64, u64)> {
    if floor.major() > 0 {
        floor.major().checked_add(1).map(|major| (major, 0, 0))
    } else {
        Some(
            floor
                .minor()
                .checked_add(1)
                .map_or((1, 0, 0), |minor| (0, minor, 0)),
        )
    }
}

pub fn matches(constraint: &VersionConstraint, version: &Version) -> bool {
    let actual = version.triple();
    match constraint {
        VersionConstraint::Any => true,
        VersionConstraint::Exact(expected) => actual == expected.triple(),
        VersionConstraint::Caret(floor) => {
            let below_ceiling = match caret_ceiling(floor) {
                Some(ceiling) => actual < ceiling,
                None => true,
            };
            actual >= floor.triple() && below_ceiling
        }
    }
}

/// Parse both sides and match. Either side failing to parse is an
/// `InvalidVersionFormat` error.
pub fn matches_str(constraint: &str, version: &str) -> Result<bool, VersionError> {
    let constraint: VersionConstraint = constraint.parse()?;
    let version: Version = version.parse()?;
    Ok(matches(&constraint, &version))
}
