//! The fixed set of DOS 3.x geometries (`spec.md` §4.7 "Geometry whitelist").

use paleofs_io::Geometry;

pub const WHITELIST: &[(u32, u32)] = &[
    (35, 13),
    (35, 16),
    (40, 16),
    (80, 16),
    (50, 16),
    (50, 32),
];

pub fn is_allowed(geometry: &Geometry) -> bool {
    match geometry {
        Geometry::Sectored {
            tracks,
            sectors_per_track,
        } => WHITELIST.contains(&(*tracks, *sectors_per_track)),
        Geometry::Blocked { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_140k_geometry() {
        assert!(is_allowed(&Geometry::Sectored {
            tracks: 35,
            sectors_per_track: 16
        }));
    }

    #[test]
    fn rejects_unlisted_geometry() {
        assert!(!is_allowed(&Geometry::Sectored {
            tracks: 40,
            sectors_per_track: 13
        }));
    }
}
