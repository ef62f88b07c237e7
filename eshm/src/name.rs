//! Region identifier → shm object name mapping.

/// Map a caller-chosen region identifier to a POSIX shm object name.
///
/// The name gets the `/eshm_` prefix and any path separator in the
/// identifier becomes `_`, since shm names may contain no slash beyond the
/// leading one. Deterministic and total; distinct identifiers collide only
/// if they differ solely by `/` vs `_`.
pub fn object_name(identifier: &str) -> String {
    let mut name = String::with_capacity("/eshm_".len() + identifier.len());
    name.push_str("/eshm_");
    for ch in identifier.chars() {
        name.push(if ch == '/' { '_' } else { ch });
    }
    name
}
