/*
 * This file is part of the Insights Analytics backend.
 *
 * Copyright (C) 2025 Insights Analytics contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use uuid::Uuid;

/// Maps an arbitrary tenant identifier to its canonical UUID.
///
/// Pure, total and deterministic: any input maps to exactly one UUID, and the
/// mapping is stable across processes, versions and platforms. Inputs that
/// parse as a UUID in any standard textual form are canonicalized
/// (lower-case, hyphenated). Everything else is hashed: the first 16 bytes of
/// the MD5 digest of the UTF-8 input, interpreted as a big-endian UUID.
pub fn normalize_tenant_id(raw: &str) -> Uuid {
    match Uuid::parse_str(raw) {
        Ok(uuid) => uuid,
        Err(_) => {
            let digest = md5::compute(raw.as_bytes());
            Uuid::from_bytes(digest.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_uuid_passes_through_canonicalized() {
        assert_eq!(
            normalize_tenant_id("550E8400-E29B-41D4-A716-446655440000").to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_simple_form_is_canonicalized() {
        assert_eq!(
            normalize_tenant_id("550e8400e29b41d4a716446655440000").to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_non_uuid_is_hashed_deterministically() {
        let a = normalize_tenant_id("tenant-123");
        let b = normalize_tenant_id("tenant-123");
        assert_eq!(a, b);
        assert_ne!(a, normalize_tenant_id("tenant-124"));
    }

    #[test]
    fn test_hash_matches_md5_big_endian() {
        // md5("tenant-123") = 748735633d4b17df93e7b881342b899d; the digest
        // bytes read as a big-endian UUID.
        assert_eq!(
            normalize_tenant_id("tenant-123").to_string(),
            "74873563-3d4b-17df-93e7-b881342b899d"
        );
    }

    #[test]
    fn test_idempotent_through_canonical_form() {
        let once = normalize_tenant_id("some arbitrary tenant name");
        let twice = normalize_tenant_id(&once.to_string());
        assert_eq!(once, twice);
    }
}
