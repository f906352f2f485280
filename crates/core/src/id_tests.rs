// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const PREFIX: &str = "VEA-";

#[test]
fn canonical_applies_prefix() {
    let id = AppId::canonical("speed-logger", PREFIX).unwrap();
    assert_eq!(id, "VEA-speed-logger");
}

#[test]
fn canonical_is_idempotent_on_prefixed_input() {
    let id = AppId::canonical("VEA-speed-logger", PREFIX).unwrap();
    assert_eq!(id, "VEA-speed-logger");
}

#[test]
fn canonical_trims_surrounding_whitespace() {
    let id = AppId::canonical("  speed-logger ", PREFIX).unwrap();
    assert_eq!(id, "VEA-speed-logger");
}

#[test]
fn canonical_rejects_empty() {
    assert_eq!(AppId::canonical("", PREFIX), Err(IdError::Empty));
    assert_eq!(AppId::canonical("   ", PREFIX), Err(IdError::Empty));
}

#[test]
fn canonical_rejects_interior_whitespace() {
    assert!(matches!(AppId::canonical("speed logger", PREFIX), Err(IdError::Whitespace(_))));
}

#[test]
fn strip_removes_prefix() {
    let id = AppId::canonical("speed-logger", PREFIX).unwrap();
    assert_eq!(id.stripped(PREFIX), "speed-logger");
}

#[test]
fn strip_is_noop_without_prefix() {
    let id = AppId::from_canonical("other-form");
    assert_eq!(id.stripped(PREFIX), "other-form");
}

#[test]
fn canonicalize_of_strip_equals_canonicalize() {
    // The identity law: canonicalize(strip(x)) == canonicalize(x)
    for input in ["speed-logger", "VEA-speed-logger", " VEA-a ", "a"] {
        let canonical = AppId::canonical(input, PREFIX).unwrap();
        let restripped = AppId::canonical(canonical.stripped(PREFIX), PREFIX).unwrap();
        assert_eq!(canonical, restripped, "law violated for {input:?}");
    }
}

#[test]
fn minted_execution_ids_are_unique() {
    let a = ExecutionId::mint();
    let b = ExecutionId::mint();
    assert_ne!(a, b);
}

#[test]
fn execution_id_shape_detection() {
    let minted = ExecutionId::mint();
    assert!(ExecutionId::looks_like(minted.as_str()));
    assert!(!ExecutionId::looks_like("VEA-speed-logger"));
    assert!(!ExecutionId::looks_like("speed-logger"));
}

#[test]
fn app_id_serde_is_transparent() {
    let id = AppId::canonical("cam", PREFIX).unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"VEA-cam\"");
    let back: AppId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
