use dispatch_executor::safe_output_dir;
use proptest::prelude::*;

proptest! {
    #[test]
    fn any_number_of_leading_traversals_is_rejected(depth in 1usize..8) {
        let tmp = tempfile::tempdir().unwrap();
        let escape = "../".repeat(depth) + "outside";
        let err = safe_output_dir(tmp.path(), Some(&escape), "artifacts").unwrap_err();
        prop_assert_eq!(err.code(), dispatch_core::ErrorCode::PathEscape);
    }

    #[test]
    fn nested_relative_segments_stay_contained(segments in prop::collection::vec("[a-z]{1,6}", 1..5)) {
        let tmp = tempfile::tempdir().unwrap();
        let rel = segments.join("/");
        let out = safe_output_dir(tmp.path(), Some(&rel), "artifacts").unwrap();
        prop_assert!(out.starts_with(tmp.path().canonicalize().unwrap()));
    }
}
