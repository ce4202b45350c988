use dispatch_protocol::{build_envelope, compute_inputs_hash, verify_auth_token};
use proptest::prelude::*;

fn ident() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}"
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic_under_key_reordering(a in any::<i64>(), b in "[a-z]{1,8}") {
        let p1 = serde_json::json!({"a": a, "b": b.clone()});
        let p2 = serde_json::json!({"b": b, "a": a});
        let h1 = compute_inputs_hash(&p1).unwrap();
        let h2 = compute_inputs_hash(&p2).unwrap();
        prop_assert_eq!(h1, h2);
    }

    #[test]
    fn envelope_round_trips_for_any_identifiers(
        run_id in ident(),
        job_id in ident(),
        secret in "[a-zA-Z0-9]{4,32}",
    ) {
        let inputs_hash = "c".repeat(16);
        let env = build_envelope(&run_id, &job_id, "ffmpeg_probe", &inputs_hash, &secret, None).unwrap();
        let ok = verify_auth_token(
            &secret, &env.run_id, &env.job_id, &env.step_name, &env.inputs_hash, &env.timestamp, &env.auth_token,
        ).unwrap();
        prop_assert!(ok);
    }

    #[test]
    fn tampering_with_any_signed_field_breaks_verification(
        run_id in ident(),
        job_id in ident(),
        other_job_id in ident(),
        secret in "[a-zA-Z0-9]{4,32}",
    ) {
        prop_assume!(job_id != other_job_id);
        let inputs_hash = "d".repeat(16);
        let env = build_envelope(&run_id, &job_id, "ffmpeg_probe", &inputs_hash, &secret, None).unwrap();
        let ok = verify_auth_token(
            &secret, &env.run_id, &other_job_id, &env.step_name, &env.inputs_hash, &env.timestamp, &env.auth_token,
        ).unwrap();
        prop_assert!(!ok);
    }
}
