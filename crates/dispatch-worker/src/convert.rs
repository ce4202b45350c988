//! Conversions between the worker's mutable [`JobRecord`] and the durable
//! [`Receipt`] written to disk (spec §4.6 "Always write the receipt...").

use dispatch_core::{JobRecord, Receipt, ReceiptMode};

/// Build the terminal [`Receipt`] for a finished job record.
#[must_use]
pub fn receipt_from_record(record: &JobRecord) -> Receipt {
    Receipt {
        mode: ReceiptMode::Remote,
        run_id: record.run_id.clone(),
        job_id: record.job_id.clone(),
        step_name: record.step_name.clone(),
        inputs_hash: record.inputs_hash.clone(),
        node_id: record.worker_id.clone(),
        status: record.status.to_string(),
        exit_code: record.exit_code,
        started_at: record.started_at.clone(),
        finished_at: record.finished_at.clone(),
        duration_ms: None,
        metrics: record.metrics.clone(),
        artifacts: record.artifacts.clone(),
        log_path: record.log_path.clone(),
        error_code: record.error_code.clone(),
        error_message: record.error_message.clone(),
        artifact_mismatches: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_basic_fields() {
        let record = JobRecord::new_queued("r", "j", "FFMPEG_PROBE", "abc", serde_json::Value::Null, "worker-1");
        let receipt = receipt_from_record(&record);
        assert_eq!(receipt.run_id, "r");
        assert_eq!(receipt.node_id, "worker-1");
        assert_eq!(receipt.status, "queued");
    }
}
