use anyhow::Result;
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::Arc;

use crate::arrow_schemas;

const CHUNK: usize = 10_000;

/// Columnar dump of one scan's stored events. Returns rows written.
pub fn export_events_to_parquet(conn: &Connection, scan_id: &str, out: &Path) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT scan_instance_id, hash, type, generated, confidence, visibility, risk, module, data, \
         false_positive, source_event_hash, actual_source, module_data_source \
         FROM tbl_scan_results WHERE scan_instance_id = ? ORDER BY generated",
    )?;
    let mut rows = stmt.query([scan_id])?;
    let schema = Arc::new(arrow_schemas::scan_results_schema());
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(Default::default()))
        .build();
    let file = std::fs::File::create(out)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let mut total = 0;
    loop {
        let mut batch = EventBatch::default();
        while batch.len < CHUNK {
            let Some(row) = rows.next()? else { break };
            batch.push(row)?;
        }
        if batch.len == 0 {
            break;
        }
        total += batch.len;
        let rb = RecordBatch::try_new(schema.clone(), batch.finish())?;
        writer.write(&rb)?;
    }

    writer.close()?;
    Ok(total)
}

#[derive(Default)]
struct EventBatch {
    len: usize,
    scan: StringBuilder,
    hash: StringBuilder,
    event_type: StringBuilder,
    generated: Float64Builder,
    confidence: Int64Builder,
    visibility: Int64Builder,
    risk: Int64Builder,
    module: StringBuilder,
    data: StringBuilder,
    false_positive: BooleanBuilder,
    source_hash: StringBuilder,
    actual_source: StringBuilder,
    module_data_source: StringBuilder,
}

impl EventBatch {
    fn push(&mut self, row: &Row<'_>) -> Result<()> {
        self.scan.append_value(row.get::<_, String>(0)?);
        self.hash.append_value(row.get::<_, String>(1)?);
        self.event_type.append_value(row.get::<_, String>(2)?);
        self.generated.append_value(row.get::<_, f64>(3)?);
        self.confidence.append_value(row.get::<_, i64>(4)?);
        self.visibility.append_value(row.get::<_, i64>(5)?);
        self.risk.append_value(row.get::<_, i64>(6)?);
        self.module.append_value(row.get::<_, String>(7)?);
        self.data.append_option(row.get::<_, Option<String>>(8)?);
        self.false_positive.append_value(row.get::<_, i64>(9)? != 0);
        self.source_hash.append_option(row.get::<_, Option<String>>(10)?);
        self.actual_source.append_option(row.get::<_, Option<String>>(11)?);
        self.module_data_source.append_option(row.get::<_, Option<String>>(12)?);
        self.len += 1;
        Ok(())
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.scan.finish()),
            Arc::new(self.hash.finish()),
            Arc::new(self.event_type.finish()),
            Arc::new(self.generated.finish()),
            Arc::new(self.confidence.finish()),
            Arc::new(self.visibility.finish()),
            Arc::new(self.risk.finish()),
            Arc::new(self.module.finish()),
            Arc::new(self.data.finish()),
            Arc::new(self.false_positive.finish()),
            Arc::new(self.source_hash.finish()),
            Arc::new(self.actual_source.finish()),
            Arc::new(self.module_data_source.finish()),
        ]
    }
}
