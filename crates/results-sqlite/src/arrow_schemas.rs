use arrow::datatypes::{DataType, Field, Schema};

pub fn scan_results_schema() -> Schema {
    Schema::new(vec![
        Field::new("scan_instance_id", DataType::Utf8, false),
        Field::new("hash", DataType::Utf8, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("generated", DataType::Float64, false),
        Field::new("confidence", DataType::Int64, false),
        Field::new("visibility", DataType::Int64, false),
        Field::new("risk", DataType::Int64, false),
        Field::new("module", DataType::Utf8, false),
        Field::new("data", DataType::Utf8, true),
        Field::new("false_positive", DataType::Boolean, false),
        Field::new("source_event_hash", DataType::Utf8, true),
        Field::new("actual_source", DataType::Utf8, true),
        Field::new("module_data_source", DataType::Utf8, true),
    ])
}
