pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE tbl_event_types (
  event           VARCHAR NOT NULL PRIMARY KEY,
  event_descr     VARCHAR NOT NULL,
  event_raw       INT NOT NULL DEFAULT 0,
  event_type      VARCHAR NOT NULL
);

CREATE TABLE tbl_config (
  scope           VARCHAR NOT NULL,
  opt             VARCHAR NOT NULL,
  val             VARCHAR NOT NULL,
  PRIMARY KEY (scope, opt)
);

CREATE TABLE tbl_scan_instance (
  guid            VARCHAR NOT NULL PRIMARY KEY,
  name            VARCHAR NOT NULL,
  seed_target     VARCHAR NOT NULL,
  seed_target_type VARCHAR NOT NULL DEFAULT '',
  created         INT DEFAULT 0,
  started         INT DEFAULT 0,
  ended           INT DEFAULT 0,
  status          VARCHAR NOT NULL
);

CREATE TABLE tbl_scan_log (
  scan_instance_id VARCHAR NOT NULL REFERENCES tbl_scan_instance(guid) ON DELETE CASCADE,
  generated       INT NOT NULL,
  component       VARCHAR,
  type            VARCHAR NOT NULL,
  message         VARCHAR
);

CREATE TABLE tbl_scan_config (
  scan_instance_id VARCHAR NOT NULL REFERENCES tbl_scan_instance(guid) ON DELETE CASCADE,
  component       VARCHAR NOT NULL,
  opt             VARCHAR NOT NULL,
  val             VARCHAR NOT NULL
);

CREATE TABLE tbl_scan_results (
  scan_instance_id VARCHAR NOT NULL REFERENCES tbl_scan_instance(guid) ON DELETE CASCADE,
  hash            VARCHAR NOT NULL,
  type            VARCHAR NOT NULL REFERENCES tbl_event_types(event),
  generated       REAL NOT NULL,
  confidence      INT NOT NULL DEFAULT 100,
  visibility      INT NOT NULL DEFAULT 100,
  risk            INT NOT NULL DEFAULT 0,
  module          VARCHAR NOT NULL,
  data            VARCHAR,
  false_positive  INT NOT NULL DEFAULT 0,
  source_event_hash VARCHAR DEFAULT 'ROOT',
  actual_source   VARCHAR,
  module_data_source VARCHAR,
  UNIQUE (scan_instance_id, hash)
);

CREATE TABLE tbl_scan_correlation_results (
  id              VARCHAR NOT NULL PRIMARY KEY,
  scan_instance_id VARCHAR NOT NULL REFERENCES tbl_scan_instance(guid) ON DELETE CASCADE,
  title           VARCHAR NOT NULL,
  rule_risk       VARCHAR NOT NULL,
  rule_id         VARCHAR NOT NULL,
  rule_name       VARCHAR NOT NULL,
  rule_descr      VARCHAR NOT NULL,
  rule_logic      VARCHAR NOT NULL
);

CREATE TABLE tbl_scan_correlation_results_events (
  correlation_id  VARCHAR NOT NULL REFERENCES tbl_scan_correlation_results(id) ON DELETE CASCADE,
  event_hash      VARCHAR NOT NULL,
  PRIMARY KEY (correlation_id, event_hash)
);

CREATE INDEX idx_scan_results_id ON tbl_scan_results (scan_instance_id);
CREATE INDEX idx_scan_results_type ON tbl_scan_results (scan_instance_id, type);
CREATE INDEX idx_scan_results_hash ON tbl_scan_results (scan_instance_id, hash);
CREATE INDEX idx_scan_results_module ON tbl_scan_results (scan_instance_id, module);
CREATE INDEX idx_scan_results_srchash ON tbl_scan_results (scan_instance_id, source_event_hash);
CREATE INDEX idx_scan_logs ON tbl_scan_log (scan_instance_id);
CREATE INDEX idx_scan_config ON tbl_scan_config (scan_instance_id);
CREATE INDEX idx_scan_correlation ON tbl_scan_correlation_results (scan_instance_id);
CREATE INDEX idx_scan_correlation_events ON tbl_scan_correlation_results_events (event_hash);

COMMIT;
"#;
