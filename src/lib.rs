//! Funnel timing core crate.
//!
//! Current implemented scope:
//! - spreadsheet ingest (xlsx/xls/csv) into an in-memory table
//! - lifecycle timestamp normalization with per-column quality counts
//! - three funnel stages sharing one validate/select/bucket/aggregate pipeline
//! - bar and pie chart rendering to base64 PNG
//! - HTTP surface: start page, upload page and `/run`

mod charts;
mod columns;
mod config;
mod funnel;
mod ingest;
mod observability;
mod report;
mod server;
mod stage;
mod table;
mod timestamps;

pub use charts::{
    configure_chart_font, render_charts, ChartConfig, ChartData, ChartError, ChartRenderer,
    ChartSeries, PlottersRenderer, RenderedCharts, DEFAULT_CHART_FONT, DEFAULT_CHART_HEIGHT,
    DEFAULT_CHART_WIDTH,
};
pub use columns::{describe_missing, missing_columns, LifecycleColumn, ALL_LIFECYCLE_COLUMNS};
pub use config::{
    server_config_from_env, server_config_from_lookup, ConfigError, ServerConfig,
    DEFAULT_BIND_ADDR, DEFAULT_MAX_UPLOAD_BYTES,
};
pub use funnel::{
    aggregate, analyze_stage, bucket_population, select_population, AnalysisError,
    BucketedPopulation, StageAnalysis,
};
pub use ingest::{read_csv, read_excel, read_table, IngestError, UploadFormat};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_chart_config, logging_config_from_env,
    logging_config_from_lookup, LogFormat, LoggingConfig, LoggingInitError,
};
pub use report::{
    ratio_of, round_to, BucketShare, DerivedMetrics, FunnelReport, UpgradeSources, DAYS_DECIMALS,
    RATIO_DECIMALS,
};
pub use server::{
    funnel_router, render_app_page, render_start_page, run_stage, run_upload, AnalysisResponse,
    Upload, INVALID_MODULE_MESSAGE, UNSUPPORTED_FILE_MESSAGE,
};
pub use stage::{
    DeltaRange, DerivedScalar, Stage, StageDescriptor, StageParseError, UndefinedDelta,
    UpperBound, ALL_STAGES, CLAIMED_SAME_DAY, DEPOSITED_BEFORE_CLAIM, FIRST_TO_SECOND_DEPOSIT,
    SECOND_BEFORE_FIRST, SECOND_DEPOSIT_PENDING, SECOND_DEPOSIT_TO_UPGRADE, TRIAL_NOT_CLAIMED,
    TRIAL_TO_FIRST_DEPOSIT, UPGRADE_BEFORE_SECOND, UPGRADE_PENDING,
};
pub use table::{CellValue, Table};
pub use timestamps::{
    coerce_cell, delta_days, excel_serial_to_datetime, normalize_timestamps, parse_timestamp_str,
    ColumnQuality, Timestamp, TimestampFrame,
};
