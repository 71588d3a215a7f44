use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CsvLoadReport {
    pub rows_read: usize,
    pub rows_skipped: usize,
}
