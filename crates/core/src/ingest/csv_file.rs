use crate::domain::observation::{parse_date, MarketObservation};
use crate::ingest::types::CsvLoadReport;
use anyhow::{Context, Result};
use csv::StringRecord;
use std::io::Read;
use std::path::Path;

const SYMBOL_COLUMNS: [&str; 3] = ["name", "symbol", "ticker"];

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    date: usize,
    symbol: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim();
                names.iter().any(|n| h.eq_ignore_ascii_case(n))
            })
        };
        let require = |names: &[&str]| {
            find(names).with_context(|| {
                format!(
                    "dataset has no {} column (headers: {})",
                    names[0],
                    headers.iter().collect::<Vec<_>>().join(",")
                )
            })
        };

        Ok(Self {
            date: require(&["date"])?,
            symbol: require(&SYMBOL_COLUMNS)?,
            open: require(&["open"])?,
            high: require(&["high"])?,
            low: require(&["low"])?,
            close: require(&["close"])?,
            volume: require(&["volume"])?,
        })
    }

    fn parse(&self, record: &StringRecord) -> Option<MarketObservation> {
        let field = |idx: usize| record.get(idx).map(str::trim);
        let number = |idx: usize| field(idx)?.parse::<f64>().ok();

        let symbol = field(self.symbol).filter(|s| !s.is_empty())?;
        let row = MarketObservation {
            date: parse_date(field(self.date)?)?,
            symbol: symbol.to_string(),
            open: number(self.open)?,
            high: number(self.high)?,
            low: number(self.low)?,
            close: number(self.close)?,
            volume: number(self.volume)?,
        };
        row.is_finite().then_some(row)
    }
}

pub fn read_observations(path: &Path) -> Result<(Vec<MarketObservation>, CsvLoadReport)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    parse_observations(file).with_context(|| format!("failed to parse dataset {}", path.display()))
}

/// Rows with a bad date, empty symbol, or non-numeric value are skipped and
/// counted rather than failing the whole load.
pub fn parse_observations<R: Read>(reader: R) -> Result<(Vec<MarketObservation>, CsvLoadReport)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let columns = ColumnMap::from_headers(reader.headers()?)?;

    let mut report = CsvLoadReport::default();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed CSV record")?;
        report.rows_read += 1;
        match columns.parse(&record) {
            Some(row) => rows.push(row),
            None => report.rows_skipped += 1,
        }
    }

    if report.rows_skipped > 0 {
        tracing::warn!(
            rows_skipped = report.rows_skipped,
            rows_read = report.rows_read,
            "skipped dataset rows with missing or invalid values"
        );
    }

    Ok((rows, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_training_export_layout() {
        let data = "\
,Date,Open,High,Low,Close,Volume,Name
0,2024-01-02,99.5,101,99,100,40000,PPL
1,2024-01-03,100,103,100,102,45000,PPL
";
        let (rows, report) = parse_observations(data.as_bytes()).unwrap();
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_skipped, 0);
        assert_eq!(rows[1].symbol, "PPL");
        assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(rows[1].close, 102.0);
        assert_eq!(rows[0].volume, 40000.0);
    }

    #[test]
    fn accepts_lowercase_and_symbol_aliases() {
        let data = "symbol,date,open,high,low,close,volume\nAAPL,01/05/2024,1,2,0.5,1.5,10\n";
        let (rows, _) = parse_observations(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }

    #[test]
    fn skips_rows_with_missing_values() {
        let data = "\
Date,Open,High,Low,Close,Volume,Name
2024-01-02,1,1,1,,10,PPL
bad-date,1,1,1,1,10,PPL
2024-01-04,1,1,1,1,10,
2024-01-05,1,1,1,NaN,10,PPL
2024-01-06,1,1,1,2,10,PPL
";
        let (rows, report) = parse_observations(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_skipped, 4);
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let data = "Date,Open,High,Low,Volume,Name\n2024-01-02,1,1,1,10,PPL\n";
        let err = parse_observations(data.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("close"));
    }
}
