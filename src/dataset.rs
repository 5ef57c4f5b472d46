use crate::error::{DashboardError, Result};
use calamine::{open_workbook_auto, Data, DataType as _, Reader};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

pub const INVOICE_DATE: &str = "InvoiceDate";
pub const REGION: &str = "Region";
pub const RETAILER: &str = "Retailer";
pub const STATE: &str = "State";
pub const CITY: &str = "City";
pub const TOTAL_SALES: &str = "TotalSales";
pub const UNITS_SOLD: &str = "UnitsSold";
/// Derived display column, e.g. `Mar'21`.
pub const PERIOD: &str = "Month_Year";

pub const REQUIRED_COLUMNS: [&str; 7] = [
    INVOICE_DATE,
    REGION,
    RETAILER,
    STATE,
    CITY,
    TOTAL_SALES,
    UNITS_SOLD,
];

/// Selector value meaning "no constraint on this column".
pub const ALL_OPTION: &str = "All";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Set of exact-match constraints, at most one per column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    constraints: BTreeMap<String, String>,
}

impl FilterSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(column.into(), value.into());
        self
    }

    /// Applies a selector choice: `None` or the `All` sentinel clears the
    /// constraint for that column.
    pub fn select(&mut self, column: &str, choice: Option<&str>) {
        match choice {
            Some(value) if value != ALL_OPTION => {
                self.constraints.insert(column.to_string(), value.to_string());
            }
            _ => {
                self.constraints.remove(column);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.constraints.get(column).map(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.constraints.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }
}

/// The loaded source table. Immutable after load; every query produces a new
/// frame.
#[derive(Debug, Clone)]
pub struct SalesTable {
    frame: DataFrame,
}

impl SalesTable {
    pub fn load(path: &Path) -> Result<Self> {
        let frame = read_frame(path)?;
        let table = Self::from_frame(frame)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.frame.height(),
            table.frame.width(),
            path.display()
        );
        Ok(table)
    }

    /// Validates the required columns and adds the period column.
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        let names = column_names(&frame);
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !names.iter().any(|n| n == c))
            .collect();
        if !missing.is_empty() {
            return Err(DashboardError::Load(format!(
                "Missing required columns: {}",
                missing.join(", ")
            )));
        }

        let frame = derive_period(frame)
            .map_err(|e| DashboardError::Load(format!("Failed to derive {}: {}", PERIOD, e)))?;
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn columns(&self) -> Vec<String> {
        column_names(&self.frame)
    }

    pub fn filter(&self, selection: &FilterSelection) -> Result<DataFrame> {
        filter_frame(&self.frame, selection)
    }

    pub fn distinct_values(&self, column: &str) -> Result<Vec<String>> {
        distinct_values(&self.frame, column)
    }

    /// Distinct values prefixed with the `All` sentinel, ready for a selector.
    pub fn selector_options(&self, column: &str) -> Result<Vec<String>> {
        let mut options = vec![ALL_OPTION.to_string()];
        options.extend(self.distinct_values(column)?);
        Ok(options)
    }
}

/// Reads a CSV, Parquet or Excel file into a frame.
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(DashboardError::Load(format!("File not found at {}", path.display())));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    let frame = match extension.as_deref() {
        Some("csv") => LazyCsvReader::new(path)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| DashboardError::Load(format!("Failed to scan CSV {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| DashboardError::Load(format!("Failed to read CSV {}: {}", path.display(), e)))?,
        Some("parquet") => LazyFrame::scan_parquet(path, ScanArgsParquet::default())
            .map_err(|e| DashboardError::Load(format!("Failed to scan {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| DashboardError::Load(format!("Failed to read {}: {}", path.display(), e)))?,
        Some("xlsx") | Some("xlsm") | Some("xls") => read_workbook(path)?,
        other => {
            return Err(DashboardError::Load(format!(
                "Unsupported file type {:?} for {}; expected .csv, .parquet or .xlsx",
                other.unwrap_or(""),
                path.display()
            )))
        }
    };

    Ok(frame)
}

/// Reads the first worksheet; the first row holds the column names.
pub fn read_workbook(path: &Path) -> Result<DataFrame> {
    let load_error =
        |e: calamine::Error| DashboardError::Load(format!("Failed to read workbook {}: {}", path.display(), e));

    let mut workbook = open_workbook_auto(path).map_err(load_error)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DashboardError::Load(format!("Workbook {} has no worksheets", path.display())))?;
    let range = workbook.worksheet_range(&sheet).map_err(load_error)?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| DashboardError::Load(format!("Worksheet '{}' is empty", sheet)))?
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect();
    let body: Vec<&[Data]> = rows.collect();

    let columns = header
        .iter()
        .enumerate()
        .map(|(index, name)| worksheet_column(name, &body, index))
        .collect::<Result<Vec<Series>>>()?;
    debug!("Read {} rows from worksheet '{}'", body.len(), sheet);

    DataFrame::new(columns)
        .map_err(|e| DashboardError::Load(format!("Failed to build frame from {}: {}", path.display(), e)))
}

/// Date cells become a `Date` column, all-numeric cells `Int64` or
/// `Float64`, anything else text.
fn worksheet_column(name: &str, rows: &[&[Data]], index: usize) -> Result<Series> {
    let cells: Vec<Option<&Data>> = rows
        .iter()
        .map(|row| row.get(index).filter(|cell| !matches!(cell, Data::Empty)))
        .collect();
    let present: Vec<&Data> = cells.iter().flatten().copied().collect();

    if present.is_empty() {
        return Ok(Series::new(name, vec![None::<String>; cells.len()]));
    }

    if present
        .iter()
        .all(|cell| matches!(cell, Data::DateTime(_) | Data::DateTimeIso(_)))
    {
        // NaiveDate::default() is 1970-01-01.
        let days: Vec<Option<i32>> = cells
            .iter()
            .map(|cell| {
                cell.and_then(|c| c.as_date())
                    .map(|d| d.signed_duration_since(NaiveDate::default()).num_days() as i32)
            })
            .collect();
        return Ok(Series::new(name, days).cast(&DataType::Date)?);
    }

    if present.iter().all(|cell| matches!(cell, Data::Int(_))) {
        let ints: Vec<Option<i64>> = cells
            .iter()
            .map(|cell| match cell {
                Some(Data::Int(v)) => Some(*v),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, ints));
    }

    if present.iter().all(|cell| matches!(cell, Data::Int(_) | Data::Float(_))) {
        let floats: Vec<Option<f64>> = cells
            .iter()
            .map(|cell| match cell {
                Some(Data::Int(v)) => Some(*v as f64),
                Some(Data::Float(v)) => Some(*v),
                _ => None,
            })
            .collect();
        return Ok(Series::new(name, floats));
    }

    let text: Vec<Option<String>> = cells.iter().map(|cell| cell.map(|c| c.to_string())).collect();
    Ok(Series::new(name, text))
}

pub fn period_label(date: NaiveDate) -> String {
    date.format("%b'%y").to_string()
}

/// Parses the date part of a textual date or datetime.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let date_part = text
        .trim()
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Adds the `Month_Year` label column derived from `InvoiceDate`.
pub fn derive_period(mut frame: DataFrame) -> Result<DataFrame> {
    let dates = frame
        .column(INVOICE_DATE)
        .map_err(|_| unknown_column(&frame, INVOICE_DATE))?
        .cast(&DataType::String)?;

    let mut unparsed = 0usize;
    let labels: Vec<Option<String>> = dates
        .str()?
        .into_iter()
        .map(|value| {
            let text = value?;
            let label = parse_date_text(text).map(period_label);
            if label.is_none() {
                unparsed += 1;
            }
            label
        })
        .collect();

    if unparsed > 0 {
        warn!("{} rows have an unparseable {}; their {} is left empty", unparsed, INVOICE_DATE, PERIOD);
    }

    frame.with_column(Series::new(PERIOD, labels))?;
    Ok(frame)
}

/// Rows matching every constraint, compared on the value's textual form.
pub fn filter_frame(frame: &DataFrame, selection: &FilterSelection) -> Result<DataFrame> {
    let mut predicate: Option<Expr> = None;
    for (column, value) in selection.iter() {
        ensure_column(frame, column)?;
        let condition = col(column).cast(DataType::String).eq(lit(value));
        predicate = Some(match predicate {
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }

    let Some(predicate) = predicate else {
        return Ok(frame.clone());
    };

    let filtered = frame.clone().lazy().filter(predicate).collect()?;
    debug!("Filter {:?} kept {} of {} rows", selection, filtered.height(), frame.height());
    Ok(filtered)
}

/// Sorted distinct non-null values: numeric columns by value, others
/// lexicographically.
pub fn distinct_values(frame: &DataFrame, column: &str) -> Result<Vec<String>> {
    ensure_column(frame, column)?;
    let series = frame.column(column)?;
    let text = series.cast(&DataType::String)?;

    if series.dtype().is_numeric() {
        let numbers = series.cast(&DataType::Float64)?;
        let mut pairs: Vec<(f64, String)> = numbers
            .f64()?
            .into_iter()
            .zip(text.str()?.into_iter())
            .filter_map(|(n, t)| Some((n?, t?.to_string())))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs.dedup_by(|a, b| a.1 == b.1);
        return Ok(pairs.into_iter().map(|(_, t)| t).collect());
    }

    let values: BTreeSet<String> = text
        .str()?
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();
    Ok(values.into_iter().collect())
}

pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Most similar column name, if any is close enough to be a plausible typo.
pub fn closest_column(name: &str, columns: &[String]) -> Option<String> {
    columns
        .iter()
        .map(|c| (c, jaro_winkler(&name.to_lowercase(), &c.to_lowercase())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.clone())
}

fn ensure_column(frame: &DataFrame, column: &str) -> Result<()> {
    if frame.get_column_names().iter().any(|c| *c == column) {
        Ok(())
    } else {
        Err(unknown_column(frame, column))
    }
}

fn unknown_column(frame: &DataFrame, column: &str) -> DashboardError {
    let columns = column_names(frame);
    match closest_column(column, &columns) {
        Some(hint) => DashboardError::UnknownColumn(format!("'{}' (did you mean '{}'?)", column, hint)),
        None => DashboardError::UnknownColumn(format!("'{}'", column)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_label() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 15).unwrap();
        assert_eq!(period_label(date), "Mar'21");
    }

    #[test]
    fn test_parse_date_text_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 7);
        assert_eq!(parse_date_text("2020-01-07"), expected);
        assert_eq!(parse_date_text("1/7/2020"), expected);
        assert_eq!(parse_date_text("2020/01/07"), expected);
        assert_eq!(parse_date_text("2020-01-07 00:00:00.000"), expected);
        assert_eq!(parse_date_text("2020-01-07T12:30:00"), expected);
        assert_eq!(parse_date_text("next tuesday"), None);
    }

    #[test]
    fn test_selection_all_clears_constraint() {
        let mut selection = FilterSelection::new().with(REGION, "West");
        selection.select(RETAILER, Some("Foot Locker"));
        assert_eq!(selection.len(), 2);

        selection.select(REGION, Some(ALL_OPTION));
        selection.select(RETAILER, None);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_closest_column() {
        let columns = vec!["TotalSales".to_string(), "Region".to_string()];
        assert_eq!(closest_column("Total_Sales", &columns), Some("TotalSales".to_string()));
        assert_eq!(closest_column("Profit", &columns), None);
    }

    #[test]
    fn test_derive_period_keeps_missing_dates_empty() {
        let frame = df! [
            "InvoiceDate" => [Some("2021-03-15"), None, Some("garbage")],
        ]
        .unwrap();
        let frame = derive_period(frame).unwrap();
        let labels: Vec<Option<&str>> = frame.column(PERIOD).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(labels, vec![Some("Mar'21"), None, None]);
    }
}
