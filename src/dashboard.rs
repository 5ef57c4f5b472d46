//! Fixed dashboard panels: summary tables, their figures, and CSV downloads.
//! Everything is recomputed from the table and an explicit selection; nothing
//! is cached between requests.

use crate::chart::bind::{evaluate, TABLE_IDENT};
use crate::chart::figure::{Axis, ChartFigure, ChartKind, ChartPoint, ChartSeries};
use crate::chart::grammar::{ChartCall, Value, FIGURE_IDENT};
use crate::dataset::{
    FilterSelection, SalesTable, CITY, PERIOD, REGION, RETAILER, STATE, TOTAL_SALES, UNITS_SOLD,
};
use crate::error::Result;
use polars::prelude::*;
use tracing::info;

pub const FORMATTED_SALES: &str = "TotalSales (Formatted)";
pub const DASHBOARD_TEMPLATE: &str = "gridon";

/// Columns offered as selectors, in display order.
pub const SELECTOR_COLUMNS: [&str; 5] = [REGION, RETAILER, STATE, CITY, PERIOD];

#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub table: DataFrame,
    pub figure: ChartFigure,
    pub download: Download,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub selection: FilterSelection,
    pub view: DataFrame,
    pub panels: Vec<Panel>,
    pub raw_download: Download,
}

pub fn build_dashboard(table: &SalesTable, selection: &FilterSelection) -> Result<Dashboard> {
    let view = table.filter(selection)?;
    info!("Building dashboard over {} of {} rows", view.height(), table.frame().height());

    let retailer = sales_by_retailer(&view)?;
    let retailer_figure = evaluate_builtin(
        ChartKind::Bar,
        vec![
            ("x", Value::Str(RETAILER.to_string())),
            ("y", Value::Str(TOTAL_SALES.to_string())),
            (
                "labels",
                Value::Dict(vec![(TOTAL_SALES.to_string(), Value::Str("Total Sales ($)".to_string()))]),
            ),
            ("hover_data", Value::List(vec![Value::Str(TOTAL_SALES.to_string())])),
        ],
        &retailer,
    )?;

    let monthly = monthly_sales(&view)?;
    let monthly_figure = evaluate_builtin(
        ChartKind::Line,
        vec![
            ("x", Value::Str(PERIOD.to_string())),
            ("y", Value::Str(TOTAL_SALES.to_string())),
        ],
        &monthly,
    )?;

    let statewise = state_sales_units(&view)?;
    let statewise_figure = state_combo_figure(&statewise)?;

    let region_city = region_city_sales(&view)?;
    let region_city_figure = evaluate_builtin(
        ChartKind::Treemap,
        vec![
            (
                "path",
                Value::List(vec![Value::Str(REGION.to_string()), Value::Str(CITY.to_string())]),
            ),
            ("values", Value::Str(TOTAL_SALES.to_string())),
            ("hover_name", Value::Str(FORMATTED_SALES.to_string())),
            ("color", Value::Str(CITY.to_string())),
        ],
        &region_city,
    )?;

    let panels = vec![
        panel("Total Sales by Retailer", retailer, retailer_figure, "RetailerSales.csv")?,
        panel("Monthly Sales Trend", monthly, monthly_figure, "MonthlySales.csv")?,
        panel(
            "Total Sales and Units Sold by State",
            statewise,
            statewise_figure,
            "StatewiseSales.csv",
        )?,
        panel("Sales by Region and City", region_city, region_city_figure, "RegionCitySales.csv")?,
    ];

    let raw_download = Download {
        file_name: "FilteredSalesData.csv".to_string(),
        bytes: to_csv_bytes(&view)?,
    };

    Ok(Dashboard {
        selection: selection.clone(),
        view,
        panels,
        raw_download,
    })
}

/// Selector options for every filterable column, each led by `All`.
pub fn selector_options(table: &SalesTable) -> Result<Vec<(String, Vec<String>)>> {
    SELECTOR_COLUMNS
        .iter()
        .map(|column| -> Result<(String, Vec<String>)> {
            Ok((column.to_string(), table.selector_options(column)?))
        })
        .collect()
}

pub fn sales_by_retailer(view: &DataFrame) -> Result<DataFrame> {
    sum_by(view, &[RETAILER], &[TOTAL_SALES])
}

pub fn monthly_sales(view: &DataFrame) -> Result<DataFrame> {
    sum_by(view, &[PERIOD], &[TOTAL_SALES])
}

pub fn state_sales_units(view: &DataFrame) -> Result<DataFrame> {
    sum_by(view, &[STATE], &[TOTAL_SALES, UNITS_SOLD])
}

/// Sales per region and city, with the sum also rendered in lakh.
pub fn region_city_sales(view: &DataFrame) -> Result<DataFrame> {
    let mut grouped = sum_by(view, &[REGION, CITY], &[TOTAL_SALES])?;
    let sums = grouped.column(TOTAL_SALES)?.cast(&DataType::Float64)?;
    let formatted: Vec<Option<String>> = sums.f64()?.into_iter().map(|v| v.map(format_lakh)).collect();
    grouped.with_column(Series::new(FORMATTED_SALES, formatted))?;
    Ok(grouped)
}

pub fn format_lakh(value: f64) -> String {
    format!("{:.2} Lakh", value / 100_000.0)
}

pub fn to_csv_bytes(frame: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut frame = frame.clone();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .finish(&mut frame)?;
    Ok(buffer)
}

/// Group by `keys` (sorted ascending) and sum `values`.
fn sum_by(view: &DataFrame, keys: &[&str], values: &[&str]) -> Result<DataFrame> {
    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(k)).collect();
    let sums: Vec<Expr> = values.iter().map(|v| col(v).sum()).collect();
    let order: Vec<String> = keys.iter().map(|k| k.to_string()).collect();

    let grouped = view
        .clone()
        .lazy()
        .group_by(key_exprs)
        .agg(sums)
        .sort(order, SortMultipleOptions::default())
        .collect()?;
    Ok(grouped)
}

fn evaluate_builtin(kind: ChartKind, keywords: Vec<(&str, Value)>, frame: &DataFrame) -> Result<ChartFigure> {
    let mut keywords: Vec<(String, Value)> = keywords.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    keywords.push(("template".to_string(), Value::Str(DASHBOARD_TEMPLATE.to_string())));
    let call = ChartCall {
        target: FIGURE_IDENT.to_string(),
        kind,
        data: Some(TABLE_IDENT.to_string()),
        keywords,
    };
    evaluate(&call, TABLE_IDENT, frame)
}

/// Bars of sales on the primary axis, units as a line on a secondary axis.
fn state_combo_figure(statewise: &DataFrame) -> Result<ChartFigure> {
    let states = statewise.column(STATE)?.cast(&DataType::String)?;
    let sales = statewise.column(TOTAL_SALES)?.cast(&DataType::Float64)?;
    let units = statewise.column(UNITS_SOLD)?.cast(&DataType::Float64)?;

    let mut sales_series = ChartSeries::new("Total Sales");
    sales_series.kind = Some(ChartKind::Bar);
    let mut units_series = ChartSeries::new("Units Sold");
    units_series.kind = Some(ChartKind::Line);
    units_series.secondary_axis = true;

    for ((state, sale), unit) in states.str()?.into_iter().zip(sales.f64()?).zip(units.f64()?) {
        let Some(state) = state else { continue };
        if let Some(sale) = sale {
            sales_series.points.push(ChartPoint::new(state, sale));
        }
        if let Some(unit) = unit {
            units_series.points.push(ChartPoint::new(state, unit));
        }
    }

    Ok(ChartFigure {
        kind: ChartKind::Bar,
        title: None,
        category_axis: Axis::new(STATE),
        value_axis: Axis::titled(TOTAL_SALES, "Total Sales"),
        secondary_value_axis: Some(Axis::titled(UNITS_SOLD, "Units Sold")),
        series: vec![sales_series, units_series],
        template: Some(DASHBOARD_TEMPLATE.to_string()),
    })
}

fn panel(title: &str, table: DataFrame, figure: ChartFigure, file_name: &str) -> Result<Panel> {
    let bytes = to_csv_bytes(&table)?;
    Ok(Panel {
        title: title.to_string(),
        table,
        figure,
        download: Download {
            file_name: file_name.to_string(),
            bytes,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lakh() {
        assert_eq!(format_lakh(250_000.0), "2.50 Lakh");
        assert_eq!(format_lakh(1_234.0), "0.01 Lakh");
    }
}
