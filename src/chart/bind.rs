//! Evaluation of a parsed [`ChartCall`] against the current view.
//!
//! The view's frame is the only name in scope. Every column a call mentions
//! must exist in that frame; there is no fallback to a default column.

use crate::chart::figure::{Axis, ChartFigure, ChartKind, ChartPoint, ChartSeries};
use crate::chart::grammar::{ChartCall, Value, FIGURE_IDENT};
use crate::dataset::{closest_column, column_names};
use crate::error::{DashboardError, Result};
use polars::prelude::*;
use std::collections::HashMap;

/// Name under which the filtered view is bound.
pub const TABLE_IDENT: &str = "filtered_df";

/// Keywords a chart kind understands, and the ones it cannot do without.
struct KeywordSpec {
    supported: &'static [&'static str],
    required: &'static [&'static str],
}

fn keyword_spec(kind: ChartKind) -> KeywordSpec {
    match kind {
        ChartKind::Bar => KeywordSpec {
            supported: &[
                "data_frame", "x", "y", "color", "title", "labels", "hover_data", "hover_name", "template",
                "orientation",
            ],
            required: &["x", "y"],
        },
        ChartKind::Line => KeywordSpec {
            supported: &[
                "data_frame", "x", "y", "color", "title", "labels", "hover_data", "hover_name", "template",
                "markers",
            ],
            required: &["x", "y"],
        },
        ChartKind::Scatter => KeywordSpec {
            supported: &[
                "data_frame", "x", "y", "color", "title", "labels", "hover_data", "hover_name", "template",
            ],
            required: &["x", "y"],
        },
        ChartKind::Treemap => KeywordSpec {
            supported: &[
                "data_frame", "path", "values", "color", "title", "labels", "hover_data", "hover_name",
                "template",
            ],
            required: &["path", "values"],
        },
    }
}

/// Binds `call` to `frame` (known as `table_name`) and builds the figure.
pub fn evaluate(call: &ChartCall, table_name: &str, frame: &DataFrame) -> Result<ChartFigure> {
    let binder = Binder {
        call,
        frame,
        columns: column_names(frame),
    };
    binder.check_target()?;
    binder.check_data(table_name)?;
    binder.check_keywords()?;

    let labels = binder.labels()?;
    let title = binder.optional_string("title")?;
    let template = binder.optional_string("template")?;
    let color = binder.column_arg("color")?;
    let hover_name = binder.column_arg("hover_name")?;
    let hover_data = binder.hover_data()?;
    let hover = binder.hover_values(hover_name.as_deref(), &hover_data)?;

    match call.kind {
        ChartKind::Treemap => binder.treemap(title, template, color, &labels, &hover),
        kind => binder.xy_chart(kind, title, template, color, &labels, &hover),
    }
}

/// Per-row hover text pulled from `hover_name` and `hover_data`.
struct HoverValues {
    name: Option<Vec<Option<String>>>,
    data: Vec<(String, Vec<Option<String>>)>,
}

impl HoverValues {
    /// Fills the hover fields of a point from `row`. Aggregated points keep
    /// the values of their first row.
    fn apply(&self, point: &mut ChartPoint, row: usize) {
        if let Some(names) = &self.name {
            point.hover = names[row].clone();
        }
        point.hover_data = self
            .data
            .iter()
            .filter_map(|(column, values)| values[row].clone().map(|v| (column.clone(), v)))
            .collect();
    }
}

struct Binder<'a> {
    call: &'a ChartCall,
    frame: &'a DataFrame,
    columns: Vec<String>,
}

impl<'a> Binder<'a> {
    fn call_name(&self) -> String {
        format!("px.{}()", self.call.kind)
    }

    fn check_target(&self) -> Result<()> {
        if self.call.target != FIGURE_IDENT {
            return Err(DashboardError::Render(format!(
                "the chart is assigned to '{}' but '{}' was expected",
                self.call.target, FIGURE_IDENT
            )));
        }
        Ok(())
    }

    fn check_data(&self, table_name: &str) -> Result<()> {
        let keyword = match self.call.keyword("data_frame") {
            Some(Value::Name(name)) => Some(name.as_str()),
            Some(other) => {
                return Err(DashboardError::Render(format!(
                    "data_frame must be the table '{}', got a {}",
                    table_name,
                    other.type_name()
                )))
            }
            None => None,
        };

        let name = match (self.call.data.as_deref(), keyword) {
            (Some(_), Some(_)) => {
                return Err(DashboardError::Render(format!(
                    "{} got multiple values for argument 'data_frame'",
                    self.call_name()
                )))
            }
            (Some(name), None) | (None, Some(name)) => name,
            (None, None) => {
                return Err(DashboardError::Render(format!("{} was not given a table", self.call_name())))
            }
        };

        if name != table_name {
            return Err(DashboardError::Render(format!(
                "name '{}' is not defined; the table is available as '{}'",
                name, table_name
            )));
        }
        Ok(())
    }

    fn check_keywords(&self) -> Result<()> {
        let spec = keyword_spec(self.call.kind);
        if let Some((name, _)) = self
            .call
            .keywords
            .iter()
            .find(|(name, _)| !spec.supported.contains(&name.as_str()))
        {
            return Err(DashboardError::Render(format!(
                "{} got an unexpected keyword argument '{}'",
                self.call_name(),
                name
            )));
        }
        for required in spec.required {
            if matches!(self.call.keyword(required), None | Some(Value::None)) {
                return Err(DashboardError::Render(format!(
                    "{} requires the '{}' argument",
                    self.call_name(),
                    required
                )));
            }
        }
        Ok(())
    }

    fn ensure_column(&self, column: &str) -> Result<()> {
        if self.columns.iter().any(|c| c == column) {
            return Ok(());
        }
        let hint = closest_column(column, &self.columns)
            .map(|c| format!(" (did you mean '{}'?)", c))
            .unwrap_or_default();
        Err(DashboardError::Render(format!(
            "column '{}' is not in the current view{}; available columns: {}",
            column,
            hint,
            self.columns.join(", ")
        )))
    }

    /// A keyword naming a single column; `None` when absent.
    fn column_arg(&self, key: &str) -> Result<Option<String>> {
        match self.call.keyword(key) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(column)) => {
                self.ensure_column(column)?;
                Ok(Some(column.clone()))
            }
            Some(other) => Err(DashboardError::Render(format!(
                "'{}' must be a column name, got a {}",
                key,
                other.type_name()
            ))),
        }
    }

    fn required_column(&self, key: &str) -> Result<String> {
        self.column_arg(key)?.ok_or_else(|| {
            DashboardError::Render(format!("{} requires the '{}' argument", self.call_name(), key))
        })
    }

    fn optional_string(&self, key: &str) -> Result<Option<String>> {
        match self.call.keyword(key) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(text)) => Ok(Some(text.clone())),
            Some(other) => Err(DashboardError::Render(format!(
                "'{}' must be a string, got a {}",
                key,
                other.type_name()
            ))),
        }
    }

    fn labels(&self) -> Result<HashMap<String, String>> {
        let mut labels = HashMap::new();
        match self.call.keyword("labels") {
            None | Some(Value::None) => {}
            Some(Value::Dict(entries)) => {
                for (column, label) in entries {
                    self.ensure_column(column)?;
                    match label {
                        Value::Str(text) => {
                            labels.insert(column.clone(), text.clone());
                        }
                        other => {
                            return Err(DashboardError::Render(format!(
                                "label for '{}' must be a string, got a {}",
                                column,
                                other.type_name()
                            )))
                        }
                    }
                }
            }
            Some(other) => {
                return Err(DashboardError::Render(format!(
                    "'labels' must be a dict, got a {}",
                    other.type_name()
                )))
            }
        }
        Ok(labels)
    }

    fn column_list(&self, key: &str) -> Result<Vec<String>> {
        match self.call.keyword(key) {
            None | Some(Value::None) => Ok(Vec::new()),
            Some(Value::Str(column)) => {
                self.ensure_column(column)?;
                Ok(vec![column.clone()])
            }
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Str(column) => {
                        self.ensure_column(column)?;
                        Ok(column.clone())
                    }
                    other => Err(DashboardError::Render(format!(
                        "'{}' entries must be column names, got a {}",
                        key,
                        other.type_name()
                    ))),
                })
                .collect(),
            Some(other) => Err(DashboardError::Render(format!(
                "'{}' must be a list of column names, got a {}",
                key,
                other.type_name()
            ))),
        }
    }

    fn hover_data(&self) -> Result<Vec<String>> {
        self.column_list("hover_data")
    }

    fn hover_values(&self, hover_name: Option<&str>, hover_data: &[String]) -> Result<HoverValues> {
        let name = match hover_name {
            Some(column) => Some(self.text_values(column)?),
            None => None,
        };
        let data = hover_data
            .iter()
            .map(|column| -> Result<(String, Vec<Option<String>>)> {
                Ok((column.clone(), self.text_values(column)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(HoverValues { name, data })
    }

    fn axis(&self, column: &str, labels: &HashMap<String, String>) -> Axis {
        match labels.get(column) {
            Some(title) => Axis::titled(column, title.clone()),
            None => Axis::new(column),
        }
    }

    fn ensure_numeric(&self, column: &str) -> Result<()> {
        let series = self.frame.column(column).map_err(render_error)?;
        if series.dtype().is_numeric() {
            Ok(())
        } else {
            Err(DashboardError::Render(format!(
                "column '{}' holds {} values and cannot be used as a value axis",
                column,
                series.dtype()
            )))
        }
    }

    fn text_values(&self, column: &str) -> Result<Vec<Option<String>>> {
        let series = self
            .frame
            .column(column)
            .and_then(|s| s.cast(&DataType::String))
            .map_err(render_error)?;
        let values = series
            .str()
            .map_err(render_error)?
            .into_iter()
            .map(|v| v.map(|s| s.to_string()))
            .collect();
        Ok(values)
    }

    fn number_values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let series = self
            .frame
            .column(column)
            .and_then(|s| s.cast(&DataType::Float64))
            .map_err(render_error)?;
        let values = series.f64().map_err(render_error)?.into_iter().collect();
        Ok(values)
    }

    fn xy_chart(
        &self,
        kind: ChartKind,
        title: Option<String>,
        template: Option<String>,
        color: Option<String>,
        labels: &HashMap<String, String>,
        hover: &HoverValues,
    ) -> Result<ChartFigure> {
        let x = self.required_column("x")?;
        let y = self.required_column("y")?;

        if kind == ChartKind::Line {
            match self.call.keyword("markers") {
                None | Some(Value::Bool(_)) | Some(Value::None) => {}
                Some(other) => {
                    return Err(DashboardError::Render(format!(
                        "'markers' must be True or False, got a {}",
                        other.type_name()
                    )))
                }
            }
        }

        // Horizontal bars put the categories on y.
        let horizontal = match self.optional_string("orientation")?.as_deref() {
            None | Some("v") => false,
            Some("h") => true,
            Some(other) => {
                return Err(DashboardError::Render(format!(
                    "orientation must be 'v' or 'h', got '{}'",
                    other
                )))
            }
        };
        let (category_column, value_column) = if horizontal { (y, x) } else { (x, y) };
        self.ensure_numeric(&value_column)?;

        let categories = self.text_values(&category_column)?;
        let values = self.number_values(&value_column)?;
        let colors = match &color {
            Some(column) => Some(self.text_values(column)?),
            None => None,
        };

        let mut series: Vec<ChartSeries> = Vec::new();
        let mut series_index: HashMap<String, usize> = HashMap::new();
        let mut point_index: HashMap<(usize, String), usize> = HashMap::new();

        for (row, (category, value)) in categories.into_iter().zip(values).enumerate() {
            let (Some(category), Some(value)) = (category, value) else {
                continue;
            };
            let series_name = match &colors {
                Some(colors) => colors[row].clone().unwrap_or_else(|| "null".to_string()),
                None => value_column.clone(),
            };
            let idx = *series_index.entry(series_name.clone()).or_insert_with(|| {
                series.push(ChartSeries::new(series_name));
                series.len() - 1
            });

            if kind == ChartKind::Bar {
                if let Some(&point) = point_index.get(&(idx, category.clone())) {
                    series[idx].points[point].value += value;
                    continue;
                }
                point_index.insert((idx, category.clone()), series[idx].points.len());
            }
            let mut point = ChartPoint::new(category, value);
            hover.apply(&mut point, row);
            series[idx].points.push(point);
        }

        Ok(ChartFigure {
            kind,
            title,
            category_axis: self.axis(&category_column, labels),
            value_axis: self.axis(&value_column, labels),
            secondary_value_axis: None,
            series,
            template,
        })
    }

    fn treemap(
        &self,
        title: Option<String>,
        template: Option<String>,
        color: Option<String>,
        labels: &HashMap<String, String>,
        hover: &HoverValues,
    ) -> Result<ChartFigure> {
        let path = self.column_list("path")?;
        let Some(leaf) = path.last().cloned() else {
            return Err(DashboardError::Render("'path' must name at least one column".to_string()));
        };
        let values_column = self.required_column("values")?;
        self.ensure_numeric(&values_column)?;

        let levels: Vec<Vec<Option<String>>> = path
            .iter()
            .map(|column| self.text_values(column))
            .collect::<Result<_>>()?;
        let values = self.number_values(&values_column)?;
        let colors = match &color {
            Some(column) => Some(self.text_values(column)?),
            None => None,
        };

        let mut node = ChartSeries::new(values_column.clone());
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();

        for (row, value) in values.into_iter().enumerate() {
            let Some(value) = value else { continue };
            let Some(full_path) = levels
                .iter()
                .map(|level| level[row].clone())
                .collect::<Option<Vec<String>>>()
            else {
                continue;
            };

            if let Some(&existing) = index.get(&full_path) {
                node.points[existing].value += value;
                continue;
            }
            index.insert(full_path.clone(), node.points.len());
            let mut parents = full_path;
            let category = parents.pop().unwrap_or_default();
            let mut point = ChartPoint::new(category, value);
            point.parents = parents;
            point.color = colors.as_ref().and_then(|c| c[row].clone());
            hover.apply(&mut point, row);
            node.points.push(point);
        }

        Ok(ChartFigure {
            kind: ChartKind::Treemap,
            title,
            category_axis: self.axis(&leaf, labels),
            value_axis: self.axis(&values_column, labels),
            secondary_value_axis: None,
            series: vec![node],
            template,
        })
    }
}

fn render_error(err: PolarsError) -> DashboardError {
    DashboardError::Render(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::grammar::parse_chart_call;

    fn sales() -> DataFrame {
        df! [
            "Region" => ["North", "South", "North", "West"],
            "City" => ["Boston", "Miami", "Albany", "Denver"],
            "Retailer" => ["Amazon", "Kohl's", "Amazon", "Amazon"],
            "TotalSales" => [100.0, 200.0, 50.0, 75.0],
        ]
        .unwrap()
    }

    fn run(source: &str) -> Result<ChartFigure> {
        let call = parse_chart_call(source).unwrap();
        evaluate(&call, TABLE_IDENT, &sales())
    }

    #[test]
    fn test_bar_sums_per_category() {
        let figure = run("fig = px.bar(filtered_df, x='Region', y='TotalSales')").unwrap();
        assert_eq!(figure.category_axis.column, "Region");
        assert_eq!(figure.value_axis.column, "TotalSales");
        assert_eq!(figure.series.len(), 1);
        let points: Vec<(&str, f64)> = figure.series[0]
            .points
            .iter()
            .map(|p| (p.category.as_str(), p.value))
            .collect();
        assert_eq!(points, vec![("North", 150.0), ("South", 200.0), ("West", 75.0)]);
    }

    #[test]
    fn test_color_splits_series_and_labels_rename_axes() {
        let figure = run(
            "fig = px.bar(filtered_df, x='Region', y='TotalSales', color='Retailer', labels={'TotalSales': 'Total Sales ($)'})",
        )
        .unwrap();
        let names: Vec<&str> = figure.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Amazon", "Kohl's"]);
        assert_eq!(figure.value_axis.title, "Total Sales ($)");
    }

    #[test]
    fn test_line_keeps_rows() {
        let figure = run("fig = px.line(data_frame=filtered_df, x='Region', y='TotalSales', markers=True)").unwrap();
        assert_eq!(figure.kind, ChartKind::Line);
        assert_eq!(figure.point_count(), 4);
    }

    #[test]
    fn test_horizontal_bar_swaps_axes() {
        let figure = run("fig = px.bar(filtered_df, x='TotalSales', y='Region', orientation='h')").unwrap();
        assert_eq!(figure.category_axis.column, "Region");
        assert_eq!(figure.value_axis.column, "TotalSales");
    }

    #[test]
    fn test_treemap_builds_paths() {
        let figure = run("fig = px.treemap(filtered_df, path=['Region', 'City'], values='TotalSales')").unwrap();
        let boston = figure.series[0].points.iter().find(|p| p.category == "Boston").unwrap();
        assert_eq!(boston.parents, vec!["North".to_string()]);
        assert_eq!(figure.category_axis.column, "City");
    }

    #[test]
    fn test_treemap_keeps_color_and_hover() {
        let figure = run(
            "fig = px.treemap(filtered_df, path=['Region', 'City'], values='TotalSales', color='Retailer', hover_name='City', hover_data=['Retailer'])",
        )
        .unwrap();
        let miami = figure.series[0].points.iter().find(|p| p.category == "Miami").unwrap();
        assert_eq!(miami.color.as_deref(), Some("Kohl's"));
        assert_eq!(miami.hover.as_deref(), Some("Miami"));
        assert_eq!(miami.hover_data, vec![("Retailer".to_string(), "Kohl's".to_string())]);

        let plain = run("fig = px.treemap(filtered_df, path=['Region', 'City'], values='TotalSales')").unwrap();
        assert_ne!(figure, plain);
        assert!(plain.series[0].points.iter().all(|p| p.color.is_none() && p.hover.is_none()));
    }

    #[test]
    fn test_bar_hover_takes_first_row() {
        let figure = run("fig = px.bar(filtered_df, x='Region', y='TotalSales', hover_name='City')").unwrap();
        let north = &figure.series[0].points[0];
        assert_eq!(north.category, "North");
        assert_eq!(north.hover.as_deref(), Some("Boston"));
    }

    #[test]
    fn test_missing_column_is_render_error() {
        let err = run("fig = px.bar(filtered_df, x='Region', y='Profit')").unwrap_err();
        match err {
            DashboardError::Render(message) => assert!(message.contains("'Profit'")),
            other => panic!("expected render error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_table_name_or_target() {
        assert!(matches!(run("fig = px.bar(df, x='Region', y='TotalSales')"), Err(DashboardError::Render(_))));
        assert!(matches!(
            run("chart = px.bar(filtered_df, x='Region', y='TotalSales')"),
            Err(DashboardError::Render(_))
        ));
        assert!(matches!(run("fig = px.bar(x='Region', y='TotalSales')"), Err(DashboardError::Render(_))));
    }

    #[test]
    fn test_bad_arguments() {
        assert!(matches!(run("fig = px.bar(filtered_df, x='Region')"), Err(DashboardError::Render(_))));
        assert!(matches!(
            run("fig = px.bar(filtered_df, x='Region', y='City')"),
            Err(DashboardError::Render(_))
        ));
        assert!(matches!(
            run("fig = px.bar(filtered_df, x='Region', y='TotalSales', barmode='group')"),
            Err(DashboardError::Render(_))
        ));
        assert!(matches!(
            run("fig = px.bar(filtered_df, x='Region', y='TotalSales', labels={'Profit': 'P'})"),
            Err(DashboardError::Render(_))
        ));
    }
}
