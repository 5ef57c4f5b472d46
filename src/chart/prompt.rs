use crate::chart::figure::ChartKind;
use crate::chart::grammar::{FIGURE_IDENT, PLOT_MODULE};
use itertools::Itertools;

/// Instruction for the text-generation service: the available columns, the
/// user's description verbatim, and the single-assignment output contract.
pub fn build_chart_prompt(columns: &[String], request: &str, table_name: &str) -> String {
    let kinds = ChartKind::ALL.iter().map(|k| format!("{}.{}", PLOT_MODULE, k)).join(", ");
    format!(
        r#"You are a Python data visualization assistant.

Based on this pandas DataFrame with the following columns:
{columns}

Write valid Python code using Plotly Express ({module}) to plot a {request}.
Use '{table}' as the DataFrame and only the columns listed above.
Use one of: {kinds}. Pass column names as quoted strings.
Do not include import statements or display commands.
Return exactly one line starting with: {fig} = {module}...

Example output:
{fig} = {module}.bar({table}, x='Region', y='TotalSales')"#,
        columns = columns.iter().join(", "),
        module = PLOT_MODULE,
        request = request.trim(),
        table = table_name,
        kinds = kinds,
        fig = FIGURE_IDENT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_contract() {
        let columns = vec!["Region".to_string(), "TotalSales".to_string()];
        let prompt = build_chart_prompt(&columns, "bar chart of TotalSales by Region", "filtered_df");
        assert!(prompt.contains("Region, TotalSales"));
        assert!(prompt.contains("plot a bar chart of TotalSales by Region."));
        assert!(prompt.contains("Use 'filtered_df' as the DataFrame"));
        assert!(prompt.contains("fig = px..."));
        assert!(prompt.contains("px.bar, px.line, px.scatter, px.treemap"));
        assert!(prompt.contains("Do not include import statements or display commands."));
    }
}
