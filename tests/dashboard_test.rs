mod common;

use sales_chart_assistant::chart::ChartKind;
use sales_chart_assistant::dashboard::{build_dashboard, selector_options, FORMATTED_SALES};
use sales_chart_assistant::dataset::{FilterSelection, SalesTable, ALL_OPTION, RETAILER, STATE};

#[test]
fn test_dashboard_panels_for_full_table() -> Result<(), Box<dyn std::error::Error>> {
    let table = SalesTable::from_frame(common::sales_frame())?;
    let dashboard = build_dashboard(&table, &FilterSelection::new())?;

    let titles: Vec<&str> = dashboard.panels.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Total Sales by Retailer",
            "Monthly Sales Trend",
            "Total Sales and Units Sold by State",
            "Sales by Region and City",
        ]
    );

    // Retailers sorted, sales summed.
    let retailer = &dashboard.panels[0];
    let names: Vec<Option<&str>> = retailer.table.column("Retailer")?.str()?.into_iter().collect();
    assert_eq!(names, vec![Some("Amazon"), Some("Foot Locker"), Some("Walmart")]);
    let sales: Vec<Option<f64>> = retailer.table.column("TotalSales")?.f64()?.into_iter().collect();
    assert_eq!(sales, vec![Some(400000.0), Some(850000.0), Some(250000.0)]);
    assert_eq!(retailer.figure.kind, ChartKind::Bar);
    assert_eq!(retailer.figure.value_axis.title, "Total Sales ($)");
    assert_eq!(retailer.download.file_name, "RetailerSales.csv");
    assert!(String::from_utf8(retailer.download.bytes.clone())?.starts_with("Retailer,TotalSales\n"));

    let monthly = &dashboard.panels[1];
    assert_eq!(monthly.figure.kind, ChartKind::Line);
    assert_eq!(monthly.table.height(), 3);

    let statewise = &dashboard.panels[2];
    assert_eq!(statewise.figure.series.len(), 2);
    assert!(statewise.figure.series[1].secondary_axis);
    assert_eq!(
        statewise.figure.secondary_value_axis.as_ref().map(|a| a.column.as_str()),
        Some("UnitsSold")
    );

    let region_city = &dashboard.panels[3];
    assert_eq!(region_city.figure.kind, ChartKind::Treemap);
    let formatted: Vec<Option<&str>> = region_city.table.column(FORMATTED_SALES)?.str()?.into_iter().collect();
    assert!(formatted.contains(&Some("6.00 Lakh")));
    let new_york = region_city.figure.series[0]
        .points
        .iter()
        .find(|p| p.category == "New York")
        .expect("New York leaf");
    assert_eq!(new_york.hover.as_deref(), Some("6.00 Lakh"));
    assert_eq!(new_york.color.as_deref(), Some("New York"));
    assert!(region_city.figure.to_json()?.contains("Lakh"));

    assert_eq!(dashboard.raw_download.file_name, "FilteredSalesData.csv");
    Ok(())
}

#[test]
fn test_dashboard_respects_selection() -> Result<(), Box<dyn std::error::Error>> {
    let table = SalesTable::from_frame(common::sales_frame())?;
    let selection = FilterSelection::new()
        .with(RETAILER, "Foot Locker")
        .with(STATE, "California");
    let dashboard = build_dashboard(&table, &selection)?;

    assert_eq!(dashboard.view.height(), 1);
    assert_eq!(dashboard.panels[0].table.height(), 1);
    let raw = String::from_utf8(dashboard.raw_download.bytes.clone())?;
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.contains("Los Angeles"));
    Ok(())
}

#[test]
fn test_selector_options_cover_filter_columns() -> Result<(), Box<dyn std::error::Error>> {
    let table = SalesTable::from_frame(common::sales_frame())?;
    let options = selector_options(&table)?;

    let columns: Vec<&str> = options.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(columns, vec!["Region", "Retailer", "State", "City", "Month_Year"]);
    for (_, values) in &options {
        assert_eq!(values[0], ALL_OPTION);
    }
    assert_eq!(options[0].1, vec![ALL_OPTION, "Northeast", "South", "West"]);
    Ok(())
}
