#![allow(dead_code)]

use polars::prelude::*;
use std::path::PathBuf;
use uuid::Uuid;

pub const SALES_CSV: &str = "\
InvoiceDate,Region,Retailer,State,City,TotalSales,UnitsSold
2021-03-15,Northeast,Foot Locker,New York,New York,600000,1200
2021-03-20,Northeast,Walmart,New York,Albany,250000,500
2021-04-02,West,Amazon,California,San Francisco,400000,800
2020-12-31,South,Foot Locker,Texas,Houston,150000,300
2021-04-18,West,Foot Locker,California,Los Angeles,100000,250
";

/// Path for `name` inside a fresh temp directory.
pub fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sales-chart-assistant-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

/// Writes `contents` into a fresh temp directory and returns the file path.
pub fn write_temp_file(name: &str, contents: &str) -> PathBuf {
    let path = temp_path(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn sales_frame() -> DataFrame {
    df! [
        "InvoiceDate" => ["2021-03-15", "2021-03-20", "2021-04-02", "2020-12-31", "2021-04-18"],
        "Region" => ["Northeast", "Northeast", "West", "South", "West"],
        "Retailer" => ["Foot Locker", "Walmart", "Amazon", "Foot Locker", "Foot Locker"],
        "State" => ["New York", "New York", "California", "Texas", "California"],
        "City" => ["New York", "Albany", "San Francisco", "Houston", "Los Angeles"],
        "TotalSales" => [600000.0, 250000.0, 400000.0, 150000.0, 100000.0],
        "UnitsSold" => [1200i64, 500, 800, 300, 250],
    ]
    .unwrap()
}
