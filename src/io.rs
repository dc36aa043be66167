// src/io.rs
//
// File adapters used by the command-line front end. The library stages
// themselves never touch the filesystem.

use log::{info, debug};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::grid::PointRecord;

const LON_COLUMNS: [&str; 3] = ["lon", "lng", "longitude"];
const LAT_COLUMNS: [&str; 2] = ["lat", "latitude"];

/// Reads point records from a headered CSV file. The longitude and latitude
/// columns are found by name; every other column is a numeric value, kept in
/// header order.
pub fn read_points_csv<P: AsRef<Path>>(path: P) -> Result<(Vec<String>, Vec<PointRecord>)> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();

    let find = |names: &[&str]| {
        headers.iter().position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
    };
    let lon = find(&LON_COLUMNS).ok_or_else(|| Error::config("CSV has no longitude column (lon, lng, longitude)"))?;
    let lat = find(&LAT_COLUMNS).ok_or_else(|| Error::config("CSV has no latitude column (lat, latitude)"))?;
    let value_columns: Vec<usize> = (0..headers.len()).filter(|&i| i != lon && i != lat).collect();
    let value_names: Vec<String> = value_columns.iter().map(|&i| headers[i].trim().to_string()).collect();
    debug!("CSV columns: lon={}, lat={}, values={:?}", lon, lat, value_names);

    let mut points = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| -> Result<f64> {
            let raw = record.get(i).unwrap_or("").trim();
            raw.parse::<f64>().map_err(|_| {
                Error::Config(format!("row {}: column '{}' is not a number: '{}'", row + 2, &headers[i], raw))
            })
        };
        let values = value_columns.iter().map(|&i| field(i)).collect::<Result<Vec<f64>>>()?;
        points.push(PointRecord::new(field(lon)?, field(lat)?, values));
    }

    info!("Read {} points with {} value columns from {:?}", points.len(), value_names.len(), path.as_ref());
    Ok((value_names, points))
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("Wrote {:?}", path.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_points_with_named_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, "orders,Latitude,lng,revenue\n2,-23.5,-46.6,10.5\n1,-23.6,-46.7,3\n").unwrap();

        let (names, points) = read_points_csv(&path).unwrap();
        assert_eq!(names, vec!["orders".to_string(), "revenue".to_string()]);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], PointRecord::new(-46.6, -23.5, vec![2.0, 10.5]));
        assert_eq!(points[1].values, vec![1.0, 3.0]);
    }

    #[test]
    fn rejects_missing_coordinates_and_bad_numbers() {
        let dir = TempDir::new().unwrap();
        let no_lat = dir.path().join("no_lat.csv");
        fs::write(&no_lat, "lon,value\n1,2\n").unwrap();
        assert!(matches!(read_points_csv(&no_lat), Err(Error::Config(_))));

        let bad = dir.path().join("bad.csv");
        fs::write(&bad, "lon,lat,value\n1,2,x\n").unwrap();
        assert!(matches!(read_points_csv(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn writes_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &vec![PointRecord::new(1.0, 2.0, vec![3.0])]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"lon\": 1.0"));
    }
}
