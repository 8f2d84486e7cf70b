use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_optional_datetime},
    models::VehicleStatic,
};

fn row_to_vehicle(row: &Row) -> Result<VehicleStatic, rusqlite::Error> {
    Ok(VehicleStatic {
        vin: row.get("vin")?,
        make: row.get("make")?,
        model: row.get("model")?,
        year: row.get("year")?,
        body_class: row.get("body_class")?,
        cylinders: row.get("cylinders")?,
        horsepower: row.get("horsepower")?,
        plant_country: row.get("plant_country")?,
        decoded_at: None,
    })
}

impl Database {
    pub async fn get_vehicle_static(&self, vin: &str) -> Result<Option<VehicleStatic>> {
        let vin = vin.to_string();
        self.execute(move |conn| {
            let found = conn
                .query_row(
                    "SELECT vin, make, model, year, body_class, cylinders, horsepower, plant_country, decoded_at
                     FROM vehicle_static
                     WHERE vin = ?1",
                    params![vin],
                    |row| {
                        let decoded_at: String = row.get("decoded_at")?;
                        Ok((row_to_vehicle(row)?, decoded_at))
                    },
                )
                .optional()?;

            match found {
                Some((mut vehicle, decoded_at)) => {
                    vehicle.decoded_at = parse_optional_datetime(Some(decoded_at), "decoded_at")?;
                    Ok(Some(vehicle))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn upsert_vehicle_static(&self, vehicle: &VehicleStatic) -> Result<()> {
        let record = vehicle.clone();
        self.execute(move |conn| {
            let decoded_at = record.decoded_at.unwrap_or_else(chrono::Utc::now);
            conn.execute(
                "INSERT INTO vehicle_static (vin, make, model, year, body_class, cylinders, horsepower, plant_country, decoded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(vin) DO UPDATE SET
                    make = excluded.make,
                    model = excluded.model,
                    year = excluded.year,
                    body_class = excluded.body_class,
                    cylinders = excluded.cylinders,
                    horsepower = excluded.horsepower,
                    plant_country = excluded.plant_country,
                    decoded_at = excluded.decoded_at",
                params![
                    record.vin,
                    record.make,
                    record.model,
                    record.year,
                    record.body_class,
                    record.cylinders,
                    record.horsepower,
                    record.plant_country,
                    format_timestamp(&decoded_at),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
