use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::Value;
use tabled::{Table, Tabled};

use netatmo::config::{self, Config};
use netatmo::{MeasureRequest, MeasureType, NetatmoClient, Scale};

#[derive(Parser)]
#[command(name = "netatmo")]
#[command(about = "A CLI for reading Netatmo weather stations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Login and store credentials for future use
    Login {
        /// Client id of your Netatmo application
        #[arg(long, env = "NETATMO_CLIENT_ID")]
        client_id: String,

        /// Client secret of your Netatmo application
        #[arg(long, env = "NETATMO_CLIENT_SECRET")]
        client_secret: String,

        /// Email address of the Netatmo account
        #[arg(long, env = "NETATMO_USERNAME")]
        username: String,

        /// Password for the account (optional, will prompt if not provided)
        #[arg(long, env = "NETATMO_PASSWORD")]
        password: Option<String>,
    },
    /// List weather stations and their modules
    Stations,
    /// Fetch measurements from a station or one of its modules
    Measure {
        /// MAC address of the station (e.g. 70:ee:50:12:34:56)
        #[arg(long)]
        device: String,

        /// MAC address of a module to query instead of the main unit
        #[arg(long)]
        module: Option<String>,

        /// Sampling scale: max, 30min, 1hour, 3hours, 1day, 1week or 1month
        #[arg(long, default_value = "30min")]
        scale: Scale,

        /// Measurement type to fetch; repeat for several types
        #[arg(long = "type", required = true)]
        types: Vec<MeasureType>,

        /// Start of the window (epoch seconds, RFC 3339, or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        begin: Option<DateTime<Utc>>,

        /// End of the window (epoch seconds, RFC 3339, or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        end: Option<DateTime<Utc>>,

        /// Maximum number of samples per series
        #[arg(long, default_value_t = 1024)]
        limit: u32,
    },
    /// Remove stored credentials
    Logout,
}

#[derive(Tabled)]
struct StationRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Login {
            client_id,
            client_secret,
            username,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Netatmo password: ")
                    .context("Failed to read password from terminal")?,
            };

            let client = NetatmoClient::new(&client_id, &client_secret);

            info!("Authenticating with Netatmo...");
            let token = client.authenticate(&username, &password).await?;
            debug!("Authentication successful");

            config::save_config(&Config {
                client_id,
                client_secret,
                username,
                token,
            })?;

            println!("Logged in successfully.");
        }
        Commands::Stations => {
            let client = connect().await?;

            info!("Fetching station list...");
            let stations = client.get_stations_data().await?;

            let rows = station_rows(&stations);
            if rows.is_empty() {
                println!("No stations found for this account.");
                return Ok(());
            }

            let table = Table::new(&rows);
            println!("{}", table);
        }
        Commands::Measure {
            device,
            module,
            scale,
            types,
            begin,
            end,
            limit,
        } => {
            let client = connect().await?;

            let mut request = MeasureRequest::new(&device, scale, types, limit);
            request.module_id = module;
            request.date_begin = begin;
            request.date_end = end;

            info!("Fetching measurements...");
            let series = client.get_measure(&request).await?;

            for measure_type in &request.types {
                if let Some(points) = series.get(measure_type) {
                    println!("{} ({} samples)", measure_type, points.len());
                    for point in points {
                        match point.value {
                            Some(value) => {
                                println!("  {}  {}", point.time.format("%Y-%m-%d %H:%M"), value)
                            }
                            None => println!("  {}  -", point.time.format("%Y-%m-%d %H:%M")),
                        }
                    }
                    println!();
                }
            }
        }
        Commands::Logout => {
            config::clear_config()?;
            println!("Logged out successfully.");
        }
    }

    Ok(())
}

/// Load the saved config and build a client ready for API calls.
///
/// A short-lived process cannot lean on the client's background refresh, so
/// an expired or expiring token is refreshed here, synchronously, and the
/// new token is written back to the config file.
async fn connect() -> Result<NetatmoClient> {
    let mut config = config::load_config()?;

    let client = NetatmoClient::new(&config.client_id, &config.client_secret);
    client.set_access_token(config.token.clone());

    if config.token.is_expired() || config.token.expires_soon() {
        info!("Refreshing access token...");
        let token = client
            .refresh_token()
            .await
            .context("Failed to refresh the stored token. Run 'netatmo login' again.")?;
        config.token = token;
        config::save_config(&config)?;
    }

    Ok(client)
}

/// Flatten the raw station payload into one table row per device and module.
fn station_rows(stations: &Value) -> Vec<StationRow> {
    let mut rows = Vec::new();

    if let Some(devices) = stations["body"]["devices"].as_array() {
        for device in devices {
            rows.push(StationRow {
                name: string_field(device, "station_name").unwrap_or_else(|| "Unnamed".to_string()),
                id: string_field(device, "_id").unwrap_or_default(),
                kind: string_field(device, "type").unwrap_or_default(),
                firmware: firmware_field(device),
            });

            if let Some(modules) = device["modules"].as_array() {
                for module in modules {
                    rows.push(StationRow {
                        name: string_field(module, "module_name")
                            .unwrap_or_else(|| "Unnamed".to_string()),
                        id: string_field(module, "_id").unwrap_or_default(),
                        kind: string_field(module, "type").unwrap_or_default(),
                        firmware: firmware_field(module),
                    });
                }
            }
        }
    }

    rows
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(|s| s.to_string())
}

fn firmware_field(value: &Value) -> String {
    value["firmware"]
        .as_i64()
        .map(|version| version.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Accepts epoch seconds, an RFC 3339 instant, or a bare YYYY-MM-DD date
/// (midnight UTC).
fn parse_date_arg(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(secs) = s.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("epoch timestamp out of range: {}", s));
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Ok(datetime.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    anyhow::bail!("expected epoch seconds, RFC 3339 or YYYY-MM-DD, got '{}'", s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_date_arg_formats() {
        let from_epoch = parse_date_arg("1717000000").unwrap();
        assert_eq!(from_epoch.timestamp(), 1717000000);

        let from_rfc3339 = parse_date_arg("2024-05-29T18:26:40+02:00").unwrap();
        assert_eq!(from_rfc3339.timestamp(), 1717000000);

        let from_date = parse_date_arg("2024-05-29").unwrap();
        assert_eq!(
            from_date,
            Utc.with_ymd_and_hms(2024, 5, 29, 0, 0, 0).unwrap()
        );

        assert!(parse_date_arg("yesterday").is_err());
    }

    #[test]
    fn test_station_rows_walks_devices_and_modules() {
        let stations = json!({
            "body": {
                "devices": [
                    {
                        "_id": "70:ee:50:12:34:56",
                        "station_name": "Home",
                        "type": "NAMain",
                        "firmware": 181,
                        "modules": [
                            {
                                "_id": "02:00:00:12:34:56",
                                "module_name": "Garden",
                                "type": "NAModule1",
                                "firmware": 50
                            }
                        ]
                    }
                ]
            }
        });

        let rows = station_rows(&stations);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Home");
        assert_eq!(rows[0].id, "70:ee:50:12:34:56");
        assert_eq!(rows[0].kind, "NAMain");
        assert_eq!(rows[0].firmware, "181");
        assert_eq!(rows[1].name, "Garden");
        assert_eq!(rows[1].kind, "NAModule1");
    }

    #[test]
    fn test_station_rows_with_empty_payload() {
        let rows = station_rows(&json!({"body": {}}));
        assert!(rows.is_empty());

        let rows = station_rows(&json!({}));
        assert!(rows.is_empty());
    }
}
