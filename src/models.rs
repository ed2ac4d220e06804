use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Sampling interval for measurement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Max,
    HalfHour,
    OneHour,
    ThreeHours,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Max => "max",
            Scale::HalfHour => "30min",
            Scale::OneHour => "1hour",
            Scale::ThreeHours => "3hours",
            Scale::OneDay => "1day",
            Scale::OneWeek => "1week",
            Scale::OneMonth => "1month",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Scale::Max),
            "30min" => Ok(Scale::HalfHour),
            "1hour" => Ok(Scale::OneHour),
            "3hours" => Ok(Scale::ThreeHours),
            "1day" => Ok(Scale::OneDay),
            "1week" => Ok(Scale::OneWeek),
            "1month" => Ok(Scale::OneMonth),
            _ => Err(format!(
                "unknown scale '{}' (expected max, 30min, 1hour, 3hours, 1day, 1week or 1month)",
                s
            )),
        }
    }
}

/// Physical quantity a station or module can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureType {
    Temperature,
    Co2,
    Humidity,
    Pressure,
    Noise,
    Rain,
}

impl MeasureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureType::Temperature => "temperature",
            MeasureType::Co2 => "co2",
            MeasureType::Humidity => "humidity",
            MeasureType::Pressure => "pressure",
            MeasureType::Noise => "noise",
            MeasureType::Rain => "rain",
        }
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasureType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" => Ok(MeasureType::Temperature),
            "co2" => Ok(MeasureType::Co2),
            "humidity" => Ok(MeasureType::Humidity),
            "pressure" => Ok(MeasureType::Pressure),
            "noise" => Ok(MeasureType::Noise),
            "rain" => Ok(MeasureType::Rain),
            _ => Err(format!(
                "unknown measurement type '{}' (expected temperature, co2, humidity, pressure, noise or rain)",
                s
            )),
        }
    }
}

/// Parameters for a `getmeasure` call.
///
/// `device_id` is the MAC address of the station; `module_id` targets one of
/// its modules instead of the main unit. `date_begin`/`date_end` bound the
/// window and travel as epoch seconds; when omitted the API returns the most
/// recent samples.
#[derive(Debug, Clone)]
pub struct MeasureRequest {
    pub device_id: String,
    pub module_id: Option<String>,
    pub scale: Scale,
    pub types: Vec<MeasureType>,
    pub date_begin: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl MeasureRequest {
    pub fn new(device_id: &str, scale: Scale, types: Vec<MeasureType>, limit: u32) -> Self {
        Self {
            device_id: device_id.to_string(),
            module_id: None,
            scale,
            types,
            date_begin: None,
            date_end: None,
            limit,
        }
    }

    /// Comma-joined wire names of the requested types, in request order.
    pub(crate) fn types_param(&self) -> String {
        self.types
            .iter()
            .map(MeasureType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A single sample in a measurement series. The value is `None` when the
/// station recorded nothing for that timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurePoint {
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Wire shape of a `getmeasure` response: per-timestamp rows keyed by epoch
/// seconds, each row holding one value per requested type, in request order.
#[derive(Debug, Deserialize)]
pub struct MeasureResponse {
    pub body: HashMap<String, Vec<Option<f64>>>,
}

impl MeasureResponse {
    /// Reshape the per-timestamp rows into one series per requested type.
    ///
    /// Rows are ordered by their numeric timestamp, not by the string order
    /// of the keys, so every series comes out in ascending time order and
    /// the series stay aligned by index. Rows shorter than the requested
    /// type list yield `None` for the missing columns.
    pub fn into_series(
        self,
        types: &[MeasureType],
    ) -> Result<HashMap<MeasureType, Vec<MeasurePoint>>> {
        let mut rows: Vec<(i64, Vec<Option<f64>>)> = Vec::with_capacity(self.body.len());
        for (key, values) in self.body {
            let secs: i64 = key.parse().map_err(|_| {
                Error::Api(format!(
                    "non-numeric timestamp key '{}' in measure response",
                    key
                ))
            })?;
            rows.push((secs, values));
        }
        rows.sort_by_key(|(secs, _)| *secs);

        let times = rows
            .iter()
            .map(|(secs, _)| {
                Utc.timestamp_opt(*secs, 0)
                    .single()
                    .ok_or_else(|| Error::Api(format!("timestamp {} out of range", secs)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut series = HashMap::with_capacity(types.len());
        for (column, measure_type) in types.iter().enumerate() {
            let points = rows
                .iter()
                .zip(&times)
                .map(|((_, values), time)| MeasurePoint {
                    time: *time,
                    value: values.get(column).copied().flatten(),
                })
                .collect();
            series.insert(*measure_type, points);
        }

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> MeasureResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_scale_wire_names() {
        assert_eq!(Scale::Max.as_str(), "max");
        assert_eq!(Scale::HalfHour.as_str(), "30min");
        assert_eq!(Scale::OneHour.as_str(), "1hour");
        assert_eq!(Scale::ThreeHours.as_str(), "3hours");
        assert_eq!(Scale::OneDay.as_str(), "1day");
        assert_eq!(Scale::OneWeek.as_str(), "1week");
        assert_eq!(Scale::OneMonth.as_str(), "1month");

        assert_eq!("30min".parse::<Scale>().unwrap(), Scale::HalfHour);
        assert_eq!("1month".parse::<Scale>().unwrap(), Scale::OneMonth);
        assert!("45min".parse::<Scale>().is_err());
    }

    #[test]
    fn test_measure_type_wire_names() {
        assert_eq!(MeasureType::Temperature.as_str(), "temperature");
        assert_eq!(MeasureType::Co2.as_str(), "co2");
        assert_eq!(MeasureType::Rain.as_str(), "rain");

        assert_eq!(
            "temperature".parse::<MeasureType>().unwrap(),
            MeasureType::Temperature
        );
        assert_eq!("CO2".parse::<MeasureType>().unwrap(), MeasureType::Co2);
        assert!("wind".parse::<MeasureType>().is_err());
    }

    #[test]
    fn test_types_param_preserves_request_order() {
        let request = MeasureRequest::new(
            "70:ee:50:12:34:56",
            Scale::HalfHour,
            vec![MeasureType::Co2, MeasureType::Temperature],
            1024,
        );
        assert_eq!(request.types_param(), "co2,temperature");
    }

    #[test]
    fn test_into_series_orders_rows_numerically() {
        // "900" sorts after "1000" as a string; numerically it comes first.
        let response = response(r#"{"body":{"1000":[2.0],"900":[1.0],"1100":[3.0]}}"#);
        let series = response.into_series(&[MeasureType::Temperature]).unwrap();

        let points = &series[&MeasureType::Temperature];
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].time, Utc.timestamp_opt(900, 0).unwrap());
        assert_eq!(points[0].value, Some(1.0));
        assert_eq!(points[1].time, Utc.timestamp_opt(1000, 0).unwrap());
        assert_eq!(points[1].value, Some(2.0));
        assert_eq!(points[2].time, Utc.timestamp_opt(1100, 0).unwrap());
        assert_eq!(points[2].value, Some(3.0));
    }

    #[test]
    fn test_into_series_splits_columns_per_type() {
        let response =
            response(r#"{"body":{"900":[15.4,512.0],"1800":[16.1,498.0],"2700":[16.8,505.0]}}"#);
        let types = [MeasureType::Temperature, MeasureType::Co2];
        let series = response.into_series(&types).unwrap();

        assert_eq!(series.len(), 2);
        let temperature = &series[&MeasureType::Temperature];
        let co2 = &series[&MeasureType::Co2];
        assert_eq!(temperature.len(), 3);
        assert_eq!(co2.len(), 3);
        assert_eq!(temperature[1].value, Some(16.1));
        assert_eq!(co2[1].value, Some(498.0));
        // Series stay aligned by index.
        assert_eq!(temperature[2].time, co2[2].time);
    }

    #[test]
    fn test_into_series_handles_null_and_short_rows() {
        let response = response(r#"{"body":{"900":[15.4,null],"1800":[16.1]}}"#);
        let types = [MeasureType::Temperature, MeasureType::Co2];
        let series = response.into_series(&types).unwrap();

        let co2 = &series[&MeasureType::Co2];
        assert_eq!(co2[0].value, None); // explicit null
        assert_eq!(co2[1].value, None); // row shorter than the type list

        let temperature = &series[&MeasureType::Temperature];
        assert_eq!(temperature[0].value, Some(15.4));
        assert_eq!(temperature[1].value, Some(16.1));
    }

    #[test]
    fn test_into_series_rejects_non_numeric_keys() {
        let response = response(r#"{"body":{"not-a-timestamp":[1.0]}}"#);
        let result = response.into_series(&[MeasureType::Temperature]);
        assert!(matches!(result, Err(Error::Api(_))));
    }

    #[test]
    fn test_into_series_with_empty_body() {
        let response = response(r#"{"body":{}}"#);
        let series = response.into_series(&[MeasureType::Temperature]).unwrap();
        assert_eq!(series[&MeasureType::Temperature].len(), 0);
    }
}
