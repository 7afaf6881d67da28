use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::time::{self, TimeError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub address: String,
    pub is_active: bool,
    pub courts: Vec<Court>,
}

impl Facility {
    pub fn court(&self, court_id: &str) -> Option<&Court> {
        self.courts.iter().find(|c| c.id == court_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Court {
    pub id: String,
    pub name: String,
    pub sport_type: String,
    pub price_per_hour: Decimal,
    pub is_active: bool,
    pub operating_hours: Option<OperatingHours>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeWindow {
    pub day: String,
    pub start: String,
    pub end: String,
}

/// Weekly opening windows of a court. An empty list means open all day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperatingHours {
    pub windows: Vec<TimeWindow>,
}

impl OperatingHours {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let hours: OperatingHours = serde_json::from_str(s)?;
        for window in &hours.windows {
            parse_weekday(&window.day)?;
            let start = time::to_minutes(&window.start)?;
            let end = time::to_end_minutes(&window.end)?;
            if end <= start {
                anyhow::bail!(
                    "window on {} must end after it starts: {}-{}",
                    window.day,
                    window.start,
                    window.end
                );
            }
        }
        Ok(hours)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Opening windows for the weekday of `date`, as minute offsets.
    pub fn windows_on(&self, date: NaiveDate) -> Vec<(u32, u32)> {
        let weekday = date.weekday();
        let mut windows: Vec<(u32, u32)> = self
            .windows
            .iter()
            .filter(|w| parse_weekday(&w.day).map(|d| d == weekday).unwrap_or(false))
            .filter_map(|w| {
                let start = time::to_minutes(&w.start).ok()?;
                let end = time::to_end_minutes(&w.end).ok()?;
                Some((start, end))
            })
            .collect();
        windows.sort_unstable();
        windows
    }

    /// True when `[start, end)` on `date` sits entirely inside one window.
    pub fn covers(&self, date: NaiveDate, start: u32, end: u32) -> bool {
        self.windows_on(date)
            .iter()
            .any(|&(open, close)| start >= open && end <= close)
    }

    pub fn to_human_readable(&self) -> String {
        if self.windows.is_empty() {
            return String::new();
        }

        let mut sorted = self.windows.clone();
        sorted.sort_by_key(|w| {
            let day = parse_weekday(&w.day)
                .map(|d| d.num_days_from_monday())
                .unwrap_or(7);
            (day, time::to_minutes(&w.start).unwrap_or(0))
        });

        sorted
            .iter()
            .map(|w| format!("{}: {}-{}", capitalize(&w.day), w.start, w.end))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

fn parse_weekday(s: &str) -> Result<Weekday, TimeError> {
    match s.to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(TimeError::InvalidWeekday(s.to_string())),
    }
}
