//! Start datetime reconstruction from the recorded date/time channels.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use tracing::{info, warn};

use crate::series::MaskedSeries;
use crate::signal::align;
use crate::store::ChannelStore;
use crate::{SplitParams, TimebaseError};

pub const DATETIME_CHANNELS: [&str; 6] = ["Year", "Month", "Day", "Hour", "Minute", "Second"];

/// One datetime field, either recorded per second or a single value taken from the fallback.
enum Field {
    Constant(f64),
    Recorded(MaskedSeries),
}

impl Field {
    fn len(&self) -> usize {
        match self {
            Field::Constant(_) => 1,
            Field::Recorded(series) => series.len(),
        }
    }

    fn at(&self, i: usize) -> Option<f64> {
        match self {
            Field::Constant(v) => Some(*v),
            Field::Recorded(series) => series.get(i),
        }
    }
}

fn fallback_field(fallback: &DateTime<Utc>, name: &str) -> f64 {
    match name {
        "Year" => fallback.year() as f64,
        "Month" => fallback.month() as f64,
        "Day" => fallback.day() as f64,
        "Hour" => fallback.hour() as f64,
        "Minute" => fallback.minute() as f64,
        _ => fallback.second() as f64,
    }
}

fn whole(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.0).then(|| value.round() as u32)
}

fn to_datetime(fields: [f64; 6]) -> Option<DateTime<Utc>> {
    let [year, month, day, hour, minute, second] = fields.map(whole);
    let mut year = year?;
    if year < 100 {
        year += 2000;
    }
    let naive = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month?, day?)?
        .and_hms_opt(hour?, minute?, second?)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Most frequent start-of-data candidate over every second where all fields are valid.
fn most_common_start(fields: &[Field], length: usize) -> Result<DateTime<Utc>, TimebaseError> {
    let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for i in 0..length {
        let mut values = [0.0; 6];
        let mut complete = true;
        for (slot, field) in values.iter_mut().zip(fields) {
            match field.at(i) {
                Some(v) => *slot = v,
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            continue;
        }
        let start = to_datetime(values).and_then(|dt| {
            let elapsed = Duration::try_seconds(i64::try_from(i).ok()?)?;
            dt.checked_sub_signed(elapsed)
        });
        if let Some(start) = start {
            *counts.entry(start).or_default() += 1;
        }
    }

    let mut best: Option<(DateTime<Utc>, usize)> = None;
    for (dt, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((dt, count));
        }
    }
    best.map(|(dt, _)| dt).ok_or_else(|| {
        TimebaseError::InvalidTimestamp("no second has a complete, valid date and time".into())
    })
}

/// Datetime at the first sample of the recording.
///
/// `fallback` fills in fields the recording does not carry and must be no later than `now`.
/// A timebase in the future is pulled back a day when `Day` is not recorded, then a year when
/// `Year` is not recorded.
pub fn calculate_start_datetime<S: ChannelStore + ?Sized>(
    store: &S,
    fallback: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    params: &SplitParams,
) -> Result<DateTime<Utc>, TimebaseError> {
    if let Some(fallback) = fallback {
        if fallback > now {
            return Err(TimebaseError::FallbackInFuture { fallback, now });
        }
    }

    let mut fields = Vec::with_capacity(DATETIME_CHANNELS.len());
    for name in DATETIME_CHANNELS {
        if let Some(channel) = store.get(name) {
            // no interpolation, so rollovers never produce in-between values
            let aligned = align(channel, 1.0, 0.0, false);
            let all_zero = aligned.max_valid() == Some(0.0) && aligned.min_valid() == Some(0.0);
            if aligned.valid_count() == 0 || all_zero {
                warn!("No valid values returned for {}", name);
            } else {
                fields.push(Field::Recorded(aligned));
                continue;
            }
        }
        match fallback.as_ref() {
            Some(fallback) => {
                let value = fallback_field(fallback, name);
                warn!(
                    "{} not available, using {} from fallback datetime {}",
                    name, value, fallback
                );
                fields.push(Field::Constant(value));
            }
            None => return Err(TimebaseError::MissingParameter(name.to_string())),
        }
    }

    let length = fields.iter().map(Field::len).max().unwrap_or(1);
    if let Some(field) = fields.iter().find(|f| f.len() != 1 && f.len() != length) {
        return Err(TimebaseError::InvalidTimestamp(format!(
            "aligned date/time channels differ in length ({} and {})",
            field.len(),
            length
        )));
    }
    let timebase = most_common_start(&fields, length)?;

    let timebase = if timebase > now {
        pull_back_from_future(store, timebase, now)?
    } else {
        timebase
    };

    if let Some(days) = params.max_timebase_age_days {
        // an age limit reaching before the earliest representable date is no limit at all
        let oldest =
            Duration::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age));
        if oldest.is_some_and(|oldest| timebase < oldest) {
            return Err(TimebaseError::TooOld {
                timebase,
                max_age_days: days,
            });
        }
    }
    Ok(timebase)
}

fn pull_back_from_future<S: ChannelStore + ?Sized>(
    store: &S,
    timebase: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimebaseError> {
    if !store.contains("Day") {
        if let Some(a_day_before) = timebase.checked_sub_signed(Duration::days(1)) {
            if a_day_before < now {
                info!("Timebase was in the future, using a day before: {}", a_day_before);
                return Ok(a_day_before);
            }
        }
    }
    if !store.contains("Year") {
        if let Some(a_year_before) = timebase.checked_sub_months(Months::new(12)) {
            if a_year_before < now {
                info!("Timebase was in the future, using a year before: {}", a_year_before);
                return Ok(a_year_before);
            }
        }
    }
    Err(TimebaseError::InFuture(timebase))
}
