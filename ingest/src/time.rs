pub trait TimeSource {
    // Return an RFC 3339 timestamp
    fn current_time(&self) -> String;
    // Seconds since the unix epoch, as used by signed auth headers
    fn now_unix(&self) -> f64;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn current_time(&self) -> String {
        let time = time::OffsetDateTime::now_utc();

        time.format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| time.unix_timestamp().to_string())
    }

    fn now_unix(&self) -> f64 {
        time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
    }
}

/// Render unix seconds as RFC 3339, empty when out of range.
pub fn format_unix(secs: f64) -> String {
    let nanos = (secs * 1e9) as i128;
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct FixedTime {
    pub unix: f64,
}

impl TimeSource for FixedTime {
    fn current_time(&self) -> String {
        format_unix(self.unix)
    }

    fn now_unix(&self) -> f64 {
        self.unix
    }
}
