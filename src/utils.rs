use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formats a run duration as `h:mm:ss.mmm`, `m:ss.mmm` or `s.mmm seconds`.
pub fn format_human_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    match secs {
        3600.. => format!(
            "{}:{:02}:{:02}.{millis:03} (h:mm:ss.mmm)",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ),
        60.. => format!("{}:{:02}.{millis:03} (m:ss.mmm)", secs / 60, secs % 60),
        _ => format!("{secs}.{millis:03} seconds"),
    }
}

/// Current local time as RFC 3339, falling back to UTC when the offset is unknown.
pub fn local_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formats() {
        assert_eq!(format_human_elapsed(Duration::from_millis(2_345)), "2.345 seconds");
        assert_eq!(format_human_elapsed(Duration::from_millis(61_005)), "1:01.005 (m:ss.mmm)");
        assert_eq!(
            format_human_elapsed(Duration::from_millis(3_723_004)),
            "1:02:03.004 (h:mm:ss.mmm)"
        );
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let stamp = local_timestamp();
        assert!(OffsetDateTime::parse(&stamp, &Rfc3339).is_ok());
    }
}
