//! Time helpers shared by the snapshot policy engine and anything else
//! that needs to bucket timestamps for retention.

use chrono::{DateTime, Datelike, IsoWeek, Timelike, Utc};

pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// The retention bucket a snapshot belongs to, one of the granularities
/// named in `spec.md` §4.10 / §6 (`keep_hourly`, ..., `keep_yearly`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A bucket key: two timestamps fall in the same bucket for a given
/// granularity iff their keys are equal. Opaque and only meaningful for
/// equality/ordering within one granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey(i64, u32);

pub fn bucket_key(ts: Timestamp, granularity: Granularity) -> BucketKey {
    match granularity {
        Granularity::Hourly => BucketKey(ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() / 86_400, ts.hour()),
        Granularity::Daily => BucketKey(ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() / 86_400, 0),
        Granularity::Weekly => {
            let IsoWeek { .. } = ts.iso_week();
            BucketKey(ts.iso_week().year() as i64, ts.iso_week().week())
        }
        Granularity::Monthly => BucketKey(ts.year() as i64, ts.month()),
        Granularity::Yearly => BucketKey(ts.year() as i64, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn same_hour_same_bucket_different_hour_differs() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 1, 10, 45, 0).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 1, 1, 11, 15, 0).unwrap();
        assert_eq!(
            bucket_key(a, Granularity::Hourly),
            bucket_key(b, Granularity::Hourly)
        );
        assert_ne!(
            bucket_key(a, Granularity::Hourly),
            bucket_key(c, Granularity::Hourly)
        );
    }

    #[test]
    fn monthly_bucket_ignores_day() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 28, 23, 0, 0).unwrap();
        assert_eq!(
            bucket_key(a, Granularity::Monthly),
            bucket_key(b, Granularity::Monthly)
        );
    }
}
