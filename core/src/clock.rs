//! Reward clock: maps wall-clock instants onto reward-days.
//!
//! A reward-day runs from the cutoff hour of one local day to the cutoff
//! hour of the next, in a fixed anchor timezone. The day is labelled with
//! the local date of the cutoff that closes it: with a 20:00 cutoff,
//! 21:00 on the 19th already belongs to reward-day the 20th.
//!
//! Every caller reads periods from here. Nothing else does calendar math.

use crate::config::ClockConfig;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;

/// Source of "now". Components never call `Utc::now()` directly.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and replay tooling.
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// One reward-day, expressed as absolute UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardPeriod {
    pub reward_date:  NaiveDate,
    pub period_start: DateTime<Utc>,
    pub period_end:   DateTime<Utc>,
}

impl RewardPeriod {
    pub fn next_reset(&self) -> DateTime<Utc> {
        self.period_end
    }

    /// Half-open: `[period_start, period_end)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_start && at < self.period_end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RewardClock {
    tz:          Tz,
    cutoff_hour: u32,
}

impl RewardClock {
    pub fn new(tz: Tz, cutoff_hour: u32) -> anyhow::Result<Self> {
        if cutoff_hour > 23 {
            anyhow::bail!("cutoff_hour must be 0-23, got {cutoff_hour}");
        }
        Ok(Self { tz, cutoff_hour })
    }

    pub fn from_config(config: &ClockConfig) -> anyhow::Result<Self> {
        let tz = config
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {e}", config.timezone))?;
        Self::new(tz, config.cutoff_hour)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The reward-day containing `now`.
    pub fn period_at(&self, now: DateTime<Utc>) -> RewardPeriod {
        self.period_for_date(self.reward_date(now))
    }

    pub fn reward_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();
        if local.hour() < self.cutoff_hour {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// The period labelled `reward_date`: `[cutoff(date - 1), cutoff(date))`.
    pub fn period_for_date(&self, reward_date: NaiveDate) -> RewardPeriod {
        RewardPeriod {
            reward_date,
            period_start: self.cutoff_instant(reward_date - Duration::days(1)),
            period_end:   self.cutoff_instant(reward_date),
        }
    }

    /// Bounds of the reward-month containing `now`: from the start of the
    /// reward-day labelled the 1st to the start of next month's 1st.
    pub fn month_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = self.reward_date(now);
        let first = first_of_month(date.year(), date.month());
        let next_first = if date.month() == 12 {
            first_of_month(date.year() + 1, 1)
        } else {
            first_of_month(date.year(), date.month() + 1)
        };
        (
            self.period_for_date(first).period_start,
            self.period_for_date(next_first).period_start,
        )
    }

    fn cutoff_instant(&self, local_date: NaiveDate) -> DateTime<Utc> {
        let naive = local_date
            .and_hms_opt(self.cutoff_hour, 0, 0)
            .unwrap_or_else(|| local_date.and_time(chrono::NaiveTime::MIN));
        self.resolve_local(naive)
    }

    fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // DST gap: the wall-clock hour does not exist, use the first
            // instant after it.
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> RewardClock {
        RewardClock::new(chrono_tz::America::Sao_Paulo, 20).unwrap()
    }

    /// São Paulo has been UTC-3 all year since 2019.
    fn sp(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap() + Duration::hours(3)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn out_of_range_cutoff_is_an_error() {
        assert!(RewardClock::new(chrono_tz::America::Sao_Paulo, 24).is_err());
    }

    #[test]
    fn before_cutoff_belongs_to_today() {
        let period = clock().period_at(sp(2026, 10, 19, 19, 59, 59));
        assert_eq!(period.reward_date, date(2026, 10, 19));
        assert_eq!(period.period_start, Utc.with_ymd_and_hms(2026, 10, 18, 23, 0, 0).unwrap());
        assert_eq!(period.period_end, Utc.with_ymd_and_hms(2026, 10, 19, 23, 0, 0).unwrap());
        assert_eq!(period.next_reset(), period.period_end);
    }

    #[test]
    fn at_or_after_cutoff_belongs_to_tomorrow() {
        let c = clock();
        let before = c.period_at(sp(2026, 10, 19, 19, 59, 59));
        let after = c.period_at(sp(2026, 10, 19, 20, 0, 1));
        assert_ne!(before, after);
        assert_eq!(after.reward_date, date(2026, 10, 20));
        assert_eq!(after.period_start, before.period_end);
        assert!(after.contains(sp(2026, 10, 19, 20, 0, 0)));
        assert!(!before.contains(sp(2026, 10, 19, 20, 0, 0)));
    }

    #[test]
    fn period_ignores_caller_timezone() {
        // 02:00 UTC on the 20th is 23:00 on the 19th in São Paulo.
        let period = clock().period_at(Utc.with_ymd_and_hms(2026, 10, 20, 2, 0, 0).unwrap());
        assert_eq!(period.reward_date, date(2026, 10, 20));
    }

    #[test]
    fn month_bounds_follow_reward_days() {
        let c = clock();
        // 21:00 on Oct 31 is already reward-day Nov 1.
        let (start, end) = c.month_bounds(sp(2026, 10, 31, 21, 0, 0));
        assert_eq!(start, sp(2026, 10, 31, 20, 0, 0));
        assert_eq!(end, sp(2026, 11, 30, 20, 0, 0));

        let (start, end) = c.month_bounds(sp(2026, 12, 15, 12, 0, 0));
        assert_eq!(start, sp(2026, 11, 30, 20, 0, 0));
        assert_eq!(end, sp(2026, 12, 31, 20, 0, 0));
    }

    #[test]
    fn manual_time_source_advances() {
        let t = ManualTimeSource::new(sp(2026, 1, 1, 10, 0, 0));
        t.advance(Duration::minutes(90));
        assert_eq!(t.now(), sp(2026, 1, 1, 11, 30, 0));
    }
}
