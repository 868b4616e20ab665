use std::collections::HashSet;

use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};

use crate::alarm::model::{Alarm, AlarmRecord};
use crate::error::{AlarmError, AlarmResult};

/// The next instant an enabled alarm will ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFire {
    pub at: DateTime<Local>,
    pub alarm: Alarm,
}

/// `(hour, minute)` pairs that already rang on a given calendar day.
#[derive(Debug, Clone, Default)]
pub struct TriggerMemory {
    day: Option<NaiveDate>,
    fired: HashSet<(u8, u8)>,
}

impl TriggerMemory {
    pub fn contains(&self, day: NaiveDate, hour: u8, minute: u8) -> bool {
        self.day == Some(day) && self.fired.contains(&(hour, minute))
    }

    /// Records a ring. Entries from an earlier day are dropped first.
    pub fn mark(&mut self, day: NaiveDate, hour: u8, minute: u8) {
        if self.day != Some(day) {
            self.fired.clear();
            self.day = Some(day);
        }
        self.fired.insert((hour, minute));
    }

    pub fn clear(&mut self) {
        self.fired.clear();
        self.day = None;
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// The managed alarm set plus its derived next-fire list.
///
/// Every mutation takes the current instant and recomputes the next-fire
/// list before returning, so `next_fires` never lags behind `alarms`.
#[derive(Debug, Clone, Default)]
pub struct AlarmSchedule {
    alarms: Vec<Alarm>,
    next_fires: Vec<ScheduledFire>,
    triggers: TriggerMemory,
}

impl AlarmSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alarms(alarms: Vec<Alarm>, now: DateTime<Local>) -> AlarmResult<Self> {
        let mut schedule = Self::new();
        for alarm in alarms {
            schedule.insert(alarm)?;
        }
        schedule.reschedule(now);
        Ok(schedule)
    }

    pub fn add(&mut self, alarm: Alarm, now: DateTime<Local>) -> AlarmResult<()> {
        self.insert(alarm)?;
        self.reschedule(now);
        Ok(())
    }

    /// Removes every alarm equal to one in `targets`, returning how many went.
    pub fn remove(&mut self, targets: &HashSet<Alarm>, now: DateTime<Local>) -> usize {
        let before = self.alarms.len();
        self.alarms.retain(|alarm| !targets.contains(alarm));
        self.reschedule(now);
        before - self.alarms.len()
    }

    pub fn set_enabled(
        &mut self,
        target: &Alarm,
        enabled: bool,
        now: DateTime<Local>,
    ) -> AlarmResult<()> {
        let Some(alarm) = self.alarms.iter_mut().find(|alarm| *alarm == target) else {
            return Err(AlarmError::NotFound {
                hour: target.hour(),
                minute: target.minute(),
                name: target.name().to_string(),
            });
        };
        alarm.set_enabled(enabled);
        self.reschedule(now);
        Ok(())
    }

    /// Recomputes the sorted next-fire list for all enabled alarms.
    pub fn reschedule(&mut self, now: DateTime<Local>) -> &[ScheduledFire] {
        let mut fires = self
            .alarms
            .iter()
            .filter(|alarm| alarm.enabled())
            .filter_map(|alarm| {
                next_fire_in_tz(alarm, &now, &Local).map(|at| ScheduledFire {
                    at,
                    alarm: alarm.clone(),
                })
            })
            .collect::<Vec<_>>();
        fires.sort_by(|left, right| {
            left.at
                .cmp(&right.at)
                .then_with(|| left.alarm.name().cmp(right.alarm.name()))
        });
        self.next_fires = fires;
        &self.next_fires
    }

    /// Enabled alarms whose wall-clock minute matches `now` and have not
    /// rung yet today. Does not consult the next-fire list.
    pub fn due(&self, now: DateTime<Local>) -> Vec<Alarm> {
        let today = now.date_naive();
        let (hour, minute) = (now.hour() as u8, now.minute() as u8);
        self.alarms
            .iter()
            .filter(|alarm| alarm.enabled())
            .filter(|alarm| alarm.hour() == hour && alarm.minute() == minute)
            .filter(|alarm| !self.triggers.contains(today, hour, minute))
            .cloned()
            .collect()
    }

    pub fn mark_fired(&mut self, alarm: &Alarm, now: DateTime<Local>) {
        self.triggers
            .mark(now.date_naive(), alarm.hour(), alarm.minute());
    }

    pub fn clear_triggers(&mut self) {
        self.triggers.clear();
    }

    pub fn triggers(&self) -> &TriggerMemory {
        &self.triggers
    }

    pub fn next_fires(&self) -> &[ScheduledFire] {
        &self.next_fires
    }

    pub fn next_fire_for(&self, alarm: &Alarm) -> Option<DateTime<Local>> {
        self.next_fires
            .iter()
            .find(|fire| fire.alarm == *alarm)
            .map(|fire| fire.at)
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn export_records(&self) -> Vec<AlarmRecord> {
        self.alarms.iter().map(AlarmRecord::from).collect()
    }

    fn insert(&mut self, alarm: Alarm) -> AlarmResult<()> {
        if self.alarms.contains(&alarm) {
            return Err(AlarmError::Duplicate {
                hour: alarm.hour(),
                minute: alarm.minute(),
                name: alarm.name().to_string(),
            });
        }
        self.alarms.push(alarm);
        Ok(())
    }
}

fn resolve_local_datetime<Tz>(timezone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, _second) => Some(first),
        LocalResult::None => None,
    }
}

/// Today's occurrence of the alarm if it is still ahead of `now`, otherwise
/// the following day's. Local times skipped by a DST jump move to the next
/// day that has them.
pub(crate) fn next_fire_in_tz<Tz>(
    alarm: &Alarm,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let time = alarm.time();
    for day_offset in 0_u64..3 {
        let date = now.date_naive().checked_add_days(Days::new(day_offset))?;
        let Some(candidate) = resolve_local_datetime(timezone, date.and_time(time)) else {
            continue;
        };
        if candidate > *now {
            return Some(candidate);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimeDisplayMode {
    Hour24,
    Hour12,
}

pub fn format_next_fire(next: Option<DateTime<Local>>, mode: TimeDisplayMode) -> String {
    match next {
        Some(dt) => match mode {
            TimeDisplayMode::Hour24 => format!(
                "{:02}.{:02}.{:04} {:02}:{:02}",
                dt.day(),
                dt.month(),
                dt.year(),
                dt.hour(),
                dt.minute()
            ),
            TimeDisplayMode::Hour12 => {
                let (is_pm, hour12) = dt.hour12();
                let meridiem = if is_pm { "PM" } else { "AM" };
                format!(
                    "{:02}.{:02}.{:04} {:02}:{:02} {}",
                    dt.day(),
                    dt.month(),
                    dt.year(),
                    hour12,
                    dt.minute(),
                    meridiem
                )
            }
        },
        None => "-".to_string(),
    }
}
