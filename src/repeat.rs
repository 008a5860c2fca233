use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{MonthOverflow, RepeatRule, Settings, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Maximum cursor advances per source. Hitting it truncates the projection silently.
    pub ceiling: u32,
    pub month_overflow: MonthOverflow,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ProjectionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            ceiling: settings.projection_ceiling,
            month_overflow: settings.month_overflow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Active,
    Deleted,
}

/// Real tasks keyed by `(date, title)`. A hit at a projected slot halts that source's projection.
#[derive(Debug, Default)]
pub struct BlockingIndex {
    slots: HashMap<(NaiveDate, String), SlotState>,
}

impl BlockingIndex {
    pub fn build<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut slots = HashMap::new();
        for task in tasks {
            let state = if task.is_trashed() {
                SlotState::Deleted
            } else {
                SlotState::Active
            };
            slots
                .entry((task.date, task.title.clone()))
                .and_modify(|existing| {
                    if state == SlotState::Active {
                        *existing = SlotState::Active;
                    }
                })
                .or_insert(state);
        }
        Self { slots }
    }

    pub fn lookup(&self, date: NaiveDate, title: &str) -> Option<SlotState> {
        self.slots.get(&(date, title.to_string())).copied()
    }

    pub fn blocks(&self, date: NaiveDate, title: &str) -> bool {
        self.lookup(date, title).is_some()
    }
}

/// Dates in `[window_start, window_end]` that should show a virtual occurrence of `source`.
///
/// The source's own date is the first (real) occurrence and is never included. Walking stops at
/// the first slot that collides with a real task of the same title, whether that task is active
/// or trashed, and nothing after the collision is produced.
pub fn project(
    source: &Task,
    window_start: NaiveDate,
    window_end: NaiveDate,
    index: &BlockingIndex,
    options: ProjectionOptions,
) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    if !source.repeat.is_recurring() || window_end < window_start {
        return dates;
    }

    let anchor_day = source.date.day();
    let mut cursor = source.date;
    let mut steps = 0;
    loop {
        if steps >= options.ceiling {
            log::debug!(
                "projection truncated source={} ceiling={} last={}",
                source.id,
                options.ceiling,
                cursor
            );
            break;
        }
        steps += 1;

        cursor = match advance(cursor, anchor_day, &source.repeat, options.month_overflow) {
            Some(next) => next,
            None => break,
        };
        if index.blocks(cursor, &source.title) {
            break;
        }
        if cursor > window_end {
            break;
        }
        if cursor >= window_start {
            dates.insert(cursor);
        }
    }
    dates
}

/// Where a date sits in the series of one recurrence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Projected as a virtual occurrence.
    Open,
    /// A step of the series that a real row already holds.
    Held(SlotState),
    /// Off the series grid, or cut off by an earlier collision or the ceiling.
    Unreachable,
}

/// Classifies `date` against the walk `project` would take for `source`. A date is `Open` exactly
/// when a window containing it would project it.
pub fn slot_at(
    source: &Task,
    date: NaiveDate,
    index: &BlockingIndex,
    options: ProjectionOptions,
) -> Slot {
    if !source.repeat.is_recurring() || date <= source.date {
        return Slot::Unreachable;
    }
    let anchor_day = source.date.day();
    let mut cursor = source.date;
    for _ in 0..options.ceiling {
        cursor = match advance(cursor, anchor_day, &source.repeat, options.month_overflow) {
            Some(next) => next,
            None => return Slot::Unreachable,
        };
        if cursor > date {
            return Slot::Unreachable;
        }
        let held = index.lookup(cursor, &source.title);
        if cursor == date {
            return held.map_or(Slot::Open, Slot::Held);
        }
        if held.is_some() {
            return Slot::Unreachable;
        }
    }
    Slot::Unreachable
}

/// Convenience wrapper that builds the blocking index from `all_tasks` first.
pub fn project_with_tasks(
    source: &Task,
    window_start: NaiveDate,
    window_end: NaiveDate,
    all_tasks: &[Task],
    options: ProjectionOptions,
) -> BTreeSet<NaiveDate> {
    let index = BlockingIndex::build(all_tasks);
    project(source, window_start, window_end, &index, options)
}

/// One recurrence step from `cursor`. `None` when the rule does not repeat or the calendar ends.
pub fn advance(
    cursor: NaiveDate,
    anchor_day: u32,
    repeat: &RepeatRule,
    overflow: MonthOverflow,
) -> Option<NaiveDate> {
    match repeat {
        RepeatRule::None => None,
        RepeatRule::Daily { interval } => {
            cursor.checked_add_signed(Duration::days(i64::from((*interval).max(1))))
        }
        RepeatRule::Monthly => match overflow {
            MonthOverflow::Rollover => next_month_day(cursor, cursor.day(), overflow),
            MonthOverflow::Clamp => next_month_day(cursor, anchor_day, overflow),
        },
    }
}

fn next_month_day(date: NaiveDate, day: u32, overflow: MonthOverflow) -> Option<NaiveDate> {
    let mut year = date.year();
    let mut month = date.month() + 1;
    if month > 12 {
        month = 1;
        year += 1;
    }
    let last_day = last_day_of_month(year, month)?;
    if day <= last_day {
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    let last = NaiveDate::from_ymd_opt(year, month, last_day)?;
    match overflow {
        MonthOverflow::Clamp => Some(last),
        MonthOverflow::Rollover => {
            last.checked_add_signed(Duration::days(i64::from(day - last_day)))
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first_next| first_next.pred_opt())
        .map(|last| last.day())
}
