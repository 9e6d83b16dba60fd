use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Timelike, Utc};

use super::snapshot::{CommandCount, CommandStats};

#[derive(Debug)]
struct CounterState {
    total: u64,
    per_command: HashMap<String, u64>,
    last_hour: u64,
    today: u64,
    hour: (NaiveDate, u32),
    day: NaiveDate,
}

/// 命令调用计数
///
/// 在聚合周期之外增量更新，聚合时只读不清零。
/// 小时/天计数按 UTC 整点和零点滚动。
#[derive(Debug)]
pub struct CommandCounters {
    state: Mutex<CounterState>,
}

impl Default for CommandCounters {
    fn default() -> Self {
        Self::new_at(Utc::now())
    }
}

impl CommandCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(CounterState {
                total: 0,
                per_command: HashMap::new(),
                last_hour: 0,
                today: 0,
                hour: (now.date_naive(), now.hour()),
                day: now.date_naive(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn increment(&self, name: &str) {
        self.increment_at(name, Utc::now());
    }

    pub fn increment_at(&self, name: &str, now: DateTime<Utc>) {
        let mut state = self.lock();
        roll(&mut state, now);
        state.total += 1;
        state.last_hour += 1;
        state.today += 1;
        *state.per_command.entry(name.to_string()).or_insert(0) += 1;
    }

    /// 检查整点/零点边界，跨越时清零对应计数
    pub fn roll_over(&self, now: DateTime<Utc>) {
        roll(&mut self.lock(), now);
    }

    pub fn snapshot(&self, top_n: usize) -> CommandStats {
        let state = self.lock();
        let mut top: Vec<CommandCount> = state
            .per_command
            .iter()
            .map(|(name, count)| CommandCount {
                name: name.clone(),
                count: *count,
            })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top.truncate(top_n);

        CommandStats {
            total: state.total,
            last_hour: state.last_hour,
            today: state.today,
            top,
        }
    }
}

fn roll(state: &mut CounterState, now: DateTime<Utc>) {
    let hour = (now.date_naive(), now.hour());
    if hour != state.hour {
        state.hour = hour;
        state.last_hour = 0;
    }
    let day = now.date_naive();
    if day != state.day {
        state.day = day;
        state.today = 0;
    }
}
