use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use taskforge_core::models::{QueueStats, TaskDefinition, TaskResult, TaskStatus};

/// 一条任务记录：提交时的定义与当前执行记录
#[derive(Debug, Clone)]
pub(crate) struct TaskEntry {
    pub definition: TaskDefinition,
    pub result: TaskResult,
}

/// 有界历史，超出容量时淘汰最早进入的记录
#[derive(Debug)]
pub(crate) struct History {
    entries: HashMap<String, TaskEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, entry: TaskEntry) {
        let id = entry.result.task_id.clone();
        if self.entries.insert(id.clone(), entry).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskEntry> {
        self.entries.get(id)
    }

    fn evict_finished_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry
                .result
                .completed_at
                .map_or(true, |completed_at| completed_at >= cutoff)
        });
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn results(&self) -> impl Iterator<Item = &TaskResult> {
        self.entries.values().map(|entry| &entry.result)
    }
}

/// 队列门面持有的全部任务状态，只能在门面的锁内访问
#[derive(Debug)]
pub(crate) struct TaskStore {
    active: HashMap<String, TaskEntry>,
    completed: History,
    /// 失败与已取消的记录
    failed: History,
    cancel_signals: HashMap<String, watch::Sender<bool>>,
}

impl TaskStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            active: HashMap::new(),
            completed: History::new(max_history),
            failed: History::new(max_history),
            cancel_signals: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn insert_active(&mut self, entry: TaskEntry) {
        self.active.insert(entry.result.task_id.clone(), entry);
    }

    pub fn remove_active(&mut self, id: &str) -> Option<TaskEntry> {
        self.cancel_signals.remove(id);
        self.active.remove(id)
    }

    pub fn active_mut(&mut self, id: &str) -> Option<&mut TaskEntry> {
        self.active.get_mut(id)
    }

    /// 依次查找活跃集合、完成历史、失败历史
    pub fn find(&self, id: &str) -> Option<&TaskEntry> {
        self.active
            .get(id)
            .or_else(|| self.completed.get(id))
            .or_else(|| self.failed.get(id))
    }

    pub fn failed_entry(&self, id: &str) -> Option<&TaskEntry> {
        self.failed.get(id)
    }

    /// 把已进入终态的记录移出活跃集合
    pub fn archive(&mut self, id: &str) {
        let Some(entry) = self.remove_active(id) else {
            return;
        };
        match entry.result.status {
            TaskStatus::Completed => self.completed.push(entry),
            _ => self.failed.push(entry),
        }
    }

    pub fn open_cancel_signal(&mut self, id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancel_signals.insert(id.to_string(), tx);
        rx
    }

    /// 向运行中的任务发送取消信号
    pub fn signal_cancel(&mut self, id: &str) {
        if let Some(tx) = self.cancel_signals.remove(id) {
            tx.send_replace(true);
        }
    }

    pub fn evict_finished_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        self.completed.evict_finished_before(cutoff) + self.failed.evict_finished_before(cutoff)
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for status in TaskStatus::ALL {
            stats.by_status.insert(status.as_str().to_string(), 0);
        }

        let all = self
            .active
            .values()
            .map(|entry| &entry.result)
            .chain(self.completed.results())
            .chain(self.failed.results());

        for result in all {
            stats.total_tasks += 1;
            *stats
                .by_status
                .entry(result.status.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_function
                .entry(result.function_name.clone())
                .or_insert(0) += 1;

            match result.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Retrying => {
                    stats.pending += 1;
                    stats.retrying += 1;
                }
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }

        let durations: Vec<u64> = self
            .completed
            .results()
            .filter_map(|result| result.execution_time_ms)
            .collect();
        if !durations.is_empty() {
            let total: u64 = durations.iter().sum();
            stats.average_duration_ms = Some(total as f64 / durations.len() as f64);
            stats.min_duration_ms = durations.iter().min().copied();
            stats.max_duration_ms = durations.iter().max().copied();
        }

        stats
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn history_len(&self) -> (usize, usize) {
        (self.completed.len(), self.failed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(id: &str) -> TaskEntry {
        let definition = TaskDefinition::new("work").with_id(id);
        let result = TaskResult::pending(&definition);
        TaskEntry { definition, result }
    }

    fn finished(id: &str, completed: bool) -> TaskEntry {
        let mut entry = entry(id);
        entry.result.mark_running("w1").unwrap();
        if completed {
            entry.result.mark_completed(json!(null)).unwrap();
        } else {
            entry
                .result
                .mark_failed(&taskforge_core::EngineError::handler("boom"))
                .unwrap();
        }
        entry
    }

    #[test]
    fn test_history_is_bounded() {
        let mut store = TaskStore::new(2);
        for i in 0..3 {
            let id = format!("t{i}");
            store.insert_active(finished(&id, true));
            store.archive(&id);
        }

        assert_eq!(store.history_len(), (2, 0));
        assert!(store.find("t0").is_none());
        assert!(store.find("t2").is_some());
    }

    #[test]
    fn test_archive_routes_by_status() {
        let mut store = TaskStore::new(10);
        store.insert_active(finished("ok", true));
        store.insert_active(finished("bad", false));
        store.archive("ok");
        store.archive("bad");

        assert_eq!(store.active_len(), 0);
        assert_eq!(store.history_len(), (1, 1));
        assert!(store.failed_entry("bad").is_some());
        assert!(store.failed_entry("ok").is_none());
    }

    #[test]
    fn test_eviction_leaves_active_records() {
        let mut store = TaskStore::new(10);
        let mut old = finished("old", true);
        old.result.completed_at = Some(Utc::now() - Duration::days(8));
        store.insert_active(old);
        store.archive("old");
        store.insert_active(finished("recent", true));
        store.archive("recent");
        store.insert_active(entry("waiting"));

        let evicted = store.evict_finished_before(Utc::now() - Duration::days(7));

        assert_eq!(evicted, 1);
        assert!(store.find("old").is_none());
        assert!(store.find("recent").is_some());
        assert!(store.find("waiting").is_some());
    }

    #[test]
    fn test_stats_counts_and_durations() {
        let mut store = TaskStore::new(10);
        let mut fast = finished("fast", true);
        fast.result.execution_time_ms = Some(10);
        let mut slow = finished("slow", true);
        slow.result.execution_time_ms = Some(30);
        store.insert_active(fast);
        store.insert_active(slow);
        store.archive("fast");
        store.archive("slow");
        store.insert_active(entry("waiting"));

        let stats = store.stats();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.by_status["completed"], 2);
        assert_eq!(stats.by_status["cancelled"], 0);
        assert_eq!(stats.average_duration_ms, Some(20.0));
        assert_eq!(stats.min_duration_ms, Some(10));
        assert_eq!(stats.max_duration_ms, Some(30));
    }

    #[test]
    fn test_cancel_signal_delivered() {
        let mut store = TaskStore::new(10);
        store.insert_active(entry("t"));
        let rx = store.open_cancel_signal("t");

        store.signal_cancel("t");
        assert!(*rx.borrow());
    }
}
