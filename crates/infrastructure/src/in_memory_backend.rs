use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use taskforge_core::config::InMemoryBackendConfig;
use taskforge_core::models::TaskDefinition;
use taskforge_core::traits::ExecutionBackend;
use taskforge_core::{EngineError, EngineResult};

/// 进程内执行后端
///
/// 所有队列共用一个FIFO，领取时按过滤条件顺序扫描，保证同一队列内先进先出。
/// ETA未到的任务放在按到期时间排序的延迟集合中，领取时再提升到FIFO尾部。
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    config: InMemoryBackendConfig,
}

#[derive(Debug, Default)]
struct BackendState {
    ready: VecDeque<TaskDefinition>,
    /// (到期毫秒, 序号) -> 定义；序号保证同一时刻到期的任务保持提交顺序
    delayed: BTreeMap<(i64, u64), TaskDefinition>,
    inflight: HashMap<String, TaskDefinition>,
    sequence: u64,
}

impl BackendState {
    fn depth(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now_ms {
                break;
            }
            let definition = entry.remove();
            debug!("延迟任务到期，进入就绪队列: {}", definition.id);
            self.ready.push_back(definition);
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryBackendConfig::default())
    }
}

impl InMemoryBackend {
    pub fn new(config: InMemoryBackendConfig) -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            config,
        }
    }

    /// 已领取但尚未确认的任务数量
    pub async fn inflight_count(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn enqueue(&self, definition: &TaskDefinition) -> EngineResult<()> {
        let mut state = self.state.lock().await;

        if self.config.max_queue_size > 0 && state.depth() >= self.config.max_queue_size {
            warn!(
                "内存队列已满，拒绝任务 {} (容量: {})",
                definition.id, self.config.max_queue_size
            );
            return Err(EngineError::QueueFull {
                queue: definition.queue.clone(),
                capacity: self.config.max_queue_size,
            });
        }

        match definition.eta {
            Some(eta) if eta > Utc::now() => {
                state.sequence += 1;
                let key = (eta.timestamp_millis(), state.sequence);
                state.delayed.insert(key, definition.clone());
                debug!("任务 {} 进入延迟集合，ETA: {}", definition.id, eta);
            }
            _ => {
                state.ready.push_back(definition.clone());
                debug!("任务 {} 进入就绪队列 {}", definition.id, definition.queue);
            }
        }

        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        task_types: &[String],
    ) -> EngineResult<Option<TaskDefinition>> {
        let mut state = self.state.lock().await;
        state.promote_due(Utc::now());

        let Some(position) = state
            .ready
            .iter()
            .position(|definition| definition.matches(queues, task_types))
        else {
            return Ok(None);
        };

        let Some(definition) = state.ready.remove(position) else {
            return Ok(None);
        };
        state
            .inflight
            .insert(definition.id.clone(), definition.clone());

        Ok(Some(definition))
    }

    async fn ack(&self, task_id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if state.inflight.remove(task_id).is_none() {
            debug!("确认未知的在途任务: {}", task_id);
        }
        Ok(())
    }

    async fn nack(&self, task_id: &str, error: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if state.inflight.remove(task_id).is_some() {
            debug!("任务 {} 处理失败: {}", task_id, error);
        }
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> EngineResult<bool> {
        let mut state = self.state.lock().await;

        if let Some(position) = state.ready.iter().position(|d| d.id == task_id) {
            state.ready.remove(position);
            return Ok(true);
        }

        let delayed_key = state
            .delayed
            .iter()
            .find(|(_, definition)| definition.id == task_id)
            .map(|(key, _)| *key);
        if let Some(key) = delayed_key {
            state.delayed.remove(&key);
            return Ok(true);
        }

        Ok(false)
    }

    async fn depth(&self) -> EngineResult<usize> {
        Ok(self.state.lock().await.depth())
    }
}
