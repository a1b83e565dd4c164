use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::time::Duration;
use tracing::{debug, warn};

use taskforge_core::config::RedisConfig;
use taskforge_core::models::TaskDefinition;
use taskforge_core::traits::ExecutionBackend;
use taskforge_core::{EngineError, EngineResult};

/// 基于Redis的执行后端
///
/// 键布局（`prefix` 取自配置）：
///
/// - `{prefix}:queue:{name}`  就绪任务列表，每个队列一个，RPUSH入队、LPOP出队
/// - `{prefix}:delayed`       延迟任务有序集合，score为ETA毫秒
/// - `{prefix}:queues`        已知队列名集合
/// - `{prefix}:pending`       未领取任务 id -> JSON，用于撤回
/// - `{prefix}:inflight`      已领取未确认任务 id -> JSON
///
/// 顺序说明：出队时不匹配 `task_types` 过滤条件的条目会被LPOP后重新RPUSH到队尾，
/// 因此排到之后提交的任务后面；在弹出与放回之间，其它Worker看不到该条目。
/// 使用任务类型过滤时，同一队列内只保证近似FIFO。
pub struct RedisBackend {
    connection: ConnectionManager,
    prefix: String,
}

fn redis_error(context: &str, error: RedisError) -> EngineError {
    EngineError::Backend(format!("{context}: {error}"))
}

impl RedisBackend {
    /// 建立连接并执行PING，单次尝试；重试由调用方负责
    pub async fn connect(config: &RedisConfig) -> EngineResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| EngineError::BackendUnavailable(format!("创建Redis客户端失败: {e}")))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut connection = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                EngineError::BackendUnavailable(format!(
                    "连接Redis超时 ({}秒): {}",
                    config.connection_timeout_seconds, config.url
                ))
            })?
            .map_err(|e| EngineError::BackendUnavailable(format!("连接Redis失败: {e}")))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| EngineError::BackendUnavailable(format!("Redis PING失败: {e}")))?;
        if pong != "PONG" {
            return Err(EngineError::BackendUnavailable(format!(
                "意外的PING响应: {pong}"
            )));
        }

        debug!("已连接Redis: {}", config.url);
        Ok(Self {
            connection,
            prefix: config.key_prefix.clone(),
        })
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    /// 把已到期的延迟任务移入各自的就绪列表
    ///
    /// ZREM成功的一方才负责推入，多个进程同时提升时不会重复。
    async fn promote_due(&self, conn: &mut ConnectionManager) -> EngineResult<()> {
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), "-inf", now_ms)
            .await
            .map_err(|e| redis_error("读取延迟任务失败", e))?;

        for payload in due {
            let removed: i64 = conn
                .zrem(self.delayed_key(), &payload)
                .await
                .map_err(|e| redis_error("移除延迟任务失败", e))?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<TaskDefinition>(&payload) {
                Ok(definition) => {
                    let _: () = conn
                        .rpush(self.queue_key(&definition.queue), &payload)
                        .await
                        .map_err(|e| redis_error("推入就绪队列失败", e))?;
                }
                Err(e) => warn!("丢弃无法解析的延迟任务: {}", e),
            }
        }

        Ok(())
    }

    async fn subscribed_queues(
        &self,
        conn: &mut ConnectionManager,
        queues: &[String],
    ) -> EngineResult<Vec<String>> {
        if !queues.is_empty() {
            return Ok(queues.to_vec());
        }

        let mut known: Vec<String> = conn
            .smembers(self.queues_key())
            .await
            .map_err(|e| redis_error("读取队列列表失败", e))?;
        known.sort();
        Ok(known)
    }
}

#[async_trait]
impl ExecutionBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, definition: &TaskDefinition) -> EngineResult<()> {
        let payload = serde_json::to_string(definition)?;
        let mut conn = self.connection.clone();

        let _: () = conn
            .sadd(self.queues_key(), &definition.queue)
            .await
            .map_err(|e| redis_error("登记队列失败", e))?;
        let _: () = conn
            .hset(self.pending_key(), &definition.id, &payload)
            .await
            .map_err(|e| redis_error("登记任务失败", e))?;

        match definition.eta {
            Some(eta) if eta > Utc::now() => {
                let _: () = conn
                    .zadd(self.delayed_key(), &payload, eta.timestamp_millis())
                    .await
                    .map_err(|e| redis_error("写入延迟任务失败", e))?;
            }
            _ => {
                let _: () = conn
                    .rpush(self.queue_key(&definition.queue), &payload)
                    .await
                    .map_err(|e| redis_error("写入就绪队列失败", e))?;
            }
        }

        debug!("任务 {} 已写入Redis队列 {}", definition.id, definition.queue);
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        task_types: &[String],
    ) -> EngineResult<Option<TaskDefinition>> {
        let mut conn = self.connection.clone();
        self.promote_due(&mut conn).await?;

        for queue in self.subscribed_queues(&mut conn, queues).await? {
            let key = self.queue_key(&queue);
            let length: usize = conn
                .llen(&key)
                .await
                .map_err(|e| redis_error("读取队列长度失败", e))?;

            // 不匹配的条目放回队尾，最多轮转一圈
            for _ in 0..length {
                let payload: Option<String> = conn
                    .lpop(&key, None)
                    .await
                    .map_err(|e| redis_error("弹出任务失败", e))?;
                let Some(payload) = payload else {
                    break;
                };

                let definition: TaskDefinition = match serde_json::from_str(&payload) {
                    Ok(definition) => definition,
                    Err(e) => {
                        warn!("丢弃无法解析的任务: {}", e);
                        continue;
                    }
                };

                if !definition.matches(&[], task_types) {
                    let _: () = conn
                        .rpush(&key, &payload)
                        .await
                        .map_err(|e| redis_error("放回任务失败", e))?;
                    continue;
                }

                let _: () = conn
                    .hdel(self.pending_key(), &definition.id)
                    .await
                    .map_err(|e| redis_error("清除待领取记录失败", e))?;
                let _: () = conn
                    .hset(self.inflight_key(), &definition.id, &payload)
                    .await
                    .map_err(|e| redis_error("记录在途任务失败", e))?;

                return Ok(Some(definition));
            }
        }

        Ok(None)
    }

    async fn ack(&self, task_id: &str) -> EngineResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .hdel(self.inflight_key(), task_id)
            .await
            .map_err(|e| redis_error("确认任务失败", e))?;
        Ok(())
    }

    async fn nack(&self, task_id: &str, error: &str) -> EngineResult<()> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .hdel(self.inflight_key(), task_id)
            .await
            .map_err(|e| redis_error("拒绝任务失败", e))?;
        if removed > 0 {
            debug!("任务 {} 处理失败: {}", task_id, error);
        }
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> EngineResult<bool> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn
            .hget(self.pending_key(), task_id)
            .await
            .map_err(|e| redis_error("读取待领取记录失败", e))?;
        let Some(payload) = payload else {
            return Ok(false);
        };

        let definition: TaskDefinition = serde_json::from_str(&payload)?;
        let from_ready: i64 = conn
            .lrem(self.queue_key(&definition.queue), 1, &payload)
            .await
            .map_err(|e| redis_error("撤回就绪任务失败", e))?;
        let from_delayed: i64 = conn
            .zrem(self.delayed_key(), &payload)
            .await
            .map_err(|e| redis_error("撤回延迟任务失败", e))?;
        let _: () = conn
            .hdel(self.pending_key(), task_id)
            .await
            .map_err(|e| redis_error("清除待领取记录失败", e))?;

        Ok(from_ready + from_delayed > 0)
    }

    async fn depth(&self) -> EngineResult<usize> {
        let mut conn = self.connection.clone();
        let mut total: usize = conn
            .zcard(self.delayed_key())
            .await
            .map_err(|e| redis_error("读取延迟任务数量失败", e))?;

        for queue in self.subscribed_queues(&mut conn, &[]).await? {
            let length: usize = conn
                .llen(self.queue_key(&queue))
                .await
                .map_err(|e| redis_error("读取队列长度失败", e))?;
            total += length;
        }

        Ok(total)
    }
}
