//! 内置诊断任务，用于在部署后验证引擎链路

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use taskforge_core::traits::{handler_fn, TaskContext, TaskHandler};
use taskforge_core::EngineResult;

pub const ECHO: &str = "diagnostics.echo";
pub const SLEEP: &str = "diagnostics.sleep";

/// 原样返回参数
pub fn echo() -> Arc<dyn TaskHandler> {
    handler_fn(|ctx: TaskContext| async move {
        ctx.log(format!("echo on {}", ctx.worker_id)).await;
        Ok(json!({ "args": ctx.args, "kwargs": ctx.kwargs }))
    })
}

/// 睡眠 `seconds`（关键字参数，默认1秒），期间上报进度并响应取消
pub fn sleep() -> Arc<dyn TaskHandler> {
    handler_fn(|ctx: TaskContext| async move {
        let seconds: f64 = ctx.kwarg("seconds")?.unwrap_or(1.0);
        let steps = 10u32;
        let step = Duration::from_secs_f64(seconds.max(0.0) / steps as f64);

        for i in 1..=steps {
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = ctx.cancelled() => {
                    return Ok(json!({ "slept": false }));
                }
            }
            ctx.set_progress((i * 100 / steps) as u8).await;
        }

        EngineResult::<Value>::Ok(json!({ "slept": true, "seconds": seconds }))
    })
}

pub fn all() -> Vec<(&'static str, Arc<dyn TaskHandler>)> {
    vec![(ECHO, echo()), (SLEEP, sleep())]
}
